//! PS/2 keyboard: scancode decoding only.
//!
//! The primary console is the serial port (see `crate::print`), so nothing
//! downstream actually consumes these keypresses yet; this just proves the
//! IRQ1 handler and the scancode decoder work, buffering decoded characters
//! for whatever later reads them.

use alloc::collections::VecDeque;

use pc_keyboard::{layouts, DecodedKey, HandleControl, Keyboard, ScancodeSet1};
use spin::Mutex;
use x86_64::instructions::port::Port;

use crate::irq::{self, IrqNumber};
use crate::sync::once_lock::GlobalState;

const DATA_PORT: u16 = 0x60;
const KEYBOARD_IRQ: u32 = 1;
const BUFFER_CAPACITY: usize = 256;

struct KeyboardState {
    decoder: Keyboard<layouts::Us104Key, ScancodeSet1>,
    buffer: VecDeque<u8>,
}

static KEYBOARD: GlobalState<Mutex<KeyboardState>> = GlobalState::new();

pub fn init() {
    let state = KeyboardState {
        decoder: Keyboard::new(ScancodeSet1::new(), layouts::Us104Key, HandleControl::Ignore),
        buffer: VecDeque::with_capacity(BUFFER_CAPACITY),
    };
    if KEYBOARD.init(Mutex::new(state)).is_err() {
        log::warn!("keyboard: already initialized");
        return;
    }
    if let Err(e) = irq::register_handler(IrqNumber::new(KEYBOARD_IRQ), handle_irq) {
        log::warn!("keyboard: failed to register IRQ{}: {:?}", KEYBOARD_IRQ, e);
        return;
    }
    let _ = irq::enable_irq(IrqNumber::new(KEYBOARD_IRQ));
    log::info!("keyboard: PS/2 decoder online");
}

fn handle_irq(_irq: IrqNumber) {
    // SAFETY: IRQ1 fires only after the controller latches a byte in its
    // output buffer at port 0x60.
    let scancode = unsafe { Port::<u8>::new(DATA_PORT).read() };

    KEYBOARD.with(|lock| {
        let mut state = lock.lock();
        if let Ok(Some(event)) = state.decoder.add_byte(scancode) {
            if let Some(decoded) = state.decoder.process_keyevent(event) {
                if let DecodedKey::Unicode(ch) = decoded {
                    let mut buf = [0u8; 4];
                    for byte in ch.encode_utf8(&mut buf).bytes() {
                        if state.buffer.len() == BUFFER_CAPACITY {
                            state.buffer.pop_front();
                        }
                        state.buffer.push_back(byte);
                    }
                }
            }
        }
    });
}

/// Drains whatever's been decoded since the last call. Returns `0` if the
/// driver hasn't been initialized.
pub fn read(buf: &mut [u8]) -> usize {
    KEYBOARD
        .with(|lock| {
            let mut state = lock.lock();
            let mut n = 0;
            while n < buf.len() {
                match state.buffer.pop_front() {
                    Some(byte) => {
                        buf[n] = byte;
                        n += 1;
                    }
                    None => break,
                }
            }
            n
        })
        .unwrap_or(0)
}
