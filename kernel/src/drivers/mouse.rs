//! PS/2 mouse: raw packet capture only.
//!
//! Byte decoding into movement/button state and cursor compositing are a
//! named external boundary; this driver just drains IRQ12 so the aux port
//! doesn't wedge the controller, and keeps the most recent raw 3-byte
//! packet around for whatever wants to inspect it.

use spin::Mutex;
use x86_64::instructions::port::Port;

use crate::irq::{self, IrqNumber};
use crate::sync::once_lock::GlobalState;

const DATA_PORT: u16 = 0x60;
const MOUSE_IRQ: u32 = 12;

struct MouseState {
    packet: [u8; 3],
    index: usize,
}

static MOUSE: GlobalState<Mutex<MouseState>> = GlobalState::new();

pub fn init() {
    if MOUSE.init(Mutex::new(MouseState { packet: [0; 3], index: 0 })).is_err() {
        log::warn!("mouse: already initialized");
        return;
    }
    if let Err(e) = irq::register_handler(IrqNumber::new(MOUSE_IRQ), handle_irq) {
        log::warn!("mouse: failed to register IRQ{}: {:?}", MOUSE_IRQ, e);
        return;
    }
    let _ = irq::enable_irq(IrqNumber::new(MOUSE_IRQ));
    log::info!("mouse: PS/2 aux port capture online");
}

fn handle_irq(_irq: IrqNumber) {
    // SAFETY: IRQ12 fires only after the controller latches a byte from
    // the aux (mouse) port in the same data register as the keyboard.
    let byte = unsafe { Port::<u8>::new(DATA_PORT).read() };

    MOUSE.with(|lock| {
        let mut state = lock.lock();
        state.packet[state.index] = byte;
        state.index = (state.index + 1) % state.packet.len();
    });
}

/// Most recently completed raw packet, or `None` before the driver is
/// initialized.
pub fn last_packet() -> Option<[u8; 3]> {
    MOUSE.with(|lock| lock.lock().packet)
}
