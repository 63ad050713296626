//! POSIX signal-state integration tests: dispositions, the pending/blocked
//! mask, and the realtime queue, run under the bare-metal harness.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(likeos64_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use likeos64_kernel::process::signal::{Disposition, QueuedSiginfo, SignalState, SIGKILL, SIGUSR1};
use likeos64_kernel::{kernel_assert, kernel_assert_eq, serial_println};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("=== Signal Tests ===");
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    likeos64_kernel::test_panic_handler(info)
}

#[test_case]
fn default_disposition_is_default() {
    let sig = SignalState::new();
    kernel_assert_eq!(sig.disposition(SIGUSR1), Disposition::Default);
}

#[test_case]
fn sigkill_disposition_cannot_be_changed() {
    let sig = SignalState::new();
    kernel_assert!(sig.set_disposition(SIGKILL, Disposition::Ignore).is_none());
}

#[test_case]
fn raise_then_take_clears_pending_bit() {
    let sig = SignalState::new();
    sig.raise(SIGUSR1);
    kernel_assert!(sig.pending_mask() & (1 << SIGUSR1) != 0);
    let delivered = sig.next_deliverable();
    kernel_assert_eq!(delivered, Some(SIGUSR1));
    kernel_assert!(sig.pending_mask() & (1 << SIGUSR1) == 0);
}

#[test_case]
fn blocked_signal_is_not_deliverable() {
    let sig = SignalState::new();
    sig.set_blocked_mask(1 << SIGUSR1);
    sig.raise(SIGUSR1);
    kernel_assert!(sig.next_deliverable().is_none());
}

#[test_case]
fn sigkill_cannot_be_blocked() {
    let sig = SignalState::new();
    sig.set_blocked_mask(1 << SIGKILL);
    kernel_assert!(sig.blocked_mask() & (1 << SIGKILL) == 0);
}

#[test_case]
fn realtime_queue_is_bounded() {
    let sig = SignalState::new();
    let mut accepted = 0;
    for i in 0..64 {
        if sig.queue_rt(QueuedSiginfo { signo: 34, code: 0, value: i }) {
            accepted += 1;
        }
    }
    kernel_assert!(accepted < 64);
}
