//! Serial console: the kernel's primary output channel.
//!
//! The framebuffer console is a named external collaborator (see
//! `SPEC_FULL.md` §1) and is not implemented here; all kernel diagnostics,
//! the `log` backend, and panic/exception dumps go out over COM1.

pub use crate::arch::x86_64::serial::{_print as _serial_print, SERIAL1};

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_serial_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => {
        $crate::serial_print!("{}\n", format_args!($($arg)*))
    };
}
