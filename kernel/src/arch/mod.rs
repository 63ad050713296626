//! Architecture abstraction layer. Only `x86_64` is implemented; the
//! module boundary exists so the rest of the kernel never names
//! `arch::x86_64` directly outside this file.

pub mod x86_64;

pub use x86_64::{disable_interrupts, enable_interrupts, halt, idle};
