//! System console.
//!
//! The active console is the serial port: `crate::print`'s `print!`/
//! `println!` macros and `fs::file::OpenFileBackend::Console` both go
//! straight to COM1. A framebuffer console is a named external boundary
//! (`SPEC_FULL.md` §1) this driver doesn't implement; `init` exists so the
//! boot sequence has a place to log which backend is actually active.

pub fn init() {
    let geometry = super::terminal::state();
    log::info!("console: serial backend active ({}x{} logical)", geometry.cols, geometry.rows);
}
