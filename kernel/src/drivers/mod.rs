//! Device drivers.
//!
//! PCI bus access and a faithful xHCI host-controller driver are the real
//! content here; the PS/2 keyboard/mouse and console/terminal modules are
//! thin named-boundary stand-ins (`SPEC_FULL.md` §1) that exist so the boot
//! sequence has something to initialize, not full input/display stacks.

pub mod console;
pub mod keyboard;
pub mod mouse;
pub mod pci;
pub mod terminal;
pub mod usb;

/// Initialize all drivers.
pub fn init() {
    crate::println!("[DRIVERS] Initializing device drivers...");

    // Terminal state before console, so the console backend has somewhere
    // to read geometry from.
    terminal::init();
    console::init();

    pci::init();
    usb::init();

    keyboard::init();
    mouse::init();

    crate::println!("[DRIVERS] Device drivers initialized");
}
