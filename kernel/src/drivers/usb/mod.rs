//! USB subsystem: locates the xHCI host controller over PCI, brings it up,
//! and enumerates whatever is plugged into its root ports.

pub mod xhci;

use crate::sync::once_lock::GlobalState;

const XHCI_CLASS: u8 = 0x0C;
const XHCI_SUBCLASS: u8 = 0x03;
const XHCI_PROG_IF: u8 = 0x30;

static CONTROLLER: GlobalState<spin::Mutex<xhci::Controller>> = GlobalState::new();

/// Finds the xHCI controller over PCI, brings it up, and enumerates its
/// ports. Logs and returns without error if no controller is present; a
/// kernel without any USB hardware attached still boots.
pub fn init() {
    let Some(device) = super::pci::find_by_class(XHCI_CLASS, XHCI_SUBCLASS, XHCI_PROG_IF) else {
        log::info!("usb: no xHCI controller found");
        return;
    };

    let Some(bar0) = device.bar(0) else {
        log::warn!("usb: xHCI controller has no usable MMIO BAR0");
        return;
    };
    device.enable_bus_master();

    let mut controller = match xhci::Controller::new(bar0) {
        Ok(c) => c,
        Err(e) => {
            log::warn!("usb: xHCI controller bring-up failed: {:?}", e);
            return;
        }
    };

    match controller.bring_up_ports() {
        Ok(slots) => log::info!("usb: enumerated {} device(s)", slots.len()),
        Err(e) => log::warn!("usb: port enumeration failed: {:?}", e),
    }

    if CONTROLLER.init(spin::Mutex::new(controller)).is_err() {
        log::warn!("usb: controller already initialized");
    }
}

/// Issues a control transfer against an enumerated slot, if a controller is
/// present.
pub fn control_transfer(slot_id: u8, request_type: u8, request: u8, value: u16, index: u16, buf: &mut [u8]) -> Option<crate::error::KernelResult<usize>> {
    CONTROLLER.with(|c| c.lock().control_transfer(slot_id, request_type, request, value, index, buf))
}

/// Issues a bulk transfer against an enumerated slot's endpoint, if a
/// controller is present.
pub fn bulk_transfer(slot_id: u8, endpoint_number: u8, is_in: bool, buf: &mut [u8]) -> Option<crate::error::KernelResult<usize>> {
    CONTROLLER.with(|c| c.lock().bulk_transfer(slot_id, endpoint_number, is_in, buf))
}
