//! xHCI host controller driver.
//!
//! Brings up one controller from its already-resolved MMIO base (BAR0
//! resolution via `super::pci` is the caller's job), enumerates whatever's
//! plugged into its root ports, and exposes control/bulk transfers to
//! whatever device driver sits above this one. Multi-segment event rings,
//! MSI-X, and streams aren't implemented; see `DESIGN.md`.

pub mod context;
pub mod device;
pub mod dma;
pub mod event;
pub mod regs;
pub mod ring;

use alloc::vec::Vec;

use crate::error::{DriverError, KernelError, KernelResult};
use crate::timer;

use context::{dci_for_endpoint, DeviceContextBox, InputContextBox, EP_TYPE_BULK_IN, EP_TYPE_BULK_OUT, EP_TYPE_CONTROL};
use device::{
    default_ep0_max_packet_size, parse_bulk_endpoints, setup_packet, DeviceDescriptor, EndpointDescriptor,
    DESCRIPTOR_CONFIGURATION, DESCRIPTOR_DEVICE, REQUEST_GET_DESCRIPTOR, REQUEST_SET_CONFIGURATION, TRT_IN_DATA,
    TRT_NO_DATA,
};
use dma::DmaBox;
use event::EventRing;
use ring::{
    completion_is_success, CommandRing, Ring, Trb, TRB_TYPE_CMD_COMPLETION_EVENT, TRB_TYPE_PORT_STATUS_CHANGE_EVENT,
    TRB_TYPE_TRANSFER_EVENT,
};

const COMMAND_TIMEOUT_NS: u64 = 500_000_000;
const RESET_TIMEOUT_NS: u64 = 1_000_000_000;
const CTRL_BUFFER_SIZE: usize = 256;
const BULK_BUFFER_SIZE: usize = 4096;

struct BulkEndpoint {
    descriptor: EndpointDescriptor,
    ring: Ring,
    buffer: DmaBox<[u8; BULK_BUFFER_SIZE]>,
}

struct Slot {
    device_ctx: DeviceContextBox,
    ep0_ring: Ring,
    ep0_max_packet: u16,
    ctrl_buffer: DmaBox<[u8; CTRL_BUFFER_SIZE]>,
    bulk_endpoints: Vec<BulkEndpoint>,
}

pub struct Controller {
    cap: regs::Mmio,
    op: regs::Mmio,
    runtime: regs::Mmio,
    doorbell: regs::Mmio,
    max_slots: u8,
    num_ports: u8,
    dcbaa: context::Dcbaa,
    _scratchpad_array: Option<DmaBox<[u64; 32]>>,
    cmd_ring: CommandRing,
    event_ring: EventRing,
    slots: Vec<Option<Slot>>,
}

impl Controller {
    pub fn new(phys_base: u64) -> KernelResult<Self> {
        let cap = regs::Mmio::new(phys_base);
        let cap_length = cap.read8(regs::CAP_CAPLENGTH) as usize;
        let hcsparams1 = cap.read32(regs::CAP_HCSPARAMS1);
        let max_slots = (hcsparams1 & 0xFF) as u8;
        let num_ports = ((hcsparams1 >> 24) & 0xFF) as u8;
        let dboff = (cap.read32(regs::CAP_DBOFF) & !0x3) as usize;
        let rtsoff = (cap.read32(regs::CAP_RTSOFF) & !0x1F) as usize;

        let op = regs::Mmio::at(phys_base, cap_length);
        let runtime = regs::Mmio::at(phys_base, rtsoff);
        let doorbell = regs::Mmio::at(phys_base, dboff);

        let mut controller = Self {
            cap,
            op,
            runtime,
            doorbell,
            max_slots,
            num_ports,
            dcbaa: context::Dcbaa::new_zeroed()?,
            _scratchpad_array: None,
            cmd_ring: CommandRing::new()?,
            event_ring: EventRing::new()?,
            slots: Vec::new(),
        };
        controller.slots.resize_with(max_slots as usize + 1, || None);
        controller.reset()?;
        controller.configure()?;
        Ok(controller)
    }

    fn reset(&self) -> KernelResult<()> {
        self.op.write32(regs::OP_USBCMD, self.op.read32(regs::OP_USBCMD) & !regs::USBCMD_RUN);
        let deadline = timer::deadline_after(RESET_TIMEOUT_NS);
        while self.op.read32(regs::OP_USBSTS) & regs::USBSTS_HCH == 0 {
            if timer::has_elapsed(deadline) {
                return Err(KernelError::from(DriverError::ControllerNotResponding));
            }
        }

        self.op.write32(regs::OP_USBCMD, regs::USBCMD_HCRST);
        let deadline = timer::deadline_after(RESET_TIMEOUT_NS);
        while self.op.read32(regs::OP_USBCMD) & regs::USBCMD_HCRST != 0
            || self.op.read32(regs::OP_USBSTS) & regs::USBSTS_CNR != 0
        {
            if timer::has_elapsed(deadline) {
                return Err(KernelError::from(DriverError::ControllerNotResponding));
            }
        }
        Ok(())
    }

    fn configure(&mut self) -> KernelResult<()> {
        self.op.write32(regs::OP_CONFIG, self.max_slots as u32);
        self.op.write64(regs::OP_DCBAAP, self.dcbaa.phys_addr());

        let hcsparams2 = self.cap.read32(regs::CAP_HCSPARAMS2);
        let max_scratchpad = (((hcsparams2 >> 27) & 0x1F) << 5) | ((hcsparams2 >> 21) & 0x1F);
        if max_scratchpad > 0 {
            let mut array = DmaBox::<[u64; 32]>::new_zeroed()?;
            let count = (max_scratchpad as usize).min(32);
            for slot in array.get_mut().iter_mut().take(count) {
                *slot = crate::mm::frame_allocator().alloc()?.phys_addr();
            }
            self.dcbaa.get_mut()[0] = array.phys_addr();
            self._scratchpad_array = Some(array);
        }

        self.op.write64(regs::OP_CRCR, self.cmd_ring.ring.phys_addr() | (self.cmd_ring.ring.cycle_state() as u64));

        let ir0 = regs::RT_IR0_OFFSET;
        self.runtime.write32(ir0 + regs::IR_ERSTSZ, 1);
        self.runtime.write64(ir0 + regs::IR_ERDP, self.event_ring.dequeue_phys_addr());
        self.runtime.write64(ir0 + regs::IR_ERSTBA, self.event_ring.erst_phys_addr());

        self.op.write32(regs::OP_USBCMD, regs::USBCMD_RUN);
        let deadline = timer::deadline_after(RESET_TIMEOUT_NS);
        while self.op.read32(regs::OP_USBSTS) & regs::USBSTS_HCH != 0 {
            if timer::has_elapsed(deadline) {
                return Err(KernelError::from(DriverError::ControllerNotResponding));
            }
        }
        Ok(())
    }

    fn ring_doorbell(&self, slot_id: u8, dci: u8) {
        self.doorbell.write32(slot_id as usize * 4, dci as u32);
    }

    /// Processes whatever the controller has produced since the last call,
    /// dispatching transfer/command-completion/port-status events and
    /// writing ERDP back with the Event Handler Busy bit set, as the
    /// consumer side of the ring protocol requires.
    fn drain_events(&mut self) -> Vec<Trb> {
        let mut drained = Vec::new();
        while let Some(trb) = self.event_ring.pop() {
            drained.push(trb);
        }
        if !drained.is_empty() {
            let ir0 = regs::RT_IR0_OFFSET;
            self.runtime.write64(ir0 + regs::IR_ERDP, self.event_ring.dequeue_phys_addr() | regs::ERDP_EHB);
        }
        drained
    }

    fn issue_command(&mut self, trb: Trb) -> KernelResult<Trb> {
        self.cmd_ring.ring.enqueue(trb);
        self.ring_doorbell(0, 0);

        let deadline = timer::deadline_after(COMMAND_TIMEOUT_NS);
        loop {
            for event in self.drain_events() {
                if event.trb_type() == TRB_TYPE_CMD_COMPLETION_EVENT {
                    return Ok(event);
                }
            }
            if timer::has_elapsed(deadline) {
                return Err(KernelError::from(DriverError::Timeout));
            }
        }
    }

    /// Brings up every connected, not-yet-enumerated port and returns the
    /// slot IDs of whatever enumerated successfully. Ports that reset but
    /// fail enumeration are logged and skipped rather than aborting the
    /// whole scan.
    pub fn bring_up_ports(&mut self) -> KernelResult<Vec<u8>> {
        let mut enumerated = Vec::new();
        for port in 0..self.num_ports {
            let offset = regs::OP_PORTSC_BASE + port as usize * regs::OP_PORT_STRIDE;
            let portsc = self.op.read32(offset);
            if portsc & regs::PORTSC_CCS == 0 {
                continue;
            }

            let preserved = portsc & regs::PORTSC_RSVDZ_PRESERVE_MASK;
            self.op.write32(offset, preserved | regs::PORTSC_PR);
            let deadline = timer::deadline_after(RESET_TIMEOUT_NS);
            loop {
                let status = self.op.read32(offset);
                if status & regs::PORTSC_PR == 0 {
                    break;
                }
                if timer::has_elapsed(deadline) {
                    log::warn!("xhci: port {} reset timed out", port);
                    break;
                }
            }
            self.op.write32(offset, (self.op.read32(offset) & regs::PORTSC_RSVDZ_PRESERVE_MASK) | regs::PORTSC_CSC | regs::PORTSC_WRC);

            let speed = ((self.op.read32(offset) >> regs::PORTSC_SPEED_SHIFT) & 0xF) as u8;
            match self.enumerate_device(port + 1, speed) {
                Ok(slot_id) => enumerated.push(slot_id),
                Err(e) => log::warn!("xhci: enumeration failed on port {}: {:?}", port + 1, e),
            }
        }
        Ok(enumerated)
    }

    fn enumerate_device(&mut self, root_hub_port_number: u8, speed: u8) -> KernelResult<u8> {
        let slot_event = self.issue_command(Trb::enable_slot_cmd())?;
        completion_is_success(slot_event.completion_code())?;
        let slot_id = slot_event.slot_id();
        if slot_id == 0 || slot_id as usize >= self.slots.len() {
            return Err(KernelError::from(DriverError::NoFreeSlot));
        }

        let mut ep0_max_packet = default_ep0_max_packet_size(speed);
        let device_ctx = DeviceContextBox::new_zeroed()?;
        self.dcbaa.get_mut()[slot_id as usize] = device_ctx.phys_addr();
        let ep0_ring = Ring::new()?;

        let mut input_ctx = InputContextBox::new_zeroed()?;
        {
            let ctx = input_ctx.get_mut();
            ctx.control.add_flags = 0b11; // A0 (slot) and A1 (EP0)
            ctx.slot.set(speed, 1, root_hub_port_number);
            ctx.endpoints[0].set(EP_TYPE_CONTROL, ep0_max_packet, 0, ep0_ring.phys_addr(), ep0_ring.cycle_state());
        }

        let address_event = self.issue_command(Trb::address_device_cmd(input_ctx.phys_addr(), slot_id, false))?;
        completion_is_success(address_event.completion_code())?;

        let mut slot = Slot {
            device_ctx,
            ep0_ring,
            ep0_max_packet,
            ctrl_buffer: DmaBox::new_zeroed()?,
            bulk_endpoints: Vec::new(),
        };

        let mut header = [0u8; 8];
        self.control_transfer_on(&mut slot, slot_id, 0x80, REQUEST_GET_DESCRIPTOR, (DESCRIPTOR_DEVICE as u16) << 8, 0, &mut header)?;
        ep0_max_packet = header[7] as u16;
        slot.ep0_max_packet = ep0_max_packet;

        let mut device_desc_buf = [0u8; 18];
        self.control_transfer_on(&mut slot, slot_id, 0x80, REQUEST_GET_DESCRIPTOR, (DESCRIPTOR_DEVICE as u16) << 8, 0, &mut device_desc_buf)?;
        let device_descriptor = DeviceDescriptor::parse(&device_desc_buf)?;
        log::info!(
            "xhci: slot {} vid={:04x} pid={:04x} class={:02x}",
            slot_id, device_descriptor.vendor_id, device_descriptor.product_id, device_descriptor.device_class
        );

        let mut config_header = [0u8; 9];
        self.control_transfer_on(&mut slot, slot_id, 0x80, REQUEST_GET_DESCRIPTOR, (DESCRIPTOR_CONFIGURATION as u16) << 8, 0, &mut config_header)?;
        let total_length = u16::from_le_bytes([config_header[2], config_header[3]]) as usize;
        let mut config_buf = alloc::vec![0u8; total_length.min(CTRL_BUFFER_SIZE)];
        self.control_transfer_on(&mut slot, slot_id, 0x80, REQUEST_GET_DESCRIPTOR, (DESCRIPTOR_CONFIGURATION as u16) << 8, 0, &mut config_buf)?;

        let bulk_endpoints = parse_bulk_endpoints(&config_buf);
        self.control_transfer_on(&mut slot, slot_id, 0x00, REQUEST_SET_CONFIGURATION, 1, 0, &mut [])?;

        if !bulk_endpoints.is_empty() {
            self.configure_bulk_endpoints(&mut slot, slot_id, &bulk_endpoints)?;
        }

        self.slots[slot_id as usize] = Some(slot);
        Ok(slot_id)
    }

    fn configure_bulk_endpoints(&mut self, slot: &mut Slot, slot_id: u8, endpoints: &[EndpointDescriptor]) -> KernelResult<()> {
        let mut input_ctx = InputContextBox::new_zeroed()?;
        let mut max_dci = 1usize;
        for ep in endpoints {
            let ring = Ring::new()?;
            let dci = dci_for_endpoint(ep.number(), ep.is_in());
            max_dci = max_dci.max(dci);
            let ep_type = if ep.is_in() { EP_TYPE_BULK_IN } else { EP_TYPE_BULK_OUT };
            {
                let ctx = input_ctx.get_mut();
                ctx.control.add_flags |= 1 << (dci + 1);
                ctx.endpoints[dci].set(ep_type, ep.max_packet_size, 0, ring.phys_addr(), ring.cycle_state());
            }
            slot.bulk_endpoints.push(BulkEndpoint { descriptor: *ep, ring, buffer: DmaBox::new_zeroed()? });
        }
        input_ctx.get_mut().slot.set(0, (max_dci + 1) as u8, 0);
        input_ctx.get_mut().control.add_flags |= 1; // A0: slot context entries changed too

        let event = self.issue_command(Trb::configure_endpoint_cmd(input_ctx.phys_addr(), slot_id))?;
        completion_is_success(event.completion_code())
    }

    /// Issues a control transfer against an already-enumerated slot's EP0.
    pub fn control_transfer(&mut self, slot_id: u8, request_type: u8, request: u8, value: u16, index: u16, buf: &mut [u8]) -> KernelResult<usize> {
        let mut slot = self.slots[slot_id as usize].take().ok_or(KernelError::from(DriverError::ControllerNotResponding))?;
        let result = self.control_transfer_on(&mut slot, slot_id, request_type, request, value, index, buf);
        self.slots[slot_id as usize] = Some(slot);
        result
    }

    fn control_transfer_on(&mut self, slot: &mut Slot, slot_id: u8, request_type: u8, request: u8, value: u16, index: u16, buf: &mut [u8]) -> KernelResult<usize> {
        let direction_in = request_type & 0x80 != 0;
        let length = buf.len().min(CTRL_BUFFER_SIZE) as u16;
        let setup = setup_packet(request_type, request, value, index, length);
        let transfer_type = if length == 0 {
            TRT_NO_DATA
        } else if direction_in {
            TRT_IN_DATA
        } else {
            device::TRT_OUT_DATA
        };

        slot.ep0_ring.enqueue(Trb::setup_stage(&setup, transfer_type));
        if length > 0 {
            slot.ep0_ring.enqueue(Trb::data_stage(slot.ctrl_buffer.phys_addr(), length as u32, direction_in));
        }
        slot.ep0_ring.enqueue(Trb::status_stage(!direction_in || length == 0));

        self.ring_doorbell(slot_id, 1);
        let event = self.wait_for_transfer(slot_id)?;
        completion_is_success(event.completion_code())?;

        let residue = event.status & 0xFFFFFF;
        let transferred = (length as u32).saturating_sub(residue) as usize;
        if direction_in && transferred > 0 {
            // SAFETY: `transferred` never exceeds the length just
            // requested, which is already clamped to the buffer's size.
            let src = unsafe { core::slice::from_raw_parts(slot.ctrl_buffer.as_ptr() as *const u8, transferred) };
            buf[..transferred].copy_from_slice(src);
        } else if !direction_in && length > 0 {
            let dst = slot.ctrl_buffer.get_mut();
            dst[..length as usize].copy_from_slice(&buf[..length as usize]);
        }
        Ok(transferred)
    }

    /// Issues a single bulk transfer on `endpoint_number` of an
    /// already-enumerated slot.
    pub fn bulk_transfer(&mut self, slot_id: u8, endpoint_number: u8, is_in: bool, buf: &mut [u8]) -> KernelResult<usize> {
        let mut slot = self.slots[slot_id as usize].take().ok_or(KernelError::from(DriverError::ControllerNotResponding))?;
        let result = self.bulk_transfer_on(&mut slot, slot_id, endpoint_number, is_in, buf);
        self.slots[slot_id as usize] = Some(slot);
        result
    }

    fn bulk_transfer_on(&mut self, slot: &mut Slot, slot_id: u8, endpoint_number: u8, is_in: bool, buf: &mut [u8]) -> KernelResult<usize> {
        let dci = dci_for_endpoint(endpoint_number, is_in);
        let endpoint = slot
            .bulk_endpoints
            .iter_mut()
            .find(|ep| dci_for_endpoint(ep.descriptor.number(), ep.descriptor.is_in()) == dci)
            .ok_or(KernelError::from(DriverError::DescriptorTooShort))?;

        let len = buf.len().min(BULK_BUFFER_SIZE) as u32;
        if !is_in {
            endpoint.buffer.get_mut()[..len as usize].copy_from_slice(&buf[..len as usize]);
        }

        endpoint.ring.enqueue(Trb::normal(endpoint.buffer.phys_addr(), len, is_in));
        self.ring_doorbell(slot_id, dci as u8 + 1);
        let event = self.wait_for_transfer(slot_id)?;
        completion_is_success(event.completion_code())?;

        let residue = event.status & 0xFFFFFF;
        let transferred = len.saturating_sub(residue) as usize;
        if is_in && transferred > 0 {
            buf[..transferred].copy_from_slice(&endpoint.buffer.get()[..transferred]);
        }
        Ok(transferred)
    }

    fn wait_for_transfer(&mut self, slot_id: u8) -> KernelResult<Trb> {
        let deadline = timer::deadline_after(COMMAND_TIMEOUT_NS);
        loop {
            for event in self.drain_events() {
                match event.trb_type() {
                    TRB_TYPE_TRANSFER_EVENT if event.slot_id() == slot_id => return Ok(event),
                    TRB_TYPE_PORT_STATUS_CHANGE_EVENT => continue,
                    _ => continue,
                }
            }
            if timer::has_elapsed(deadline) {
                return Err(KernelError::from(DriverError::Timeout));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::device::default_ep0_max_packet_size;

    #[test]
    fn ep0_max_packet_follows_port_speed() {
        assert_eq!(default_ep0_max_packet_size(2), 8);
        assert_eq!(default_ep0_max_packet_size(3), 64);
        assert_eq!(default_ep0_max_packet_size(5), 512);
    }
}
