//! Transfer Request Block (TRB) rings: command, event and per-endpoint
//! transfer rings all share the same cycle-bit-gated ring shape.

use crate::error::{DriverError, KernelError, KernelResult};

use super::dma::DmaBox;

/// Entries per ring segment, including the trailing Link TRB. `16` keeps a
/// ring well inside one 4 KiB frame (`16 * 16 = 256` bytes) while leaving
/// headroom for a handful of in-flight commands/transfers.
pub const RING_SIZE: usize = 16;

pub const TRB_TYPE_NORMAL: u32 = 1;
pub const TRB_TYPE_SETUP_STAGE: u32 = 2;
pub const TRB_TYPE_DATA_STAGE: u32 = 3;
pub const TRB_TYPE_STATUS_STAGE: u32 = 4;
pub const TRB_TYPE_LINK: u32 = 6;
pub const TRB_TYPE_ENABLE_SLOT_CMD: u32 = 9;
pub const TRB_TYPE_ADDRESS_DEVICE_CMD: u32 = 11;
pub const TRB_TYPE_CONFIGURE_ENDPOINT_CMD: u32 = 12;
pub const TRB_TYPE_NOOP_CMD: u32 = 23;
pub const TRB_TYPE_TRANSFER_EVENT: u32 = 32;
pub const TRB_TYPE_CMD_COMPLETION_EVENT: u32 = 33;
pub const TRB_TYPE_PORT_STATUS_CHANGE_EVENT: u32 = 34;

pub const CC_SUCCESS: u8 = 1;
pub const CC_SHORT_PACKET: u8 = 13;

#[repr(C)]
#[derive(Clone, Copy, Default, Debug)]
pub struct Trb {
    pub parameter: u64,
    pub status: u32,
    pub control: u32,
}

impl Trb {
    pub fn cycle_bit(&self) -> bool {
        self.control & 1 != 0
    }

    pub fn set_cycle_bit(&mut self, cycle: bool) {
        self.control = (self.control & !1) | (cycle as u32);
    }

    pub fn trb_type(&self) -> u32 {
        (self.control >> 10) & 0x3F
    }

    pub fn completion_code(&self) -> u8 {
        (self.status >> 24) as u8
    }

    pub fn slot_id(&self) -> u8 {
        (self.control >> 24) as u8
    }

    fn with_type(mut self, trb_type: u32) -> Self {
        self.control = (self.control & !(0x3F << 10)) | (trb_type << 10);
        self
    }

    pub fn link(next_segment: u64, toggle_cycle: bool) -> Self {
        let mut trb = Trb { parameter: next_segment, status: 0, control: 0 }.with_type(TRB_TYPE_LINK);
        if toggle_cycle {
            trb.control |= 1 << 1; // Toggle Cycle bit
        }
        trb
    }

    pub fn noop_cmd() -> Self {
        Trb::default().with_type(TRB_TYPE_NOOP_CMD)
    }

    pub fn enable_slot_cmd() -> Self {
        Trb::default().with_type(TRB_TYPE_ENABLE_SLOT_CMD)
    }

    pub fn address_device_cmd(input_ctx_phys: u64, slot_id: u8, block_set_address: bool) -> Self {
        let mut trb = Trb { parameter: input_ctx_phys, status: 0, control: 0 }
            .with_type(TRB_TYPE_ADDRESS_DEVICE_CMD);
        trb.control |= (slot_id as u32) << 24;
        if block_set_address {
            trb.control |= 1 << 9; // BSR
        }
        trb
    }

    pub fn configure_endpoint_cmd(input_ctx_phys: u64, slot_id: u8) -> Self {
        let mut trb = Trb { parameter: input_ctx_phys, status: 0, control: 0 }
            .with_type(TRB_TYPE_CONFIGURE_ENDPOINT_CMD);
        trb.control |= (slot_id as u32) << 24;
        trb
    }

    pub fn setup_stage(request: &[u8; 8], transfer_type: u32) -> Self {
        let parameter = u64::from_le_bytes(*request);
        let mut trb = Trb { parameter, status: 8, control: 0 }.with_type(TRB_TYPE_SETUP_STAGE);
        trb.control |= 1 << 6; // Immediate Data
        trb.control |= transfer_type << 16; // Transfer Type (TRT)
        trb
    }

    pub fn data_stage(buffer_phys: u64, len: u32, direction_in: bool) -> Self {
        let mut trb = Trb { parameter: buffer_phys, status: len, control: 0 }.with_type(TRB_TYPE_DATA_STAGE);
        if direction_in {
            trb.control |= 1 << 16; // Direction
        }
        trb
    }

    pub fn status_stage(direction_in: bool) -> Self {
        let mut trb = Trb::default().with_type(TRB_TYPE_STATUS_STAGE);
        trb.control |= 1 << 5; // Interrupt On Completion
        if direction_in {
            trb.control |= 1 << 16;
        }
        trb
    }

    pub fn normal(buffer_phys: u64, len: u32, expect_short_packet: bool) -> Self {
        let mut trb = Trb { parameter: buffer_phys, status: len, control: 0 }.with_type(TRB_TYPE_NORMAL);
        trb.control |= 1 << 5; // Interrupt On Completion
        if expect_short_packet {
            trb.control |= 1 << 2; // Interrupt on Short Packet
        }
        trb
    }
}

/// One segment worth of TRBs plus the bookkeeping to enqueue into it with
/// the wraparound/cycle-bit-toggle dance a ring needs.
pub struct Ring {
    segment: DmaBox<[Trb; RING_SIZE]>,
    enqueue_index: usize,
    cycle_state: bool,
}

impl Ring {
    pub fn new() -> KernelResult<Self> {
        let mut segment = DmaBox::<[Trb; RING_SIZE]>::new_zeroed()?;
        let phys = segment.phys_addr();
        // The last slot is a Link TRB pointing back to the start of this
        // same segment; its own cycle bit is stamped just before it's
        // crossed, per the ring wraparound algorithm below.
        segment.get_mut()[RING_SIZE - 1] = Trb::link(phys, true);
        Ok(Self { segment, enqueue_index: 0, cycle_state: true })
    }

    pub fn phys_addr(&self) -> u64 {
        self.segment.phys_addr()
    }

    pub fn cycle_state(&self) -> bool {
        self.cycle_state
    }

    /// Writes `trb` at the current enqueue position with the ring's
    /// current cycle bit, then advances past it. At the Link TRB, stamps
    /// its cycle bit to match, fences, flips the local cycle state, and
    /// wraps back to slot 0 before the next enqueue.
    pub fn enqueue(&mut self, mut trb: Trb) -> u64 {
        trb.set_cycle_bit(self.cycle_state);
        let slot_phys = self.phys_addr() + (self.enqueue_index * core::mem::size_of::<Trb>()) as u64;
        self.segment.get_mut()[self.enqueue_index] = trb;
        self.enqueue_index += 1;

        if self.enqueue_index == RING_SIZE - 1 {
            let link = &mut self.segment.get_mut()[RING_SIZE - 1];
            link.set_cycle_bit(self.cycle_state);
            core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
            self.cycle_state = !self.cycle_state;
            self.enqueue_index = 0;
        }

        slot_phys
    }
}

/// Drives the command ring and waits for each command's completion event,
/// delivered out-of-band through the event ring rather than returned
/// directly from `enqueue`.
pub struct CommandRing {
    pub ring: Ring,
}

impl CommandRing {
    pub fn new() -> KernelResult<Self> {
        Ok(Self { ring: Ring::new()? })
    }
}

pub fn completion_is_success(code: u8) -> KernelResult<()> {
    if code == CC_SUCCESS || code == CC_SHORT_PACKET {
        Ok(())
    } else {
        Err(KernelError::from(DriverError::CommandFailed { completion_code: code }))
    }
}
