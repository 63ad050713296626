//! Event ring: a single-segment ring the controller writes into and the
//! driver drains, gated by the same cycle-bit protocol as the rings it
//! produces into, but consumed rather than produced.

use crate::error::KernelResult;

use super::dma::DmaBox;
use super::ring::{Trb, RING_SIZE};

/// One Event Ring Segment Table entry (6.5 in the xHCI register layout):
/// base address of a segment plus its size in TRBs.
#[repr(C)]
#[derive(Clone, Copy, Default)]
struct ErstEntry {
    ring_segment_base: u64,
    ring_segment_size: u32,
    _reserved: u32,
}

pub struct EventRing {
    segment: DmaBox<[Trb; RING_SIZE]>,
    erst: DmaBox<[ErstEntry; 1]>,
    dequeue_index: usize,
    cycle_state: bool,
}

impl EventRing {
    pub fn new() -> KernelResult<Self> {
        let segment = DmaBox::<[Trb; RING_SIZE]>::new_zeroed()?;
        let mut erst = DmaBox::<[ErstEntry; 1]>::new_zeroed()?;
        erst.get_mut()[0] =
            ErstEntry { ring_segment_base: segment.phys_addr(), ring_segment_size: RING_SIZE as u32, _reserved: 0 };
        Ok(Self { segment, erst, dequeue_index: 0, cycle_state: true })
    }

    pub fn erst_phys_addr(&self) -> u64 {
        self.erst.phys_addr()
    }

    pub fn dequeue_phys_addr(&self) -> u64 {
        self.segment.phys_addr() + (self.dequeue_index * core::mem::size_of::<Trb>()) as u64
    }

    /// Pops the next TRB the controller has produced, or `None` if the
    /// cycle bit at the current dequeue slot doesn't yet match the
    /// consumer's expected cycle state (i.e. the controller hasn't written
    /// past here yet).
    pub fn pop(&mut self) -> Option<Trb> {
        let trb = self.segment.get()[self.dequeue_index];
        if trb.cycle_bit() != self.cycle_state {
            return None;
        }

        self.dequeue_index += 1;
        if self.dequeue_index == RING_SIZE {
            self.dequeue_index = 0;
            self.cycle_state = !self.cycle_state;
        }
        Some(trb)
    }
}
