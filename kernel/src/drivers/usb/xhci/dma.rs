//! Single-frame DMA buffers for xHCI's host-controller-visible structures.
//!
//! The kernel heap (`mm::heap`) lives in its own mapped-on-demand virtual
//! region with no contiguity guarantee against physical memory, so a `Box`
//! from it has no usable physical address to hand the controller. A frame
//! straight from the allocator does: its physical address is known at
//! allocation time and its direct-map virtual alias (`mm::DIRECT_MAP_BASE`)
//! is what the CPU side touches.

use core::marker::PhantomData;
use core::mem::size_of;

use crate::error::KernelResult;
use crate::mm::{frame_allocator, FrameNumber, PhysicalAddress, FRAME_SIZE};

/// Owns exactly one physical frame, typed as holding (at most) a `T`.
/// `T` must fit in a single 4 KiB frame; every xHCI structure this driver
/// allocates (a ring segment, a context, the DCBAA) does.
pub struct DmaBox<T> {
    frame: FrameNumber,
    _marker: PhantomData<T>,
}

impl<T> DmaBox<T> {
    pub fn new_zeroed() -> KernelResult<Self> {
        assert!(size_of::<T>() <= FRAME_SIZE, "DMA type must fit in one frame");
        let frame = frame_allocator().alloc()?;
        let ptr = PhysicalAddress::new(frame.phys_addr()).direct_map_virt().as_u64() as *mut u8;
        // SAFETY: `frame` was just allocated and is owned exclusively by
        // this `DmaBox`; its direct-map alias is mapped and writable.
        unsafe { core::ptr::write_bytes(ptr, 0, FRAME_SIZE) };
        Ok(Self { frame, _marker: PhantomData })
    }

    pub fn phys_addr(&self) -> u64 {
        self.frame.phys_addr()
    }

    pub fn as_ptr(&self) -> *const T {
        PhysicalAddress::new(self.frame.phys_addr()).direct_map_virt().as_u64() as *const T
    }

    pub fn as_mut_ptr(&mut self) -> *mut T {
        PhysicalAddress::new(self.frame.phys_addr()).direct_map_virt().as_u64() as *mut T
    }

    /// Borrows the frame as `T`, which must be a plain-old-data layout
    /// (repr(C)/packed) valid for any byte pattern, since it was zeroed
    /// rather than constructed.
    pub fn get(&self) -> &T {
        // SAFETY: the frame is exclusively owned and was zero-initialized;
        // callers only instantiate `DmaBox` over repr(C) PODs.
        unsafe { &*self.as_ptr() }
    }

    pub fn get_mut(&mut self) -> &mut T {
        // SAFETY: see `get`.
        unsafe { &mut *self.as_mut_ptr() }
    }
}

impl<T> Drop for DmaBox<T> {
    fn drop(&mut self) {
        let _ = frame_allocator().free(self.frame);
    }
}
