//! Memory management.
//!
//! Boot order: [`frame_allocator`] is seeded from the bootloader's memory
//! map, then [`page_table`] builds the kernel's own page tables (identity
//! map of the low 2 MiB, a higher-half mapping of the kernel image, and a
//! direct physical map at [`DIRECT_MAP_BASE`]) and these become active only
//! after UEFI boot services have been exited. [`heap`] carves the kernel
//! heap out of kernel-virtual space once paging is live. [`page_fault`]
//! serves demand paging and copy-on-write for user tasks.

pub mod frame_allocator;
pub mod heap;
pub mod page_fault;
pub mod page_table;
pub mod user_validation;

pub use frame_allocator::{FrameAllocator, FrameNumber, FRAME_SIZE};

use spin::Once;

use crate::error::{KernelError, KernelResult};

/// Base of the direct physical map: `virt = phys + DIRECT_MAP_BASE`.
///
/// Chosen inside the canonical higher half, well clear of the kernel image
/// link address and the per-task user range.
pub const DIRECT_MAP_BASE: u64 = 0xFFFF_8000_0000_0000;

/// Physical address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysicalAddress(pub u64);

impl PhysicalAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// This physical address as seen through the direct map.
    pub fn direct_map_virt(&self) -> VirtualAddress {
        VirtualAddress(DIRECT_MAP_BASE + self.0)
    }
}

/// Virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualAddress(pub u64);

impl VirtualAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn add(&self, offset: usize) -> Self {
        Self(self.0 + offset as u64)
    }
}

bitflags::bitflags! {
    /// Page table entry flags (x86_64 PTE bit layout).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        const PRESENT     = 1 << 0;
        const WRITABLE    = 1 << 1;
        const USER        = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE    = 1 << 4;
        const ACCESSED    = 1 << 5;
        const DIRTY       = 1 << 6;
        const HUGE        = 1 << 7;
        const GLOBAL      = 1 << 8;
        const NO_EXECUTE  = 1 << 63;
    }
}

impl PageFlags {
    pub const fn kernel_rw() -> Self {
        Self::from_bits_truncate(Self::PRESENT.bits() | Self::WRITABLE.bits())
    }

    pub const fn user_rw() -> Self {
        Self::from_bits_truncate(
            Self::PRESENT.bits() | Self::WRITABLE.bits() | Self::USER.bits(),
        )
    }

    pub const fn user_ro() -> Self {
        Self::from_bits_truncate(Self::PRESENT.bits() | Self::USER.bits())
    }
}

/// Global physical frame allocator, seeded once from the bootloader's
/// memory map in [`init`].
pub static FRAME_ALLOCATOR: Once<FrameAllocator> = Once::new();

pub fn frame_allocator() -> &'static FrameAllocator {
    FRAME_ALLOCATOR
        .get()
        .expect("mm::init must run before the frame allocator is used")
}

/// Brings up memory management from the bootloader's memory map.
///
/// `usable_base`/`usable_frames` describe the largest contiguous usable
/// region reported by the firmware; `reserved` is a list of
/// `(start_frame, frame_count)` ranges (kernel image, boot page tables,
/// the frame allocator's own bitmap) to mark unavailable up front.
pub fn init(
    usable_base: FrameNumber,
    usable_frames: usize,
    reserved: &[(FrameNumber, usize)],
) -> KernelResult<()> {
    let allocator = FrameAllocator::new(usable_base, usable_frames);
    for &(start, len) in reserved {
        allocator.reserve(start, len);
    }
    FRAME_ALLOCATOR.call_once(|| allocator);

    page_table::init()?;
    heap::init()?;

    log::info!(
        "mm online: {} frames free of {}",
        frame_allocator().free_frames(),
        frame_allocator().total_frames()
    );
    Ok(())
}

/// Translates a physical address to its direct-map virtual address. Used by
/// MMIO-adjacent code (APIC, xHCI) once the direct map is live.
pub fn phys_to_virt(phys: usize) -> usize {
    (DIRECT_MAP_BASE as usize) + phys
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAllocatorError {
    OutOfMemory,
    InvalidFrame,
    InvalidSize,
}

impl From<FrameAllocatorError> for KernelError {
    fn from(_: FrameAllocatorError) -> Self {
        KernelError::OutOfMemory {
            requested: FRAME_SIZE,
            available: 0,
        }
    }
}
