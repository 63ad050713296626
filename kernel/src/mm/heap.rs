//! Kernel heap.
//!
//! Backed by [`linked_list_allocator`] over a fixed kernel-virtual region,
//! grown one page at a time as the allocator runs low. `kalloc`/`kcalloc`/
//! `kfree` take alignment as an explicit parameter, matching
//! `core::alloc::Layout`, rather than over-allocating and hand-aligning the
//! returned pointer.

use core::alloc::Layout;
use core::ptr::NonNull;

use crate::error::{KernelError, KernelResult};
use crate::mm::{page_table, PageFlags, VirtualAddress};

pub const HEAP_START: usize = 0xFFFF_9000_0000_0000;
pub const HEAP_INITIAL_SIZE: usize = 1024 * 1024;
pub const HEAP_MAX_SIZE: usize = 64 * 1024 * 1024;

/// Maps and initializes the heap region. Called once, after paging is
/// live.
pub fn init() -> KernelResult<()> {
    map_region(HEAP_START, HEAP_INITIAL_SIZE)?;

    #[cfg(target_os = "none")]
    {
        // SAFETY: `HEAP_START..+HEAP_INITIAL_SIZE` was just mapped above
        // and is touched by no other code yet.
        unsafe {
            crate::get_allocator()
                .lock()
                .init(HEAP_START as *mut u8, HEAP_INITIAL_SIZE);
        }
    }

    log::info!(
        "kernel heap mapped at 0x{:x}, {} KiB",
        HEAP_START,
        HEAP_INITIAL_SIZE / 1024
    );
    Ok(())
}

fn map_region(start: usize, len: usize) -> KernelResult<()> {
    let l4 = page_table::active();
    let mut addr = start;
    while addr < start + len {
        let frame = crate::mm::frame_allocator().alloc()?;
        page_table::map_page(
            l4,
            VirtualAddress::new(addr as u64),
            frame,
            PageFlags::kernel_rw() | PageFlags::NO_EXECUTE,
        )?;
        addr += 4096;
    }
    Ok(())
}

/// Grows the heap by one page and hands the new range to the global
/// allocator. Called from the `alloc_error_handler` fallback path, guarded
/// by [`HEAP_MAX_SIZE`].
#[cfg(target_os = "none")]
pub fn grow(current_top: usize) -> KernelResult<()> {
    if current_top + 4096 > HEAP_START + HEAP_MAX_SIZE {
        return Err(KernelError::OutOfMemory {
            requested: 4096,
            available: 0,
        });
    }
    map_region(current_top, 4096)?;
    // SAFETY: the page at `current_top` was just mapped and isn't owned by
    // any existing allocation.
    unsafe {
        crate::get_allocator().lock().extend(4096);
    }
    Ok(())
}

/// Allocates `size` bytes aligned to `align`.
pub fn kalloc(size: usize, align: usize) -> KernelResult<NonNull<u8>> {
    let layout = Layout::from_size_align(size, align).map_err(|_| KernelError::InvalidArgument {
        name: "align",
        value: "not a power of two",
    })?;
    kalloc_layout(layout)
}

pub fn kalloc_layout(layout: Layout) -> KernelResult<NonNull<u8>> {
    #[cfg(target_os = "none")]
    {
        use core::alloc::GlobalAlloc;
        // SAFETY: layout is validated non-zero-sized by the caller
        // contract shared with `alloc::alloc::alloc`.
        let ptr = unsafe { crate::get_allocator().alloc(layout) };
        NonNull::new(ptr).ok_or(KernelError::OutOfMemory {
            requested: layout.size(),
            available: 0,
        })
    }
    #[cfg(not(target_os = "none"))]
    {
        // SAFETY: same contract as above, delegated to the system allocator
        // used by host test builds.
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(KernelError::OutOfMemory {
            requested: layout.size(),
            available: 0,
        })
    }
}

/// Allocates zeroed storage for `nmemb` elements of `size` bytes, aligned
/// to `align`. Checks for multiplication overflow, unlike a bare
/// `kalloc(nmemb * size, align)`.
pub fn kcalloc(nmemb: usize, size: usize, align: usize) -> KernelResult<NonNull<u8>> {
    let total = nmemb.checked_mul(size).ok_or(KernelError::InvalidArgument {
        name: "nmemb*size",
        value: "overflows usize",
    })?;
    let ptr = kalloc(total, align)?;
    // SAFETY: `ptr` was just allocated with exactly `total` bytes available.
    unsafe {
        core::ptr::write_bytes(ptr.as_ptr(), 0, total);
    }
    Ok(ptr)
}

/// Frees a block previously returned by [`kalloc`]/[`kcalloc`]. `layout`
/// must match the one the allocation was made with.
///
/// # Safety
///
/// `ptr` must point to a live allocation made by this module with exactly
/// `layout`, and must not be used again afterward.
pub unsafe fn kfree(ptr: NonNull<u8>, layout: Layout) {
    #[cfg(target_os = "none")]
    {
        use core::alloc::GlobalAlloc;
        // SAFETY: forwarded from the caller's contract.
        unsafe { crate::get_allocator().dealloc(ptr.as_ptr(), layout) };
    }
    #[cfg(not(target_os = "none"))]
    {
        // SAFETY: forwarded from the caller's contract.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kalloc_respects_alignment() {
        let p = kalloc(64, 64).unwrap();
        assert_eq!(p.as_ptr() as usize % 64, 0);
        unsafe { kfree(p, Layout::from_size_align(64, 64).unwrap()) };
    }

    #[test]
    fn kcalloc_zeroes_memory() {
        let p = kcalloc(8, 8, 8).unwrap();
        let slice = unsafe { core::slice::from_raw_parts(p.as_ptr(), 64) };
        assert!(slice.iter().all(|&b| b == 0));
        unsafe { kfree(p, Layout::from_size_align(64, 8).unwrap()) };
    }

    #[test]
    fn kcalloc_rejects_overflow() {
        assert!(kcalloc(usize::MAX, 2, 8).is_err());
    }
}
