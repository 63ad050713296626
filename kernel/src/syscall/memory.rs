//! Virtual memory syscalls: `mmap`/`munmap`/`brk`.
//!
//! Anonymous mappings only: this kernel has no page cache to back a
//! file-mapped `mmap`, so every mapping is treated as `MAP_ANONYMOUS`
//! regardless of the flags a caller passes. Every mapping is demand-paged
//! up front (no lazy fault-in); `mmap` itself just reserves the range at
//! the task's next free slot and maps it immediately.

use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use crate::error::{KernelError, KernelResult};
use crate::mm::{frame_allocator, page_table, PageFlags, VirtualAddress, FRAME_SIZE};
use crate::sched::Task;

pub const PROT_WRITE: u64 = 0x2;
pub const PROT_EXEC: u64 = 0x4;

fn page_align_up(len: u64) -> u64 {
    (len + FRAME_SIZE as u64 - 1) & !(FRAME_SIZE as u64 - 1)
}

/// `mmap(addr, length, prot, flags, fd, offset)`. `addr` is ignored
/// (treated as a hint only); every mapping is placed at the task's next
/// free slot above its mmap base.
pub fn sys_mmap(current: &Arc<Task>, _addr: u64, length: u64, prot: u64, _flags: u64) -> KernelResult<i64> {
    let l4 = current.address_space.ok_or(KernelError::InvalidState {
        expected: "user task",
        actual: "kernel task",
    })?;
    if length == 0 {
        return Err(KernelError::InvalidArgument { name: "length", value: "mmap" });
    }

    let len = page_align_up(length);
    let base = current.mmap_next.fetch_add(len, Ordering::SeqCst);

    let mut flags = PageFlags::PRESENT | PageFlags::USER;
    if prot & PROT_WRITE != 0 {
        flags |= PageFlags::WRITABLE;
    }
    if prot & PROT_EXEC == 0 {
        flags |= PageFlags::NO_EXECUTE;
    }

    let mut page = base;
    while page < base + len {
        let frame = frame_allocator().alloc()?;
        page_table::map_page(l4, VirtualAddress::new(page), frame, flags)?;
        page += FRAME_SIZE as u64;
    }
    Ok(base as i64)
}

pub fn sys_munmap(current: &Arc<Task>, addr: u64, length: u64) -> KernelResult<i64> {
    let l4 = current.address_space.ok_or(KernelError::InvalidState {
        expected: "user task",
        actual: "kernel task",
    })?;
    let len = page_align_up(length);
    let mut page = addr;
    while page < addr + len {
        if let Ok(frame) = page_table::unmap_page(l4, VirtualAddress::new(page)) {
            frame_allocator().free(frame)?;
        }
        page += FRAME_SIZE as u64;
    }
    Ok(0)
}

/// `brk(addr)`: grows or shrinks the heap to end at `addr`, mapping or
/// unmapping whole pages as needed. `addr == 0` just reports the current
/// break, matching glibc's convention.
pub fn sys_brk(current: &Arc<Task>, addr: u64) -> KernelResult<i64> {
    let l4 = current.address_space.ok_or(KernelError::InvalidState {
        expected: "user task",
        actual: "kernel task",
    })?;
    let current_break = current.program_break.load(Ordering::SeqCst);
    if addr == 0 {
        return Ok(current_break as i64);
    }

    let old_top = (current_break + FRAME_SIZE as u64 - 1) & !(FRAME_SIZE as u64 - 1);
    let new_top = (addr + FRAME_SIZE as u64 - 1) & !(FRAME_SIZE as u64 - 1);

    if new_top > old_top {
        let mut page = old_top;
        while page < new_top {
            let frame = frame_allocator().alloc()?;
            page_table::map_page(l4, VirtualAddress::new(page), frame, PageFlags::user_rw())?;
            page += FRAME_SIZE as u64;
        }
    } else if new_top < old_top {
        let mut page = new_top;
        while page < old_top {
            if let Ok(frame) = page_table::unmap_page(l4, VirtualAddress::new(page)) {
                frame_allocator().free(frame)?;
            }
            page += FRAME_SIZE as u64;
        }
    }

    current.program_break.store(addr, Ordering::SeqCst);
    Ok(addr as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_align_rounds_up_to_frame_size() {
        assert_eq!(page_align_up(1), FRAME_SIZE as u64);
        assert_eq!(page_align_up(FRAME_SIZE as u64), FRAME_SIZE as u64);
        assert_eq!(page_align_up(FRAME_SIZE as u64 + 1), FRAME_SIZE as u64 * 2);
    }
}
