//! `execve()`: replaces the calling task's program image in place.
//!
//! The task keeps its pid, kernel stack and address-space root; only the
//! root's contents change. This is what lets `Task::address_space`/
//! `user_stack_top`/`user_stack_bottom` stay plain fields instead of
//! interior-mutable ones everywhere else: every user task is given the
//! same fixed stack region at creation, and `execve` only ever rebuilds
//! what's mapped underneath it.

use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use crate::elf::{ElfLoader, read_elf_file};
use crate::error::{KernelError, KernelResult};
use crate::mm::{frame_allocator, page_table, PageFlags, VirtualAddress, FRAME_SIZE};
use crate::process::{USER_STACK_BOTTOM, USER_STACK_TOP};
use crate::sched::Task;

/// Loads the ELF64 executable at `path` into `current`'s address space and
/// jumps into it, closing any close-on-exec descriptors first. Never
/// returns on success, since the caller's own call stack (including this
/// function's frame) belongs to the program image being replaced.
pub fn execve(current: &Arc<Task>, path: &str) -> KernelResult<()> {
    let l4 = current.address_space.ok_or(KernelError::InvalidState {
        expected: "user task",
        actual: "kernel task",
    })?;

    let image = read_elf_file(path).map_err(|_| KernelError::ExecFormat)?;
    let loader = ElfLoader::new();

    page_table::clear_user_mappings(l4)?;
    map_fresh_stack(l4)?;
    let loaded = loader.load_into_address_space(&image, l4).map_err(|_| KernelError::ExecFormat)?;

    current.files.close_on_exec();
    current.program_break.store(loaded.initial_break, Ordering::SeqCst);
    current.mmap_next.store(crate::sched::task::USER_MMAP_BASE, Ordering::SeqCst);
    *current.syscall_frame.lock() = None;

    // SAFETY: `current.kernel_stack_top` is this task's own kernel stack,
    // which this call is running on; nothing below the freshly written
    // region at its top is read again once `jump_to_usermode` takes over.
    let new_rsp = unsafe {
        crate::arch::x86_64::context::build_initial_user_stack(
            current.kernel_stack_top,
            loaded.entry_point,
            USER_STACK_TOP,
        )
    };

    // SAFETY: `new_rsp` was just built by `build_initial_user_stack` on
    // this task's own kernel stack.
    unsafe { crate::arch::x86_64::context::jump_to_usermode(new_rsp) }
}

fn map_fresh_stack(l4: crate::mm::PhysicalAddress) -> KernelResult<()> {
    let mut page = USER_STACK_BOTTOM;
    while page < USER_STACK_TOP {
        let frame = frame_allocator().alloc()?;
        // SAFETY: `frame` was just allocated and is not yet mapped
        // anywhere.
        unsafe {
            core::ptr::write_bytes(crate::mm::phys_to_virt(frame.phys_addr() as usize) as *mut u8, 0, FRAME_SIZE);
        }
        page_table::map_page(l4, VirtualAddress::new(page), frame, PageFlags::user_rw())?;
        page += FRAME_SIZE as u64;
    }
    Ok(())
}
