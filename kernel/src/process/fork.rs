//! `fork()`: duplicates the calling task into a new child that resumes at
//! the same point with a return value of 0.
//!
//! Address-space duplication (`mm::page_table::clone_user_mappings`) is
//! copy-on-write: both tasks share the parent's frames read-only until one
//! of them writes, at which point `mm::page_fault::resolve_cow` splits them
//! apart.

use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use crate::arch::x86_64::mmu;
use crate::error::{KernelError, KernelResult};
use crate::mm::heap::kalloc;
use crate::mm::page_table;
use crate::process::KERNEL_STACK_SIZE;
use crate::sched::{self, Task, TaskId};

/// Duplicates `current`'s address space, file table and register state into
/// a new task, returning the child's id to the parent. The child itself
/// observes this call returning 0, the first time the scheduler runs it.
pub fn fork(current: &Arc<Task>) -> KernelResult<TaskId> {
    let parent_l4 = current.address_space.ok_or(KernelError::InvalidState {
        expected: "user task",
        actual: "kernel task",
    })?;

    let (resume_rip, user_rsp) = {
        let frame = current.syscall_frame.lock();
        let frame = frame.as_ref().ok_or(KernelError::InvalidState {
            expected: "task inside a syscall",
            actual: "no saved syscall frame",
        })?;
        (frame.rip, frame.user_rsp)
    };

    let child_l4 = mmu::new_user_space();
    page_table::clone_user_mappings(parent_l4, child_l4)?;

    let stack = kalloc(KERNEL_STACK_SIZE, 16)?;
    // SAFETY: `stack` is a fresh, exclusively owned allocation of
    // `KERNEL_STACK_SIZE` bytes; the kernel stack grows down from its top.
    let kernel_stack_top = unsafe { stack.as_ptr().add(KERNEL_STACK_SIZE) as u64 };

    let child = Task::new_forked(
        current.id,
        child_l4,
        resume_rip,
        kernel_stack_top,
        user_rsp,
        current.user_stack_bottom,
        Arc::new(current.files.clone_for_fork()),
        current.program_break.load(Ordering::SeqCst),
        current.mmap_next.load(Ordering::SeqCst),
    );

    Ok(sched::spawn(child))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_rejects_kernel_task() {
        let kernel_task = Arc::new(Task::new_kernel(0x1000));
        assert!(fork(&kernel_task).is_err());
    }
}
