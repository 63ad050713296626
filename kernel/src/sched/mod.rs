//! Round-robin scheduler.
//!
//! Single CPU, so the "singly-linked circular task list with a cursor"
//! the task list is specified as becomes a plain `Vec<Arc<Task>>` plus a
//! cursor index — functionally the same traversal, without the unsafe
//! pointer plumbing a real circular list needs. Idle and the task that
//! brought up the kernel are both sentinels always present at index 0.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

pub mod task;

pub use task::{Privilege, Task, TaskId, TaskState, WaitChannel};

/// Timer ticks (at 100 Hz) a task runs before being preempted.
pub const SCHED_SLICE_TICKS: u64 = 10;

static TASKS: Mutex<Vec<Arc<Task>>> = Mutex::new(Vec::new());
static CURRENT_INDEX: Mutex<usize> = Mutex::new(0);
static TICKS_THIS_SLICE: AtomicU64 = AtomicU64::new(0);

/// Brings up the scheduler with a single idle/bootstrap task representing
/// the execution context already running (the one that called `init`).
/// Its `kernel_rsp` is meaningless until the first switch away from it,
/// at which point `switch_to` fills it in.
pub fn init() {
    let idle = Arc::new(Task::new_kernel(0));
    TASKS.lock().push(idle);
    *CURRENT_INDEX.lock() = 0;
    log::info!("scheduler online: 1 task (idle)");
}

/// Registers an already-constructed task and makes it eligible to run.
pub fn spawn(task: Task) -> TaskId {
    let task = Arc::new(task);
    let id = task.id;
    TASKS.lock().push(task);
    id
}

pub fn current_task() -> Arc<Task> {
    let tasks = TASKS.lock();
    let idx = *CURRENT_INDEX.lock();
    tasks[idx].clone()
}

pub fn find_task(id: TaskId) -> Option<Arc<Task>> {
    TASKS.lock().iter().find(|t| t.id == id).cloned()
}

pub fn children_of(parent: TaskId) -> Vec<Arc<Task>> {
    TASKS
        .lock()
        .iter()
        .filter(|t| t.parent() == Some(parent))
        .cloned()
        .collect()
}

/// Removes a zombie task from the run list once its parent has reaped it.
pub fn reap(id: TaskId) {
    TASKS.lock().retain(|t| t.id != id);
}

/// Picks the next `READY`/`RUNNING` task after the current one, falling
/// back to index 0 (idle) if nothing else is runnable.
fn pick_next(tasks: &[Arc<Task>], current: usize) -> usize {
    let len = tasks.len();
    for offset in 1..=len {
        let idx = (current + offset) % len;
        if tasks[idx].is_runnable() {
            return idx;
        }
    }
    current
}

/// Called from the timer interrupt. Decrements the running task's slice
/// and, once exhausted, switches to the next runnable task.
pub fn timer_tick() {
    if TICKS_THIS_SLICE.fetch_add(1, Ordering::Relaxed) + 1 >= SCHED_SLICE_TICKS {
        TICKS_THIS_SLICE.store(0, Ordering::Relaxed);
        reschedule();
    }
}

/// Voluntarily gives up the remainder of the current time slice.
pub fn sched_yield() {
    TICKS_THIS_SLICE.store(0, Ordering::Relaxed);
    reschedule();
}

/// Parks the current task on `channel` and yields the CPU. Returns once
/// some other task has called [`wake_channel`] with a matching channel (or,
/// with nothing else runnable, immediately falls through on the idle task).
/// Callers are responsible for re-checking the condition they blocked for
/// and for checking `signal_pending` before parking again, since a wake can
/// be spurious or racing with a delivered signal.
pub fn block_on(channel: WaitChannel) {
    let current = current_task();
    *current.wait_channel.lock() = channel;
    current.set_state(TaskState::Blocked);
    reschedule();
}

/// Wakes every task blocked on `channel`, making it `Ready` again. Used by
/// a pipe/tty write (or close) to rouse a reader parked in [`block_on`].
pub fn wake_channel(channel: WaitChannel) {
    for task in TASKS.lock().iter() {
        if task.state() == TaskState::Blocked && *task.wait_channel.lock() == channel {
            *task.wait_channel.lock() = WaitChannel::None;
            task.set_state(TaskState::Ready);
        }
    }
}

/// Switches away from the current task if a different one is runnable.
fn reschedule() {
    let tasks = TASKS.lock();
    if tasks.is_empty() {
        return;
    }
    let mut current_idx = CURRENT_INDEX.lock();
    let next_idx = pick_next(&tasks, *current_idx);
    if next_idx == *current_idx {
        return;
    }

    let prev = tasks[*current_idx].clone();
    let next = tasks[next_idx].clone();
    *current_idx = next_idx;
    drop(current_idx);
    drop(tasks);

    if prev.state() == TaskState::Running {
        prev.set_state(TaskState::Ready);
    }
    next.set_state(TaskState::Running);

    crate::arch::x86_64::gdt::set_kernel_stack(next.kernel_stack_top);
    crate::arch::x86_64::syscall::set_kernel_stack_for_syscall(next.kernel_stack_top);
    if let Some(pml4) = next.address_space {
        crate::arch::x86_64::mmu::write_cr3(pml4);
        crate::mm::page_table::set_active(pml4);
    }

    let prev_slot = prev.kernel_rsp.get();
    let next_rsp = unsafe { *next.kernel_rsp.get() };
    // SAFETY: `prev` is the task currently running on this CPU (its
    // `kernel_rsp` slot is not being written concurrently, since nothing
    // else touches another task's stack), and `next_rsp` was previously
    // saved by this same function or built by
    // `build_initial_user_stack` for a task that is not running anywhere
    // else.
    unsafe {
        crate::arch::x86_64::context::switch_to(prev_slot, next_rsp);
    }
}

/// Ends the current task's execution in response to an unhandled fault,
/// delivering `signal` to it first (recorded for `wait4` to report) and
/// marking it a zombie before yielding the CPU for good.
pub fn terminate_current(signal: u32) -> ! {
    let current = current_task();
    current.exit_status.store(-(signal as i32), Ordering::SeqCst);
    current.set_state(TaskState::Zombie);
    log::warn!("task {} terminated by signal {}", current.id, signal);
    loop {
        reschedule();
    }
}

/// Ends the current task normally with `status` (as passed to `exit`/
/// `exit_group`), reparenting any children to task 1 and raising `SIGCHLD`
/// on the parent so a blocked `wait4` has a reason to wake besides polling.
pub fn exit_current(status: i32) -> ! {
    let current = current_task();
    current.exit_status.store(status, Ordering::SeqCst);
    current.set_state(TaskState::Zombie);
    for child in children_of(current.id) {
        child.set_parent(Some(INIT_TASK_ID));
    }
    if let Some(parent_id) = current.parent() {
        if let Some(parent) = find_task(parent_id) {
            parent.signal.raise(crate::process::signal::SIGCHLD);
        }
    }
    loop {
        reschedule();
    }
}

/// The first task ever created (the one `init()` wraps around the boot
/// context). Orphaned children are reparented to it, mirroring init's role
/// in a POSIX process tree.
pub const INIT_TASK_ID: TaskId = TaskId(1);

pub fn run() -> ! {
    loop {
        crate::arch::x86_64::idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_next_skips_non_runnable() {
        let idle = Arc::new(Task::new_kernel(0));
        let blocked = Arc::new(Task::new_kernel(0));
        blocked.set_state(TaskState::Blocked);
        let ready = Arc::new(Task::new_kernel(0));
        let tasks = alloc::vec![idle, blocked, ready];
        assert_eq!(pick_next(&tasks, 0), 2);
    }

    #[test]
    fn pick_next_falls_back_to_current_when_alone() {
        let idle = Arc::new(Task::new_kernel(0));
        let tasks = alloc::vec![idle];
        assert_eq!(pick_next(&tasks, 0), 0);
    }
}
