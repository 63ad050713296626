//! Process lifecycle: `fork`, `execve`, `exit`, `wait4` and signal delivery
//! on top of the scheduler's `sched::Task`.
//!
//! There is no separate process/thread split or process table here: a
//! `Task` already carries everything a single-threaded process needs
//! (address space, file table, signal state), so this module is a thin
//! layer of POSIX semantics over `sched`, not a second bookkeeping
//! structure to keep in sync with it.

pub mod exec;
pub mod exit;
pub mod fork;
pub mod signal;
pub mod wait;

/// Size of the kernel stack given to every newly created user task.
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

/// Top of the fixed user stack region every user task is given, regardless
/// of which program image it is currently running. Keeping this fixed
/// means `execve` can rebuild a task's stack in place without touching
/// `Task::user_stack_top`/`user_stack_bottom`, neither of which is
/// interior-mutable.
pub const USER_STACK_TOP: u64 = 0x0000_7fff_ffff_f000;
pub const USER_STACK_SIZE: u64 = 8 * 1024 * 1024;
pub const USER_STACK_BOTTOM: u64 = USER_STACK_TOP - USER_STACK_SIZE;

pub fn init() {
    log::info!("process management online");
}
