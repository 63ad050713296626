//! Task control block.
//!
//! There is no separate process/thread split: a `Task` is the unit the
//! scheduler runs, whether it owns its own address space (a user task) or
//! shares the kernel's (a kernel task, including the idle task).

use alloc::sync::Arc;
use core::sync::atomic::{AtomicI32, AtomicU64, Ordering};

use spin::Mutex;

use crate::fs::FileTable;
use crate::mm::PhysicalAddress;
use crate::process::signal::SignalState;

/// Numeric task identifier, shared by the pid/tid/pgid namespaces the way
/// a single-threaded process model collapses them into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl core::fmt::Display for TaskId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

pub fn alloc_task_id() -> TaskId {
    TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Kernel,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Blocked,
    Stopped,
    Zombie,
}

/// The raw register set saved on syscall entry (see
/// `arch::x86_64::syscall::SyscallFrame`), kept here so `rt_sigreturn` and
/// `fork` can inspect or rewrite the interrupted user context without a
/// second copy of the layout.
pub type SavedSyscallFrame = crate::arch::x86_64::syscall::SyscallFrame;

/// What a task is blocked on, for `wait4` and pipe/tty reads to wake the
/// right sleeper instead of every blocked task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitChannel {
    None,
    ChildExit,
    Pipe,
    Tty,
}

pub struct Task {
    pub id: TaskId,
    pub parent: Mutex<Option<TaskId>>,
    pub pgid: TaskId,
    pub privilege: Privilege,
    pub state: Mutex<TaskState>,

    /// Saved kernel stack pointer; read/written only by
    /// `arch::x86_64::context::switch_to`.
    pub kernel_rsp: core::cell::UnsafeCell<u64>,
    /// Top of this task's kernel stack, loaded into the TSS whenever this
    /// task becomes current.
    pub kernel_stack_top: u64,

    /// Root of this task's page tables; `None` for kernel tasks, which run
    /// on the tables built at boot.
    pub address_space: Option<PhysicalAddress>,
    pub user_stack_top: u64,
    pub user_stack_bottom: u64,
    /// Bump pointer for `brk`.
    pub program_break: AtomicU64,
    /// Bump pointer for anonymous `mmap` without a fixed hint.
    pub mmap_next: AtomicU64,

    pub files: Arc<FileTable>,
    pub signal: SignalState,
    pub syscall_frame: Mutex<Option<SavedSyscallFrame>>,

    pub exit_status: AtomicI32,
    pub wait_channel: Mutex<WaitChannel>,
}

/// Base of the per-task anonymous mmap region, well below the stack and
/// above any ELF-loaded image.
pub const USER_MMAP_BASE: u64 = 0x0000_5555_0000_0000;

impl Task {
    /// Builds a kernel task (idle, or any other kernel-mode worker) that
    /// shares the boot page tables and has no user stack.
    pub fn new_kernel(kernel_stack_top: u64) -> Self {
        Self {
            id: alloc_task_id(),
            parent: Mutex::new(None),
            pgid: TaskId(0),
            privilege: Privilege::Kernel,
            state: Mutex::new(TaskState::Ready),
            kernel_rsp: core::cell::UnsafeCell::new(kernel_stack_top),
            kernel_stack_top,
            address_space: None,
            user_stack_top: 0,
            user_stack_bottom: 0,
            program_break: AtomicU64::new(0),
            mmap_next: AtomicU64::new(USER_MMAP_BASE),
            files: Arc::new(FileTable::new()),
            signal: SignalState::new(),
            syscall_frame: Mutex::new(None),
            exit_status: AtomicI32::new(0),
            wait_channel: Mutex::new(WaitChannel::None),
        }
    }

    /// Builds a new user task whose first context switch lands at `entry`
    /// in ring 3, per `arch::x86_64::context::build_initial_user_stack`.
    #[allow(clippy::too_many_arguments)]
    pub fn new_user(
        parent: TaskId,
        address_space: PhysicalAddress,
        entry: u64,
        kernel_stack_top: u64,
        user_stack_top: u64,
        user_stack_bottom: u64,
        files: Arc<FileTable>,
    ) -> Self {
        let id = alloc_task_id();
        // SAFETY: `kernel_stack_top` is the top of a freshly allocated,
        // exclusively owned kernel stack for this task.
        let kernel_rsp = unsafe {
            crate::arch::x86_64::context::build_initial_user_stack(kernel_stack_top, entry, user_stack_top)
        };
        Self {
            id,
            parent: Mutex::new(Some(parent)),
            pgid: parent,
            privilege: Privilege::User,
            state: Mutex::new(TaskState::Ready),
            kernel_rsp: core::cell::UnsafeCell::new(kernel_rsp),
            kernel_stack_top,
            address_space: Some(address_space),
            user_stack_top,
            user_stack_bottom,
            program_break: AtomicU64::new(0),
            mmap_next: AtomicU64::new(USER_MMAP_BASE),
            files,
            signal: SignalState::new(),
            syscall_frame: Mutex::new(None),
            exit_status: AtomicI32::new(0),
            wait_channel: Mutex::new(WaitChannel::None),
        }
    }

    /// Builds the child side of a `fork()`: same address space layout as
    /// the parent at the moment of the call, but resuming directly at the
    /// parent's post-`SYSCALL` `RIP`/`RSP` with `RAX` forced to 0 instead of
    /// entering fresh at an ELF entry point.
    #[allow(clippy::too_many_arguments)]
    pub fn new_forked(
        parent: TaskId,
        address_space: PhysicalAddress,
        resume_rip: u64,
        kernel_stack_top: u64,
        user_stack_top: u64,
        user_stack_bottom: u64,
        files: Arc<FileTable>,
        program_break: u64,
        mmap_next: u64,
    ) -> Self {
        let id = alloc_task_id();
        // SAFETY: `kernel_stack_top` is the top of a freshly allocated,
        // exclusively owned kernel stack for this task.
        let kernel_rsp = unsafe {
            crate::arch::x86_64::context::build_forked_user_stack(kernel_stack_top, resume_rip, user_stack_top)
        };
        Self {
            id,
            parent: Mutex::new(Some(parent)),
            pgid: parent,
            privilege: Privilege::User,
            state: Mutex::new(TaskState::Ready),
            kernel_rsp: core::cell::UnsafeCell::new(kernel_rsp),
            kernel_stack_top,
            address_space: Some(address_space),
            user_stack_top,
            user_stack_bottom,
            program_break: AtomicU64::new(program_break),
            mmap_next: AtomicU64::new(mmap_next),
            files,
            signal: SignalState::new(),
            syscall_frame: Mutex::new(None),
            exit_status: AtomicI32::new(0),
            wait_channel: Mutex::new(WaitChannel::None),
        }
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TaskState) {
        *self.state.lock() = state;
    }

    pub fn is_runnable(&self) -> bool {
        matches!(self.state(), TaskState::Ready | TaskState::Running)
    }

    pub fn parent(&self) -> Option<TaskId> {
        *self.parent.lock()
    }

    pub fn set_parent(&self, parent: Option<TaskId>) {
        *self.parent.lock() = parent;
    }
}

// SAFETY: `kernel_rsp` is only ever touched by `switch_to`, which the
// scheduler calls with exactly one task as "outgoing" and one as
// "incoming" at a time; there is no concurrent access to the same cell
// across the single CPU this kernel runs on.
unsafe impl Send for Task {}
unsafe impl Sync for Task {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_task_starts_ready() {
        let t = Task::new_kernel(0x1000);
        assert_eq!(t.state(), TaskState::Ready);
        assert!(t.is_runnable());
    }

    #[test]
    fn task_ids_are_unique() {
        let a = alloc_task_id();
        let b = alloc_task_id();
        assert_ne!(a, b);
    }
}
