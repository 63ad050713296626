//! Process termination: `exit`/`exit_group`, fatal-signal termination, and
//! `kill()`'s signal-delivery side (everything that isn't `wait4`, which
//! lives in `wait.rs`).

use alloc::sync::Arc;

use crate::arch::x86_64::syscall::SyscallFrame;
use crate::error::{KernelError, KernelResult};
use crate::process::signal::{self, Disposition, SignalState};
use crate::sched::{self, Task, TaskId, TaskState};

/// `exit`/`exit_group(status)`: never returns. Tears down the task's
/// address space (if it owned one) before handing off to the scheduler,
/// which marks it a zombie and reparents its children.
pub fn exit(current: &Arc<Task>, status: i32) -> ! {
    release_address_space(current);
    sched::exit_current(status)
}

/// Ends `current` in response to an unhandled fault, mapping `signal` into
/// the POSIX `WIFSIGNALED` exit status a waiting parent observes.
pub fn exit_by_signal(current: &Arc<Task>, signal: u32) -> ! {
    release_address_space(current);
    sched::terminate_current(signal)
}

fn release_address_space(current: &Task) {
    if let Some(l4) = current.address_space {
        if let Err(e) = crate::mm::page_table::destroy_address_space(l4) {
            log::warn!("task {} leaked address space frames on exit: {:?}", current.id, e);
        }
    }
    current.files.close_all();
}

/// `kill(pid, signo)`: queues `signo` on the target task, taking the
/// uncatchable signals' default action immediately rather than waiting for
/// the target to next leave the kernel.
pub fn kill(target: TaskId, signo: u32) -> KernelResult<()> {
    if signo == 0 {
        return if sched::find_task(target).is_some() {
            Ok(())
        } else {
            Err(KernelError::ProcessNotFound { pid: target.0 })
        };
    }
    let task = sched::find_task(target).ok_or(KernelError::ProcessNotFound { pid: target.0 })?;

    match signo {
        signal::SIGKILL => {
            task.exit_status.store(-(signal::SIGKILL as i32), core::sync::atomic::Ordering::SeqCst);
            task.set_state(TaskState::Zombie);
        }
        signal::SIGSTOP => {
            task.set_state(TaskState::Stopped);
        }
        signal::SIGCONT => {
            if task.state() == TaskState::Stopped {
                task.set_state(TaskState::Ready);
            }
            task.signal.raise(signo);
        }
        _ => task.signal.raise(signo),
    }
    Ok(())
}

/// Delivers whatever signal `state` has queued for the current task. A
/// `Default` disposition whose default action terminates ends the task
/// immediately; a caught `Handler` disposition redirects `frame` into it via
/// [`signal::signal_setup_frame`] so the handler runs on the way back to
/// user mode. `Ignore` and non-terminating defaults just drop the signal.
/// Called before `SYSRET` so a signal that became deliverable while the
/// task was in the kernel takes effect without it having to re-enter.
///
/// `interrupted_syscall` is `Some(nr)` when the syscall the task was just in
/// returned `-EINTR`; if the signal being delivered is caught with
/// `SA_RESTART`, `frame` is rewound to reissue that syscall once the handler
/// returns instead of letting `-EINTR` reach userspace.
pub fn deliver_pending(
    current: &Arc<Task>,
    state: &SignalState,
    frame: &mut SyscallFrame,
    interrupted_syscall: Option<u64>,
) {
    if let Some(signo) = state.next_deliverable() {
        match state.disposition(signo) {
            Disposition::Default if signal::default_is_terminal(signo) => exit_by_signal(current, signo),
            Disposition::Default | Disposition::Ignore => {}
            Disposition::Handler(action) => {
                if let Some(nr) = interrupted_syscall {
                    if action.flags & signal::SA_RESTART != 0 {
                        // Rewind past the two-byte `syscall` instruction and
                        // restore the syscall number into rax, so that once
                        // the handler returns via `rt_sigreturn`, execution
                        // resumes on the `syscall` instruction itself and
                        // re-enters the kernel with the original call.
                        frame.rip = frame.rip.wrapping_sub(2);
                        frame.rax = nr;
                    }
                }
                if let Err(e) = signal::signal_setup_frame(current, state, frame, signo, action) {
                    log::warn!("task {} failed to dispatch signal {}: {:?}", current.id, signo, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_signal_zero_checks_existence() {
        let task = Task::new_kernel(0x1000);
        let id = task.id;
        sched::spawn(task);
        assert!(kill(id, 0).is_ok());
        assert!(kill(TaskId(999_999), 0).is_err());
    }
}
