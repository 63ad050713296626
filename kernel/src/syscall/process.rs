//! Process lifecycle syscalls: fork, execve, exit, wait4, kill.

use alloc::sync::Arc;

use crate::error::{KernelError, KernelResult};
use crate::mm::user_validation::{copy_to_user, copy_user_cstring};
use crate::process::{exec, exit, wait};
use crate::sched::{Task, TaskId};

pub fn sys_fork(current: &Arc<Task>) -> KernelResult<i64> {
    let child = crate::process::fork::fork(current)?;
    Ok(child.0 as i64)
}

/// `execve(path, argv, envp)`. Argument and environment vectors aren't
/// passed through to the loaded image; see `DESIGN.md`.
pub fn sys_execve(current: &Arc<Task>, path_ptr: u64) -> KernelResult<i64> {
    let path = copy_user_cstring(path_ptr as usize)?;
    exec::execve(current, &path)?;
    // `execve` only returns here on error; success diverges into the new
    // image and never comes back to this stack frame.
    unreachable!("execve returned Ok without transferring control")
}

pub fn sys_exit(current: &Arc<Task>, status: u64) -> KernelResult<i64> {
    exit::exit(current, status as i32)
}

pub fn sys_wait4(current: &Arc<Task>, pid: u64, wstatus_ptr: u64, options: u64) -> KernelResult<i64> {
    let opts = wait::WaitOptions::from_flags(options as u32);
    match wait::wait4(current.id, pid as i64, opts)? {
        Some((child, status)) => {
            if wstatus_ptr != 0 {
                let raw = status.to_raw();
                copy_to_user(wstatus_ptr as usize, &raw.to_ne_bytes())?;
            }
            Ok(child.0 as i64)
        }
        None => Ok(0),
    }
}

/// `kill(pid, sig)`. Process-group targets (`pid <= 0`) aren't modeled,
/// since this kernel has no process-group membership beyond `Task::pgid`
/// assignment at creation; see `DESIGN.md`.
pub fn sys_kill(pid: u64, signo: u64) -> KernelResult<i64> {
    let pid = pid as i64;
    if pid <= 0 {
        return Err(KernelError::NotImplemented { feature: "kill() to a process group" });
    }
    exit::kill(TaskId(pid as u64), signo as u32)?;
    Ok(0)
}
