//! Syscall dispatch.
//!
//! Numbered after the Linux x86-64 table for the syscalls this kernel
//! actually implements, so a userspace binary built against that ABI needs
//! no recompilation to run here. Everything else returns `-ENOSYS` rather
//! than panicking, so a binary that happens to probe an unsupported call
//! doesn't bring the kernel down with it.

pub mod filesystem;
pub mod memory;
pub mod process;
pub mod signal;
pub mod time;

use crate::arch::x86_64::syscall::SyscallFrame;
use crate::error::KernelError;
use crate::sched;

pub const SYS_READ: u64 = 0;
pub const SYS_WRITE: u64 = 1;
pub const SYS_OPEN: u64 = 2;
pub const SYS_CLOSE: u64 = 3;
pub const SYS_STAT: u64 = 4;
pub const SYS_FSTAT: u64 = 5;
pub const SYS_LSEEK: u64 = 8;
pub const SYS_MMAP: u64 = 9;
pub const SYS_MUNMAP: u64 = 11;
pub const SYS_BRK: u64 = 12;
pub const SYS_RT_SIGACTION: u64 = 13;
pub const SYS_RT_SIGPROCMASK: u64 = 14;
pub const SYS_IOCTL: u64 = 16;
pub const SYS_ACCESS: u64 = 21;
pub const SYS_PIPE: u64 = 22;
pub const SYS_SCHED_YIELD: u64 = 24;
pub const SYS_DUP: u64 = 32;
pub const SYS_DUP2: u64 = 33;
pub const SYS_PAUSE: u64 = 34;
pub const SYS_NANOSLEEP: u64 = 35;
pub const SYS_GETITIMER: u64 = 36;
pub const SYS_ALARM: u64 = 37;
pub const SYS_SETITIMER: u64 = 38;
pub const SYS_GETPID: u64 = 39;
pub const SYS_FORK: u64 = 57;
pub const SYS_EXECVE: u64 = 59;
pub const SYS_EXIT: u64 = 60;
pub const SYS_WAIT4: u64 = 61;
pub const SYS_KILL: u64 = 62;
pub const SYS_FCNTL: u64 = 72;
pub const SYS_FSYNC: u64 = 74;
pub const SYS_TRUNCATE: u64 = 76;
pub const SYS_FTRUNCATE: u64 = 77;
pub const SYS_GETCWD: u64 = 79;
pub const SYS_CHDIR: u64 = 80;
pub const SYS_RENAME: u64 = 82;
pub const SYS_MKDIR: u64 = 83;
pub const SYS_RMDIR: u64 = 84;
pub const SYS_UNLINK: u64 = 87;
pub const SYS_CHMOD: u64 = 90;
pub const SYS_CHOWN: u64 = 92;
pub const SYS_GETUID: u64 = 102;
pub const SYS_GETGID: u64 = 104;
pub const SYS_SETUID: u64 = 105;
pub const SYS_SETGID: u64 = 106;
pub const SYS_GETPPID: u64 = 110;
pub const SYS_RT_SIGPENDING: u64 = 127;
pub const SYS_RT_SIGTIMEDWAIT: u64 = 128;
pub const SYS_RT_SIGQUEUEINFO: u64 = 129;
pub const SYS_RT_SIGSUSPEND: u64 = 130;
pub const SYS_SIGALTSTACK: u64 = 131;
pub const SYS_GETHOSTNAME: u64 = 142;
pub const SYS_GETDENTS64: u64 = 217;
pub const SYS_TIMER_CREATE: u64 = 222;
pub const SYS_TIMER_SETTIME: u64 = 223;
pub const SYS_TIMER_GETTIME: u64 = 224;
pub const SYS_TIMER_GETOVERRUN: u64 = 225;
pub const SYS_TIMER_DELETE: u64 = 226;
pub const SYS_CLOCK_GETTIME: u64 = 228;
pub const SYS_CLOCK_GETRES: u64 = 229;
pub const SYS_EXIT_GROUP: u64 = 231;
pub use crate::process::signal::SYS_RT_SIGRETURN;

/// Entered from [`crate::arch::x86_64::syscall::syscall_entry_trampoline`]
/// for every `SYSCALL` instruction. Stashes the raw frame on the current
/// task (so `fork`/`rt_sigreturn` can read or rewrite it), runs the
/// syscall, writes the result back into `RAX`, then lets any signal that
/// became deliverable while the task was in the kernel take effect before
/// `SYSRET`.
pub fn dispatch(frame: &mut SyscallFrame) {
    let current = sched::current_task();
    *current.syscall_frame.lock() = Some(*frame);

    let nr = frame.number();
    let result = handle(&current, nr, frame.args(), frame);
    let interrupted_nr = if result == Err(KernelError::Interrupted) { Some(nr) } else { None };
    frame.set_return(match result {
        Ok(value) => value,
        Err(e) => e.errno() as i64,
    });

    crate::process::exit::deliver_pending(&current, &current.signal, frame, interrupted_nr);
}

fn handle(current: &alloc::sync::Arc<sched::Task>, nr: u64, args: [u64; 6], frame: &mut SyscallFrame) -> Result<i64, KernelError> {
    match nr {
        SYS_READ => filesystem::sys_read(current, args[0], args[1], args[2]),
        SYS_WRITE => filesystem::sys_write(current, args[0], args[1], args[2]),
        SYS_OPEN => filesystem::sys_open(current, args[0], args[1], args[2]),
        SYS_CLOSE => filesystem::sys_close(current, args[0]),
        SYS_LSEEK => filesystem::sys_lseek(current, args[0], args[1], args[2]),
        SYS_STAT | SYS_FSTAT => filesystem::sys_stat(current, args[0], args[1], nr == SYS_FSTAT),
        SYS_PIPE => filesystem::sys_pipe(current, args[0]),
        SYS_DUP => filesystem::sys_dup(current, args[0]),
        SYS_DUP2 => filesystem::sys_dup2(current, args[0], args[1]),
        SYS_TRUNCATE | SYS_FTRUNCATE => filesystem::sys_truncate(current, args[0], args[1], nr == SYS_FTRUNCATE),
        SYS_MKDIR => filesystem::sys_mkdir(args[0]),
        SYS_UNLINK | SYS_RMDIR => filesystem::sys_unlink(args[0]),
        SYS_FSYNC => filesystem::sys_fsync(),
        SYS_ACCESS => filesystem::sys_access(args[0]),

        SYS_MMAP => memory::sys_mmap(current, args[0], args[1], args[2], args[3]),
        SYS_MUNMAP => memory::sys_munmap(current, args[0], args[1]),
        SYS_BRK => memory::sys_brk(current, args[0]),

        SYS_SCHED_YIELD => {
            sched::sched_yield();
            Ok(0)
        }
        SYS_GETPID => Ok(current.id.0 as i64),
        SYS_GETPPID => Ok(current.parent().map(|p| p.0 as i64).unwrap_or(0)),
        SYS_FORK => process::sys_fork(current),
        SYS_EXECVE => process::sys_execve(current, args[0]),
        SYS_EXIT | SYS_EXIT_GROUP => process::sys_exit(current, args[0]),
        SYS_WAIT4 => process::sys_wait4(current, args[0], args[1], args[2]),
        SYS_KILL => process::sys_kill(args[0], args[1]),
        SYS_GETUID | SYS_GETGID | SYS_SETUID | SYS_SETGID => Ok(0),

        SYS_RT_SIGACTION => signal::sys_rt_sigaction(current, args[0], args[1], args[2]),
        SYS_RT_SIGPROCMASK => signal::sys_rt_sigprocmask(current, args[0], args[1], args[2]),
        SYS_RT_SIGPENDING => signal::sys_rt_sigpending(current, args[0]),
        SYS_RT_SIGSUSPEND => signal::sys_rt_sigsuspend(current, args[0]),
        SYS_RT_SIGRETURN => signal::sys_rt_sigreturn(current, frame),
        SYS_SIGALTSTACK => signal::sys_sigaltstack(current, args[0], args[1]),
        SYS_RT_SIGQUEUEINFO => signal::sys_rt_sigqueueinfo(args[0], args[1], args[2]),
        SYS_ALARM => signal::sys_alarm(current, args[0]),
        SYS_SETITIMER => signal::sys_setitimer(current, args[0], args[1], args[2]),
        SYS_GETITIMER => signal::sys_getitimer(current, args[0], args[1]),
        SYS_PAUSE => signal::sys_pause(current),

        SYS_NANOSLEEP => time::sys_nanosleep(args[0]),
        SYS_CLOCK_GETTIME => time::sys_clock_gettime(args[0], args[1]),
        SYS_CLOCK_GETRES => time::sys_clock_getres(args[1]),
        SYS_TIMER_CREATE => time::sys_timer_create(args[0], args[1]),
        SYS_TIMER_SETTIME => time::sys_timer_settime(args[0], args[1], args[2], args[3]),
        SYS_TIMER_GETTIME => time::sys_timer_gettime(args[0], args[1]),
        SYS_TIMER_GETOVERRUN => time::sys_timer_getoverrun(args[0]),
        SYS_TIMER_DELETE => time::sys_timer_delete(args[0]),

        SYS_IOCTL | SYS_FCNTL | SYS_CHDIR | SYS_GETCWD | SYS_RENAME | SYS_CHMOD | SYS_CHOWN
        | SYS_GETDENTS64 | SYS_GETHOSTNAME | SYS_RT_SIGTIMEDWAIT => {
            Err(KernelError::NotImplemented { feature: "extended POSIX surface" })
        }

        _ => Err(KernelError::SyscallError(crate::error::SyscallError::InvalidSyscall { nr: nr as usize })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_syscall_returns_enosys() {
        sched::init();
        let current = sched::current_task();
        let mut frame = SyscallFrame {
            user_rsp: 0,
            rflags: 0,
            rip: 0,
            arg6: 0,
            arg5: 0,
            arg4: 0,
            arg3: 0,
            arg2: 0,
            arg1: 0,
            rax: 0,
        };
        let result = handle(&current, 9999, [0; 6], &mut frame);
        assert_eq!(result.unwrap_err().errno(), -38);
    }
}
