//! `wait4` semantics.
//!
//! No separate wait queue: since the scheduler is a simple round-robin
//! list, a blocking wait just sets `WaitChannel::ChildExit` and repeatedly
//! yields until a child becomes a zombie, rather than maintaining a
//! parallel wake-up registry.

use crate::error::KernelError;
use crate::sched::{self, TaskId, TaskState};

/// Options controlling `wait4` behavior, modeled after POSIX flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitOptions {
    flags: u32,
}

impl WaitOptions {
    pub const WNOHANG: u32 = 1;
    pub const WUNTRACED: u32 = 2;
    pub const WCONTINUED: u32 = 8;

    pub fn from_flags(flags: u32) -> Self {
        Self { flags }
    }

    pub fn is_nohang(&self) -> bool {
        self.flags & Self::WNOHANG != 0
    }

    pub fn is_untraced(&self) -> bool {
        self.flags & Self::WUNTRACED != 0
    }

    pub fn is_continued(&self) -> bool {
        self.flags & Self::WCONTINUED != 0
    }
}

/// Status returned by `wait4` describing how a child changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Exited(i32),
    Signaled(i32),
    Stopped(i32),
    Continued,
}

impl WaitStatus {
    /// Encode the status as a raw `i32` matching POSIX `wstatus` layout.
    pub fn to_raw(self) -> i32 {
        match self {
            Self::Exited(code) => (code & 0xFF) << 8,
            Self::Signaled(sig) => sig & 0x7F,
            Self::Stopped(sig) => 0x7F | (sig << 8),
            Self::Continued => 0xFFFF_u16 as i32,
        }
    }
}

/// `wait4(pid, options)`: `pid > 0` waits for that specific child, any
/// other value waits for any child. Returns `Ok(None)` for the
/// `WNOHANG`-no-zombie-yet case (the syscall layer reports that as pid 0),
/// `Err(KernelError::NoChildren)` if the caller has no matching children at
/// all.
pub fn wait4(current: TaskId, pid: i64, options: WaitOptions) -> Result<Option<(TaskId, WaitStatus)>, KernelError> {
    let target = if pid > 0 { Some(TaskId(pid as u64)) } else { None };

    loop {
        let children = sched::children_of(current);
        if children.is_empty() {
            return Err(KernelError::NoSuchChild);
        }
        if let Some(target) = target {
            if !children.iter().any(|c| c.id == target) {
                return Err(KernelError::NoSuchChild);
            }
        }

        for child in &children {
            if let Some(target) = target {
                if child.id != target {
                    continue;
                }
            }
            if child.state() == TaskState::Zombie {
                let raw = child.exit_status.load(core::sync::atomic::Ordering::SeqCst);
                let status = if raw < 0 { WaitStatus::Signaled(-raw) } else { WaitStatus::Exited(raw) };
                let id = child.id;
                sched::reap(id);
                return Ok(Some((id, status)));
            }
            if options.is_untraced() && child.state() == TaskState::Stopped {
                return Ok(Some((child.id, WaitStatus::Stopped(crate::process::signal::SIGSTOP as i32))));
            }
        }

        if options.is_nohang() {
            return Ok(None);
        }

        sched::sched_yield();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_options_default() {
        let opts = WaitOptions::default();
        assert!(!opts.is_nohang());
        assert!(!opts.is_untraced());
        assert!(!opts.is_continued());
    }

    #[test]
    fn wait_options_combined() {
        let opts = WaitOptions::from_flags(WaitOptions::WNOHANG | WaitOptions::WUNTRACED);
        assert!(opts.is_nohang());
        assert!(opts.is_untraced());
        assert!(!opts.is_continued());
    }

    #[test]
    fn wait_status_exited_encoding() {
        assert_eq!(WaitStatus::Exited(42).to_raw(), 42 << 8);
    }

    #[test]
    fn wait_status_signaled_encoding() {
        assert_eq!(WaitStatus::Signaled(11).to_raw(), 11);
    }

    #[test]
    fn wait_status_stopped_encoding() {
        assert_eq!(WaitStatus::Stopped(19).to_raw(), 0x7F | (19 << 8));
    }

    #[test]
    fn wait_status_continued_encoding() {
        assert_eq!(WaitStatus::Continued.to_raw(), 0xFFFF_u16 as i32);
    }
}
