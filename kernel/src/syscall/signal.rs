//! POSIX signal syscalls: dispositions, masks, the realtime queue,
//! altstack, `alarm`, and `pause`.
//!
//! Catching and dispatching into a user handler (`signal_setup_frame`,
//! `rt_sigreturn`'s frame restore) lives in
//! [`crate::process::signal`]; this module covers installing and querying
//! dispositions, masks and the altstack, and the two blocking-wait syscalls
//! (`pause`, `rt_sigsuspend`).

use alloc::sync::Arc;
use core::mem::size_of;

use crate::arch::x86_64::syscall::SyscallFrame;
use crate::error::{KernelError, KernelResult};
use crate::mm::user_validation::{copy_from_user, copy_to_user};
use crate::process::signal::{AltStack, Disposition, HandlerAction, IntervalTimer, QueuedSiginfo, TimerKind};
use crate::sched::{self, Task, TaskId};

#[repr(C)]
struct RawSigaction {
    handler: u64,
    flags: u64,
    restorer: u64,
    mask: u64,
}

fn disposition_to_raw(disp: Disposition) -> RawSigaction {
    match disp {
        Disposition::Default => RawSigaction { handler: 0, flags: 0, restorer: 0, mask: 0 },
        Disposition::Ignore => RawSigaction { handler: 1, flags: 0, restorer: 0, mask: 0 },
        Disposition::Handler(action) => {
            RawSigaction { handler: action.addr, flags: action.flags, restorer: action.restorer, mask: action.mask }
        }
    }
}

fn raw_to_disposition(raw: &RawSigaction) -> Disposition {
    match raw.handler {
        0 => Disposition::Default,
        1 => Disposition::Ignore,
        addr => Disposition::Handler(HandlerAction {
            addr,
            flags: raw.flags,
            mask: raw.mask,
            restorer: raw.restorer,
        }),
    }
}

pub fn sys_rt_sigaction(current: &Arc<Task>, signo: u64, act_ptr: u64, oldact_ptr: u64) -> KernelResult<i64> {
    let signo = signo as u32;

    if oldact_ptr != 0 {
        let raw = disposition_to_raw(current.signal.disposition(signo));
        // SAFETY: `raw` is a repr(C) plain-old-data struct; this views it
        // as exactly its own size in bytes for the user copy.
        let bytes =
            unsafe { core::slice::from_raw_parts(&raw as *const RawSigaction as *const u8, size_of::<RawSigaction>()) };
        copy_to_user(oldact_ptr as usize, bytes)?;
    }

    if act_ptr != 0 {
        let mut buf = [0u8; size_of::<RawSigaction>()];
        copy_from_user(&mut buf, act_ptr as usize)?;
        // SAFETY: `buf` holds exactly `size_of::<RawSigaction>()` bytes
        // just copied from user memory into a local, plain-old-data struct.
        let raw: RawSigaction = unsafe { core::ptr::read(buf.as_ptr() as *const RawSigaction) };
        current
            .signal
            .set_disposition(signo, raw_to_disposition(&raw))
            .ok_or(KernelError::InvalidArgument { name: "signo", value: "rt_sigaction" })?;
    }

    Ok(0)
}

const SIG_BLOCK: u64 = 0;
const SIG_UNBLOCK: u64 = 1;
const SIG_SETMASK: u64 = 2;

pub fn sys_rt_sigprocmask(current: &Arc<Task>, how: u64, set_ptr: u64, oldset_ptr: u64) -> KernelResult<i64> {
    let old = current.signal.blocked_mask();
    if oldset_ptr != 0 {
        copy_to_user(oldset_ptr as usize, &old.to_ne_bytes())?;
    }
    if set_ptr != 0 {
        let mut buf = [0u8; 8];
        copy_from_user(&mut buf, set_ptr as usize)?;
        let set = u64::from_ne_bytes(buf);
        let new = match how {
            SIG_BLOCK => old | set,
            SIG_UNBLOCK => old & !set,
            SIG_SETMASK => set,
            _ => return Err(KernelError::InvalidArgument { name: "how", value: "rt_sigprocmask" }),
        };
        current.signal.set_blocked_mask(new);
    }
    Ok(0)
}

pub fn sys_rt_sigpending(current: &Arc<Task>, set_ptr: u64) -> KernelResult<i64> {
    copy_to_user(set_ptr as usize, &current.signal.pending_mask().to_ne_bytes())?;
    Ok(0)
}

/// Blocks until a signal that `mask` doesn't block becomes pending, then
/// restores the previous mask and returns `-EINTR`, matching `pause`'s
/// never-succeeds contract.
pub fn sys_rt_sigsuspend(current: &Arc<Task>, mask_ptr: u64) -> KernelResult<i64> {
    let mut buf = [0u8; 8];
    copy_from_user(&mut buf, mask_ptr as usize)?;
    let new_mask = u64::from_ne_bytes(buf);

    let old_mask = current.signal.blocked_mask();
    current.signal.set_blocked_mask(new_mask);
    while current.signal.pending_mask() & !current.signal.blocked_mask() == 0 {
        sched::sched_yield();
    }
    current.signal.set_blocked_mask(old_mask);
    Err(KernelError::Interrupted)
}

pub fn sys_pause(current: &Arc<Task>) -> KernelResult<i64> {
    while current.signal.pending_mask() & !current.signal.blocked_mask() == 0 {
        sched::sched_yield();
    }
    Err(KernelError::Interrupted)
}

pub fn sys_rt_sigreturn(current: &Arc<Task>, frame: &mut SyscallFrame) -> KernelResult<i64> {
    crate::process::signal::rt_sigreturn(current, frame)
}

#[repr(C)]
struct RawAltStack {
    sp: u64,
    flags: u32,
    _pad: u32,
    size: u64,
}

const SS_DISABLE: u32 = 2;

pub fn sys_sigaltstack(current: &Arc<Task>, ss_ptr: u64, old_ss_ptr: u64) -> KernelResult<i64> {
    if old_ss_ptr != 0 {
        let old = current.signal.altstack();
        let raw = RawAltStack {
            sp: old.sp,
            flags: if old.disabled { SS_DISABLE } else { 0 },
            _pad: 0,
            size: old.size as u64,
        };
        // SAFETY: see sys_rt_sigaction.
        let bytes =
            unsafe { core::slice::from_raw_parts(&raw as *const RawAltStack as *const u8, size_of::<RawAltStack>()) };
        copy_to_user(old_ss_ptr as usize, bytes)?;
    }

    if ss_ptr != 0 {
        let mut buf = [0u8; size_of::<RawAltStack>()];
        copy_from_user(&mut buf, ss_ptr as usize)?;
        // SAFETY: see sys_rt_sigaction.
        let raw: RawAltStack = unsafe { core::ptr::read(buf.as_ptr() as *const RawAltStack) };
        current.signal.set_altstack(AltStack {
            sp: raw.sp,
            size: raw.size as usize,
            disabled: raw.flags & SS_DISABLE != 0,
        });
    }

    Ok(0)
}

pub fn sys_rt_sigqueueinfo(pid: u64, signo: u64, value: u64) -> KernelResult<i64> {
    let target = sched::find_task(TaskId(pid)).ok_or(KernelError::ProcessNotFound { pid })?;
    if !target.signal.queue_rt(QueuedSiginfo { signo: signo as u32, code: 0, value }) {
        return Err(KernelError::ResourceExhausted { resource: "realtime signal queue" });
    }
    Ok(0)
}

/// `alarm(seconds)`: arms (or, if `seconds == 0`, disarms) the real-time
/// interval timer as a one-shot, returning the number of seconds left on
/// any previously armed alarm.
pub fn sys_alarm(current: &Arc<Task>, seconds: u64) -> KernelResult<i64> {
    let old = current.signal.timer(TimerKind::Real);
    let new = if seconds == 0 {
        IntervalTimer::default()
    } else {
        let ns = seconds.saturating_mul(1_000_000_000);
        IntervalTimer { interval_ns: 0, remaining_ns: ns, armed: true }
    };
    current.signal.set_timer(TimerKind::Real, new);
    Ok((old.remaining_ns / 1_000_000_000) as i64)
}

const ITIMER_REAL: u64 = 0;
const ITIMER_VIRTUAL: u64 = 1;
const ITIMER_PROF: u64 = 2;

fn timer_kind_from_which(which: u64) -> KernelResult<TimerKind> {
    match which {
        ITIMER_REAL => Ok(TimerKind::Real),
        ITIMER_VIRTUAL => Ok(TimerKind::Virtual),
        ITIMER_PROF => Ok(TimerKind::Prof),
        _ => Err(KernelError::InvalidArgument { name: "which", value: "setitimer/getitimer" }),
    }
}

#[repr(C)]
struct RawTimeval {
    sec: i64,
    usec: i64,
}

#[repr(C)]
struct RawItimerval {
    interval: RawTimeval,
    value: RawTimeval,
}

fn timeval_to_ns(tv: &RawTimeval) -> u64 {
    (tv.sec.max(0) as u64).saturating_mul(1_000_000_000).saturating_add((tv.usec.max(0) as u64).saturating_mul(1000))
}

fn ns_to_itimerval(interval_ns: u64, value_ns: u64) -> RawItimerval {
    RawItimerval {
        interval: RawTimeval { sec: (interval_ns / 1_000_000_000) as i64, usec: ((interval_ns % 1_000_000_000) / 1000) as i64 },
        value: RawTimeval { sec: (value_ns / 1_000_000_000) as i64, usec: ((value_ns % 1_000_000_000) / 1000) as i64 },
    }
}

/// `setitimer(which, new_value, old_value)`: arms one of the three classic
/// interval timers carried on `current.signal`.
pub fn sys_setitimer(current: &Arc<Task>, which: u64, new_ptr: u64, old_ptr: u64) -> KernelResult<i64> {
    let kind = timer_kind_from_which(which)?;

    let mut buf = [0u8; size_of::<RawItimerval>()];
    copy_from_user(&mut buf, new_ptr as usize)?;
    // SAFETY: `buf` holds exactly `size_of::<RawItimerval>()` bytes just
    // copied from user memory into a local, plain-old-data struct.
    let new: RawItimerval = unsafe { core::ptr::read(buf.as_ptr() as *const RawItimerval) };
    let interval_ns = timeval_to_ns(&new.interval);
    let value_ns = timeval_to_ns(&new.value);
    let old = current.signal.set_timer(kind, IntervalTimer { interval_ns, remaining_ns: value_ns, armed: value_ns > 0 });

    if old_ptr != 0 {
        let raw = ns_to_itimerval(old.interval_ns, old.remaining_ns);
        // SAFETY: see above.
        let bytes =
            unsafe { core::slice::from_raw_parts(&raw as *const RawItimerval as *const u8, size_of::<RawItimerval>()) };
        copy_to_user(old_ptr as usize, bytes)?;
    }
    Ok(0)
}

/// `getitimer(which, curr_value)`.
pub fn sys_getitimer(current: &Arc<Task>, which: u64, curr_ptr: u64) -> KernelResult<i64> {
    let kind = timer_kind_from_which(which)?;
    let t = current.signal.timer(kind);
    let raw = ns_to_itimerval(t.interval_ns, t.remaining_ns);
    // SAFETY: see `sys_setitimer`.
    let bytes = unsafe { core::slice::from_raw_parts(&raw as *const RawItimerval as *const u8, size_of::<RawItimerval>()) };
    copy_to_user(curr_ptr as usize, bytes)?;
    Ok(0)
}
