//! Time syscalls: `nanosleep`, `clock_gettime`, `clock_getres`, and the
//! POSIX `timer_create` family.
//!
//! `nanosleep`/`clock_gettime`/`clock_getres` delegate to [`crate::timer`]'s
//! nanosecond monotonic clock; there is no wall-clock-vs-monotonic
//! distinction (`CLOCK_REALTIME` and `CLOCK_MONOTONIC` are treated
//! identically), since this kernel has no RTC-backed wall clock to report
//! instead. `timer_create`/`timer_settime`/`timer_gettime`/
//! `timer_getoverrun`/`timer_delete` are thin ABI marshaling over
//! [`crate::timer`]'s already-ticking `PosixTimer` table.

use core::mem::size_of;

use crate::error::{KernelError, KernelResult};
use crate::mm::user_validation::{copy_from_user, copy_to_user};
use crate::sched;
use crate::timer;

#[repr(C)]
struct RawTimespec {
    sec: i64,
    nsec: i64,
}

fn write_timespec(ptr: u64, ns: u64) -> KernelResult<()> {
    let ts = RawTimespec { sec: (ns / 1_000_000_000) as i64, nsec: (ns % 1_000_000_000) as i64 };
    // SAFETY: `ts` is a repr(C) plain-old-data struct; this views it as
    // exactly its own size in bytes for the user copy.
    let bytes =
        unsafe { core::slice::from_raw_parts(&ts as *const RawTimespec as *const u8, core::mem::size_of::<RawTimespec>()) };
    copy_to_user(ptr as usize, bytes)
}

pub fn sys_nanosleep(req_ptr: u64) -> KernelResult<i64> {
    let mut buf = [0u8; core::mem::size_of::<RawTimespec>()];
    copy_from_user(&mut buf, req_ptr as usize)?;
    // SAFETY: `buf` holds exactly `size_of::<RawTimespec>()` bytes just
    // copied from user memory into a local, plain-old-data struct.
    let req: RawTimespec = unsafe { core::ptr::read(buf.as_ptr() as *const RawTimespec) };
    let ns = (req.sec.max(0) as u64).saturating_mul(1_000_000_000).saturating_add(req.nsec.max(0) as u64);

    let deadline = timer::deadline_after(ns);
    while !timer::has_elapsed(deadline) {
        sched::sched_yield();
    }
    Ok(0)
}

pub fn sys_clock_gettime(_clk_id: u64, ts_ptr: u64) -> KernelResult<i64> {
    write_timespec(ts_ptr, timer::monotonic_ns())?;
    Ok(0)
}

pub fn sys_clock_getres(res_ptr: u64) -> KernelResult<i64> {
    write_timespec(res_ptr, timer::NS_PER_TICK)?;
    Ok(0)
}

/// The fields of `struct sigevent` this kernel reads: the signal number to
/// raise on expiry. Only `SIGEV_SIGNAL` notification is supported; the rest
/// of the real struct's union (thread/tid notification) is never consulted.
#[repr(C)]
struct RawSigevent {
    _value: u64,
    signo: i32,
    _notify: i32,
}

#[repr(C)]
struct RawItimerspec {
    interval: RawTimespec,
    value: RawTimespec,
}

fn read_itimerspec(ptr: u64) -> KernelResult<RawItimerspec> {
    let mut buf = [0u8; size_of::<RawItimerspec>()];
    copy_from_user(&mut buf, ptr as usize)?;
    // SAFETY: `buf` holds exactly `size_of::<RawItimerspec>()` bytes just
    // copied from user memory into a local, plain-old-data struct.
    Ok(unsafe { core::ptr::read(buf.as_ptr() as *const RawItimerspec) })
}

fn write_itimerspec(ptr: u64, interval_ns: u64, value_ns: u64) -> KernelResult<()> {
    let raw = RawItimerspec {
        interval: RawTimespec { sec: (interval_ns / 1_000_000_000) as i64, nsec: (interval_ns % 1_000_000_000) as i64 },
        value: RawTimespec { sec: (value_ns / 1_000_000_000) as i64, nsec: (value_ns % 1_000_000_000) as i64 },
    };
    // SAFETY: see `write_timespec`.
    let bytes =
        unsafe { core::slice::from_raw_parts(&raw as *const RawItimerspec as *const u8, size_of::<RawItimerspec>()) };
    copy_to_user(ptr as usize, bytes)
}

fn timespec_to_ns(ts: &RawTimespec) -> u64 {
    (ts.sec.max(0) as u64).saturating_mul(1_000_000_000).saturating_add(ts.nsec.max(0) as u64)
}

pub fn sys_timer_create(sevp_ptr: u64, timerid_ptr: u64) -> KernelResult<i64> {
    let signo = if sevp_ptr != 0 {
        let mut buf = [0u8; size_of::<RawSigevent>()];
        copy_from_user(&mut buf, sevp_ptr as usize)?;
        // SAFETY: `buf` holds exactly `size_of::<RawSigevent>()` bytes just
        // copied from user memory into a local, plain-old-data struct.
        let raw: RawSigevent = unsafe { core::ptr::read(buf.as_ptr() as *const RawSigevent) };
        raw.signo as u32
    } else {
        crate::process::signal::SIGALRM
    };
    let id = timer::timer_create(signo);
    copy_to_user(timerid_ptr as usize, &id.to_ne_bytes())?;
    Ok(0)
}

pub fn sys_timer_settime(id: u64, _flags: u64, new_ptr: u64, old_ptr: u64) -> KernelResult<i64> {
    let new = read_itimerspec(new_ptr)?;
    let interval_ns = timespec_to_ns(&new.interval);
    let value_ns = timespec_to_ns(&new.value);
    let old = timer::timer_settime(id as u32, interval_ns, value_ns)
        .ok_or(KernelError::InvalidArgument { name: "timerid", value: "timer_settime" })?;
    if old_ptr != 0 {
        write_itimerspec(old_ptr, old.interval_ns, old.remaining_ns)?;
    }
    Ok(0)
}

pub fn sys_timer_gettime(id: u64, curr_ptr: u64) -> KernelResult<i64> {
    let t = timer::timer_gettime(id as u32).ok_or(KernelError::InvalidArgument { name: "timerid", value: "timer_gettime" })?;
    write_itimerspec(curr_ptr, t.interval_ns, t.remaining_ns)?;
    Ok(0)
}

pub fn sys_timer_getoverrun(id: u64) -> KernelResult<i64> {
    let t =
        timer::timer_gettime(id as u32).ok_or(KernelError::InvalidArgument { name: "timerid", value: "timer_getoverrun" })?;
    Ok(t.overrun_count as i64)
}

pub fn sys_timer_delete(id: u64) -> KernelResult<i64> {
    if timer::timer_delete(id as u32) {
        Ok(0)
    } else {
        Err(KernelError::InvalidArgument { name: "timerid", value: "timer_delete" })
    }
}
