//! Wall clock and POSIX `timer_create` table.
//!
//! Ticks arrive from [`crate::arch::x86_64::timer::tick`] at 100 Hz; this
//! module turns that tick count into a nanosecond wall clock for
//! `clock_gettime`/`gettimeofday`, and drives the current task's three
//! interval timers (see [`crate::process::signal::IntervalTimer`]) plus any
//! timers created with `timer_create`.

extern crate alloc;

use alloc::collections::BTreeMap;

use spin::Mutex;

use crate::process::signal::{SIGALRM, SIGPROF, SIGVTALRM};

/// Nanoseconds per scheduler tick at 100 Hz.
pub const NS_PER_TICK: u64 = 10_000_000;

pub fn monotonic_ns() -> u64 {
    crate::arch::x86_64::timer::get_ticks() * NS_PER_TICK
}

/// A POSIX per-process timer created with `timer_create`, identified by
/// the opaque `timer_t` the syscall layer hands back to userspace.
#[derive(Debug, Clone, Copy)]
pub struct PosixTimer {
    pub signal: u32,
    pub interval_ns: u64,
    pub remaining_ns: u64,
    pub armed: bool,
    pub overrun_count: u64,
}

struct PosixTimerTable {
    timers: BTreeMap<u32, PosixTimer>,
    next_id: u32,
}

static POSIX_TIMERS: Mutex<PosixTimerTable> = Mutex::new(PosixTimerTable {
    timers: BTreeMap::new(),
    next_id: 1,
});

pub fn timer_create(signal: u32) -> u32 {
    let mut table = POSIX_TIMERS.lock();
    let id = table.next_id;
    table.next_id += 1;
    table.timers.insert(
        id,
        PosixTimer { signal, interval_ns: 0, remaining_ns: 0, armed: false, overrun_count: 0 },
    );
    id
}

pub fn timer_settime(id: u32, interval_ns: u64, initial_ns: u64) -> Option<PosixTimer> {
    let mut table = POSIX_TIMERS.lock();
    let timer = table.timers.get_mut(&id)?;
    let old = *timer;
    timer.interval_ns = interval_ns;
    timer.remaining_ns = initial_ns;
    timer.armed = initial_ns > 0;
    timer.overrun_count = 0;
    Some(old)
}

pub fn timer_gettime(id: u32) -> Option<PosixTimer> {
    POSIX_TIMERS.lock().timers.get(&id).copied()
}

pub fn timer_delete(id: u32) -> bool {
    POSIX_TIMERS.lock().timers.remove(&id).is_some()
}

/// Advances every armed POSIX timer by one tick, returning the signal
/// numbers that just fired (an expired `timer_create` timer and its
/// overrun count are tracked separately from the three classic itimers,
/// which live on the current task and are advanced by the caller).
pub fn tick_posix_timers() -> alloc::vec::Vec<(u32, u32)> {
    let mut fired = alloc::vec::Vec::new();
    let mut table = POSIX_TIMERS.lock();
    for (&id, timer) in table.timers.iter_mut() {
        if !timer.armed {
            continue;
        }
        if timer.remaining_ns <= NS_PER_TICK {
            fired.push((id, timer.signal));
            timer.overrun_count += 1;
            if timer.interval_ns > 0 {
                timer.remaining_ns = timer.interval_ns;
            } else {
                timer.armed = false;
            }
        } else {
            timer.remaining_ns -= NS_PER_TICK;
        }
    }
    fired
}

/// Called once per scheduler tick (from [`crate::arch::x86_64::timer::tick`]
/// via [`crate::sched::timer_tick`]) to advance the current task's classic
/// interval timers, raising whichever of SIGALRM/SIGVTALRM/SIGPROF just
/// expired.
pub fn tick_current_task_itimers() {
    let current = crate::sched::current_task();
    use crate::process::signal::TimerKind;
    if current.signal.tick(NS_PER_TICK, TimerKind::Real) {
        current.signal.raise(SIGALRM);
    }
    if current.privilege == crate::sched::Privilege::User {
        if current.signal.tick(NS_PER_TICK, TimerKind::Virtual) {
            current.signal.raise(SIGVTALRM);
        }
        if current.signal.tick(NS_PER_TICK, TimerKind::Prof) {
            current.signal.raise(SIGPROF);
        }
    }
    for (_, signo) in tick_posix_timers() {
        current.signal.raise(signo);
    }
}

/// `nanosleep`: converts a duration to tick counts. The actual blocking
/// (parking the task on a wait channel until the deadline or a signal)
/// is performed by the syscall layer; this just computes the deadline.
pub fn deadline_after(ns: u64) -> u64 {
    monotonic_ns().saturating_add(ns)
}

pub fn has_elapsed(deadline_ns: u64) -> bool {
    monotonic_ns() >= deadline_ns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posix_timer_create_and_fetch() {
        let id = timer_create(SIGALRM);
        assert!(timer_gettime(id).is_some());
        timer_settime(id, 0, 5 * NS_PER_TICK);
        let t = timer_gettime(id).unwrap();
        assert!(t.armed);
        assert!(timer_delete(id));
        assert!(timer_gettime(id).is_none());
    }

    #[test]
    fn posix_timer_fires_and_disarms_without_interval() {
        let id = timer_create(SIGUSR1_FOR_TEST);
        timer_settime(id, 0, NS_PER_TICK);
        let fired = tick_posix_timers();
        assert_eq!(fired, alloc::vec![(id, SIGUSR1_FOR_TEST)]);
        assert!(!timer_gettime(id).unwrap().armed);
        timer_delete(id);
    }

    const SIGUSR1_FOR_TEST: u32 = crate::process::signal::SIGUSR1;
}
