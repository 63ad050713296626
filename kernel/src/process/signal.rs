//! POSIX-style signal state: numbers, dispositions, pending/blocked masks,
//! the realtime siginfo queue, and the trampoline frame `rt_sigreturn`
//! restores from.
//!
//! Uses Linux's `rt_sigreturn` syscall number (256) and a single flat
//! pending/blocked bitmap per task rather than per-thread masks.

use alloc::sync::Arc;
use core::mem::size_of;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use spin::Mutex;

use crate::arch::x86_64::syscall::SyscallFrame;
use crate::error::KernelResult;
use crate::mm::user_validation::{copy_from_user, copy_to_user};
use crate::sched::Task;

pub const SIGHUP: u32 = 1;
pub const SIGINT: u32 = 2;
pub const SIGQUIT: u32 = 3;
pub const SIGILL: u32 = 4;
pub const SIGTRAP: u32 = 5;
pub const SIGABRT: u32 = 6;
pub const SIGBUS: u32 = 7;
pub const SIGFPE: u32 = 8;
pub const SIGKILL: u32 = 9;
pub const SIGUSR1: u32 = 10;
pub const SIGSEGV: u32 = 11;
pub const SIGUSR2: u32 = 12;
pub const SIGPIPE: u32 = 13;
pub const SIGALRM: u32 = 14;
pub const SIGTERM: u32 = 15;
pub const SIGCHLD: u32 = 17;
pub const SIGCONT: u32 = 18;
pub const SIGSTOP: u32 = 19;
pub const SIGTSTP: u32 = 20;
pub const SIGTTIN: u32 = 21;
pub const SIGTTOU: u32 = 22;
pub const SIGURG: u32 = 23;
pub const SIGXCPU: u32 = 24;
pub const SIGXFSZ: u32 = 25;
pub const SIGVTALRM: u32 = 26;
pub const SIGPROF: u32 = 27;
pub const SIGWINCH: u32 = 28;
pub const SIGIO: u32 = 29;
pub const SIGSYS: u32 = 31;

/// Realtime signal range, SIGRTMIN..=SIGRTMAX.
pub const SIGRTMIN: u32 = 34;
pub const SIGRTMAX: u32 = 64;

pub const NSIG: usize = 64;

/// Syscall number used by the return trampoline to re-enter the kernel and
/// restore the interrupted context.
pub const SYS_RT_SIGRETURN: u64 = 256;

/// `sa_flags` bits, numerically matching the Linux `asm-generic/signal.h`
/// values so a user binary's existing constants need no translation.
pub const SA_NOCLDSTOP: u64 = 0x0000_0001;
pub const SA_NOCLDWAIT: u64 = 0x0000_0002;
pub const SA_SIGINFO: u64 = 0x0000_0004;
pub const SA_ONSTACK: u64 = 0x0800_0000;
pub const SA_RESTART: u64 = 0x1000_0000;
pub const SA_NODEFER: u64 = 0x4000_0000;
pub const SA_RESETHAND: u64 = 0x8000_0000;
pub const SA_RESTORER: u64 = 0x0400_0000;

/// A caught signal's full disposition: the handler entry point plus
/// everything `sigaction` lets userspace attach to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandlerAction {
    pub addr: u64,
    pub flags: u64,
    /// Additional signals to block for the duration of the handler, on top
    /// of `signo` itself (unless `SA_NODEFER` is set).
    pub mask: u64,
    /// Address of the user-mode trampoline `signal_setup_frame` pushes as
    /// the handler's return address; what `SA_RESTORER` names.
    pub restorer: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Default,
    Ignore,
    Handler(HandlerAction),
}

impl Default for Disposition {
    fn default() -> Self {
        Self::Default
    }
}

/// Whether a signal's default action, if not caught or ignored, terminates
/// the task (possibly dumping core) or is silently dropped.
pub fn default_is_terminal(signo: u32) -> bool {
    !matches!(signo, SIGCHLD | SIGURG | SIGWINCH | SIGCONT)
}

pub fn can_catch(signo: u32) -> bool {
    signo != SIGKILL && signo != SIGSTOP
}

/// One pending realtime signal, carrying the `siginfo_t` payload fields
/// `sigqueueinfo` lets userspace attach.
#[derive(Debug, Clone, Copy)]
pub struct QueuedSiginfo {
    pub signo: u32,
    pub code: i32,
    pub value: u64,
}

const MAX_QUEUED_RT_SIGNALS: usize = 32;

/// One of the three POSIX interval timers a task may arm.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntervalTimer {
    pub interval_ns: u64,
    pub remaining_ns: u64,
    pub armed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Real = 0,
    Virtual = 1,
    Prof = 2,
}

/// The user-supplied alternate signal stack (`sigaltstack`).
#[derive(Debug, Clone, Copy, Default)]
pub struct AltStack {
    pub sp: u64,
    pub size: usize,
    pub disabled: bool,
}

/// All per-task signal state: dispositions, pending/blocked bitmaps, the
/// realtime queue, altstack, the three interval timers, and the address of
/// the frame `rt_sigreturn` should restore from.
pub struct SignalState {
    dispositions: Mutex<[Disposition; NSIG]>,
    pending: AtomicU64,
    blocked: AtomicU64,
    rt_queue: Mutex<heapless_queue::Queue>,
    altstack: Mutex<AltStack>,
    timers: Mutex<[IntervalTimer; 3]>,
    saved_frame: AtomicUsize,
}

/// A tiny fixed-capacity FIFO, avoiding a dependency on a queue crate for
/// the bounded realtime-signal backlog.
mod heapless_queue {
    use super::{QueuedSiginfo, MAX_QUEUED_RT_SIGNALS};

    #[derive(Clone, Copy)]
    pub struct Queue {
        items: [Option<QueuedSiginfo>; MAX_QUEUED_RT_SIGNALS],
        len: usize,
    }

    impl Queue {
        pub const fn new() -> Self {
            Self {
                items: [None; MAX_QUEUED_RT_SIGNALS],
                len: 0,
            }
        }

        pub fn push(&mut self, info: QueuedSiginfo) -> bool {
            if self.len >= MAX_QUEUED_RT_SIGNALS {
                return false;
            }
            self.items[self.len] = Some(info);
            self.len += 1;
            true
        }

        pub fn pop_matching(&mut self, signo: u32) -> Option<QueuedSiginfo> {
            let idx = self.items[..self.len].iter().position(|i| i.map(|i| i.signo) == Some(signo))?;
            let info = self.items[idx].take().unwrap();
            for i in idx..self.len - 1 {
                self.items[i] = self.items[i + 1].take();
            }
            self.len -= 1;
            Some(info)
        }
    }
}

impl SignalState {
    pub fn new() -> Self {
        Self {
            dispositions: Mutex::new([Disposition::Default; NSIG]),
            pending: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            rt_queue: Mutex::new(heapless_queue::Queue::new()),
            altstack: Mutex::new(AltStack::default()),
            timers: Mutex::new([IntervalTimer::default(); 3]),
            saved_frame: AtomicUsize::new(0),
        }
    }

    fn bit(signo: u32) -> u64 {
        1u64 << (signo.saturating_sub(1) as u64).min(63)
    }

    pub fn disposition(&self, signo: u32) -> Disposition {
        self.dispositions.lock()[(signo as usize - 1).min(NSIG - 1)]
    }

    /// `rt_sigaction`: installs a new disposition, returning the old one.
    pub fn set_disposition(&self, signo: u32, new: Disposition) -> Option<Disposition> {
        if signo == 0 || signo as usize > NSIG || !can_catch(signo) {
            return None;
        }
        let mut table = self.dispositions.lock();
        let old = table[signo as usize - 1];
        table[signo as usize - 1] = new;
        Some(old)
    }

    pub fn raise(&self, signo: u32) {
        self.pending.fetch_or(Self::bit(signo), Ordering::SeqCst);
    }

    pub fn queue_rt(&self, info: QueuedSiginfo) -> bool {
        self.pending.fetch_or(Self::bit(info.signo), Ordering::SeqCst);
        self.rt_queue.lock().push(info)
    }

    pub fn take_queued(&self, signo: u32) -> Option<QueuedSiginfo> {
        self.rt_queue.lock().pop_matching(signo)
    }

    pub fn clear(&self, signo: u32) {
        self.pending.fetch_and(!Self::bit(signo), Ordering::SeqCst);
    }

    pub fn pending_mask(&self) -> u64 {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn blocked_mask(&self) -> u64 {
        self.blocked.load(Ordering::SeqCst)
    }

    pub fn set_blocked_mask(&self, mask: u64) {
        // SIGKILL and SIGSTOP can never be blocked.
        self.blocked.store(mask & !Self::bit(SIGKILL) & !Self::bit(SIGSTOP), Ordering::SeqCst);
    }

    /// Picks the lowest-numbered pending, unblocked signal, if any, and
    /// clears it from the pending set (the realtime queue entry, if any,
    /// must be separately consumed via [`take_queued`]).
    pub fn next_deliverable(&self) -> Option<u32> {
        let deliverable = self.pending.load(Ordering::SeqCst) & !self.blocked.load(Ordering::SeqCst);
        if deliverable == 0 {
            return None;
        }
        let signo = deliverable.trailing_zeros() + 1;
        self.clear(signo);
        Some(signo)
    }

    pub fn set_altstack(&self, stack: AltStack) -> AltStack {
        let mut guard = self.altstack.lock();
        let old = *guard;
        *guard = stack;
        old
    }

    pub fn altstack(&self) -> AltStack {
        *self.altstack.lock()
    }

    pub fn timer(&self, kind: TimerKind) -> IntervalTimer {
        self.timers.lock()[kind as usize]
    }

    pub fn set_timer(&self, kind: TimerKind, timer: IntervalTimer) -> IntervalTimer {
        let mut guard = self.timers.lock();
        let old = guard[kind as usize];
        guard[kind as usize] = timer;
        old
    }

    /// Advances the virtual/prof timers' countdowns; called once per
    /// scheduler tick while this task is running. Returns any timer whose
    /// countdown just reached zero, so the caller can raise its signal.
    pub fn tick(&self, ns_elapsed: u64, kind: TimerKind) -> bool {
        let mut guard = self.timers.lock();
        let t = &mut guard[kind as usize];
        if !t.armed {
            return false;
        }
        if t.remaining_ns <= ns_elapsed {
            t.remaining_ns = t.interval_ns;
            if t.interval_ns == 0 {
                t.armed = false;
            }
            true
        } else {
            t.remaining_ns -= ns_elapsed;
            false
        }
    }

    pub fn save_frame_addr(&self, addr: u64) {
        self.saved_frame.store(addr as usize, Ordering::SeqCst);
    }

    pub fn saved_frame_addr(&self) -> u64 {
        self.saved_frame.load(Ordering::SeqCst) as u64
    }
}

/// Everything `rt_sigreturn` needs to put the interrupted context back the
/// way it was: the blocked-signal mask in effect before the handler ran, the
/// `rip`/`rsp`/`rflags`/`rax` the syscall frame carried at the moment the
/// signal was dispatched, and the six argument registers — needed so an
/// `SA_RESTART` restart re-enters the syscall with its original arguments
/// rather than whatever the handler body left in them.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct SignalFrame {
    mask: u64,
    rip: u64,
    rsp: u64,
    rflags: u64,
    rax: u64,
    arg1: u64,
    arg2: u64,
    arg3: u64,
    arg4: u64,
    arg5: u64,
    arg6: u64,
}

/// Minimum stack alignment the SysV ABI guarantees a function is entered
/// with; the handler's own prologue assumes it.
const STACK_ALIGN: u64 = 16;

/// Redirects `frame` into `action`'s handler, having first saved everything
/// `rt_sigreturn` will restore onto the user stack below the interrupted
/// `rsp` (or the altstack, if `SA_ONSTACK` is set and one is configured).
///
/// Only the one-argument `void handler(int signo)` calling convention is
/// built; `SA_SIGINFO`'s three-argument `siginfo_t`/`ucontext_t` form is
/// accepted as a flag but not constructed.
pub fn signal_setup_frame(
    current: &Arc<Task>,
    state: &SignalState,
    frame: &mut SyscallFrame,
    signo: u32,
    action: HandlerAction,
) -> KernelResult<()> {
    let altstack = state.altstack();
    let base = if action.flags & SA_ONSTACK != 0 && !altstack.disabled && altstack.sp != 0 {
        altstack.sp + altstack.size as u64
    } else {
        frame.user_rsp
    };

    let saved = SignalFrame {
        mask: state.blocked_mask(),
        rip: frame.rip,
        rsp: frame.user_rsp,
        rflags: frame.rflags,
        rax: frame.rax,
        arg1: frame.arg1,
        arg2: frame.arg2,
        arg3: frame.arg3,
        arg4: frame.arg4,
        arg5: frame.arg5,
        arg6: frame.arg6,
    };

    let frame_size = size_of::<SignalFrame>() as u64;
    let saved_addr = (base - frame_size) & !(STACK_ALIGN - 1);
    let return_addr = saved_addr - 8;

    // SAFETY: `saved` is a repr(C) plain-old-data struct; this views it as
    // exactly its own size in bytes for the user copy.
    let bytes = unsafe { core::slice::from_raw_parts(&saved as *const SignalFrame as *const u8, frame_size as usize) };
    copy_to_user(saved_addr as usize, bytes)?;
    copy_to_user(return_addr as usize, &action.restorer.to_ne_bytes())?;

    state.save_frame_addr(saved_addr);

    let mut new_mask = state.blocked_mask() | action.mask;
    if action.flags & SA_NODEFER == 0 {
        new_mask |= SignalState::bit(signo);
    }
    state.set_blocked_mask(new_mask);

    if action.flags & SA_RESETHAND != 0 {
        state.set_disposition(signo, Disposition::Default);
    }

    frame.rip = action.addr;
    frame.user_rsp = return_addr;
    frame.arg1 = signo as u64;

    Ok(())
}

/// `rt_sigreturn`: restores the context `signal_setup_frame` saved, reading
/// it back from the user stack address the handler's `ret` landed on (the
/// restorer runs with `rsp` pointing exactly at the saved [`SignalFrame`]).
pub fn rt_sigreturn(current: &Arc<Task>, frame: &mut SyscallFrame) -> KernelResult<i64> {
    let mut buf = [0u8; size_of::<SignalFrame>()];
    copy_from_user(&mut buf, frame.user_rsp as usize)?;
    // SAFETY: `buf` holds exactly `size_of::<SignalFrame>()` bytes just
    // copied from user memory into a local, plain-old-data struct.
    let saved: SignalFrame = unsafe { core::ptr::read(buf.as_ptr() as *const SignalFrame) };

    current.signal.set_blocked_mask(saved.mask);
    current.signal.save_frame_addr(0);
    frame.rip = saved.rip;
    frame.user_rsp = saved.rsp;
    frame.rflags = saved.rflags;
    frame.arg1 = saved.arg1;
    frame.arg2 = saved.arg2;
    frame.arg3 = saved.arg3;
    frame.arg4 = saved.arg4;
    frame.arg5 = saved.arg5;
    frame.arg6 = saved.arg6;

    Ok(saved.rax as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigkill_and_sigstop_cannot_be_caught() {
        assert!(!can_catch(SIGKILL));
        assert!(!can_catch(SIGSTOP));
        assert!(can_catch(SIGTERM));
    }

    #[test]
    fn pending_and_blocked_mask_interact() {
        let s = SignalState::new();
        s.raise(SIGTERM);
        assert_ne!(s.pending_mask() & SignalState::bit(SIGTERM), 0);
        s.set_blocked_mask(SignalState::bit(SIGTERM));
        assert_eq!(s.next_deliverable(), None);
        s.set_blocked_mask(0);
        assert_eq!(s.next_deliverable(), Some(SIGTERM));
    }

    #[test]
    fn sigkill_cannot_be_blocked() {
        let s = SignalState::new();
        s.set_blocked_mask(SignalState::bit(SIGKILL));
        assert_eq!(s.blocked_mask() & SignalState::bit(SIGKILL), 0);
    }

    #[test]
    fn realtime_queue_round_trips() {
        let s = SignalState::new();
        let info = QueuedSiginfo { signo: SIGRTMIN, code: 0, value: 42 };
        assert!(s.queue_rt(info));
        let popped = s.take_queued(SIGRTMIN).unwrap();
        assert_eq!(popped.value, 42);
    }

    #[test]
    fn interval_timer_fires_after_interval() {
        let s = SignalState::new();
        s.set_timer(
            TimerKind::Real,
            IntervalTimer { interval_ns: 1000, remaining_ns: 1000, armed: true },
        );
        assert!(!s.tick(500, TimerKind::Real));
        assert!(s.tick(500, TimerKind::Real));
    }
}
