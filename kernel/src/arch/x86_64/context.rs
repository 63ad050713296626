//! Kernel-stack context switch.
//!
//! Only the callee-saved registers and the return address live in a saved
//! context; everything else is whatever was on the outgoing task's kernel
//! stack when it called into the scheduler (an interrupt frame for
//! preempted tasks, nothing at all for a task that hasn't run yet).

use core::arch::naked_asm;

/// Selectors used when building a ring-3 entry frame.
pub const USER_CODE_SELECTOR: u16 = 0x33;
pub const USER_DATA_SELECTOR: u16 = 0x2B;
pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
const RFLAGS_IF: u64 = 1 << 9;
const RFLAGS_RESERVED: u64 = 1 << 1;

/// Switches from the outgoing task's kernel stack to the incoming one.
///
/// # Safety
///
/// `prev_rsp_slot` must point at the `Task::kernel_rsp` field of the
/// currently running task, and `next_rsp` must be a kernel stack pointer
/// previously saved by this same function (or built by
/// [`build_initial_stack`]) for a task that is not already running
/// elsewhere.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_to(prev_rsp_slot: *mut u64, next_rsp: u64) {
    // SAFETY: caller contract above; this routine never returns to its
    // caller in the usual sense — it returns into whatever return address
    // was saved on the incoming stack, which is either this same `ret` (for
    // a task resuming mid-switch) or `enter_usermode_trampoline` (for a
    // freshly built task).
    naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "mov rsp, rsi",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    );
}

/// IRET frame built on a fresh kernel stack so that the first context
/// switch into a brand-new user task lands in ring 3 at `entry` with
/// `stack_top` as its user `RSP`.
#[repr(C)]
struct IretFrame {
    rip: u64,
    cs: u64,
    rflags: u64,
    rsp: u64,
    ss: u64,
}

/// Writes an initial kernel stack for a new user task: an IRET frame
/// followed by a callee-saved frame whose saved return address is
/// [`enter_usermode_trampoline`], so the first `switch_to` that resumes
/// this task falls straight through into ring 3.
///
/// Returns the resulting kernel stack pointer to store in `Task::kernel_rsp`.
///
/// # Safety
///
/// `kernel_stack_top` must be the top (highest address, 16-byte aligned) of
/// a kernel stack owned exclusively by the new task.
pub unsafe fn build_initial_user_stack(kernel_stack_top: u64, entry: u64, user_stack_top: u64) -> u64 {
    let mut sp = kernel_stack_top;

    sp -= core::mem::size_of::<IretFrame>() as u64;
    // SAFETY: `sp` is within the freshly allocated kernel stack and
    // properly aligned for `IretFrame`, which has no padding-sensitive
    // invariants beyond field order matching what `enter_usermode_trampoline`
    // expects to `iretq`.
    unsafe {
        core::ptr::write(
            sp as *mut IretFrame,
            IretFrame {
                rip: entry,
                cs: USER_CODE_SELECTOR as u64,
                rflags: RFLAGS_IF | RFLAGS_RESERVED,
                rsp: user_stack_top,
                ss: USER_DATA_SELECTOR as u64,
            },
        );
    }

    // Callee-saved frame matching what `switch_to` pops: five registers
    // plus a return address, here pointed at the trampoline.
    for _ in 0..5 {
        sp -= 8;
        // SAFETY: still within the task's own kernel stack.
        unsafe { core::ptr::write(sp as *mut u64, 0) };
    }
    sp -= 8;
    // SAFETY: same as above; this is the return address `switch_to`'s `ret`
    // will transfer control to.
    unsafe { core::ptr::write(sp as *mut u64, enter_usermode_trampoline as u64) };

    sp
}

/// Pops the IRET frame built above and drops into ring 3. Reached only as
/// the return address of the very first `switch_to` into a new user task.
#[unsafe(naked)]
extern "C" fn enter_usermode_trampoline() {
    // SAFETY: by construction (`build_initial_user_stack`), RSP at entry
    // points directly at a valid IRET frame; `iretq` consumes it and jumps
    // to ring 3.
    naked_asm!("iretq");
}

/// Same layout as [`build_initial_user_stack`], but resumes at the parent's
/// saved post-`SYSCALL` `RIP`/`RSP` with `RAX` forced to zero, which is how
/// a forked child observes `fork()` returning `0` the first time it runs.
///
/// # Safety
///
/// Same contract as [`build_initial_user_stack`].
pub unsafe fn build_forked_user_stack(kernel_stack_top: u64, resume_rip: u64, user_rsp: u64) -> u64 {
    let mut sp = kernel_stack_top;

    sp -= core::mem::size_of::<IretFrame>() as u64;
    // SAFETY: see `build_initial_user_stack`.
    unsafe {
        core::ptr::write(
            sp as *mut IretFrame,
            IretFrame {
                rip: resume_rip,
                cs: USER_CODE_SELECTOR as u64,
                rflags: RFLAGS_IF | RFLAGS_RESERVED,
                rsp: user_rsp,
                ss: USER_DATA_SELECTOR as u64,
            },
        );
    }

    for _ in 0..5 {
        sp -= 8;
        // SAFETY: still within the task's own kernel stack.
        unsafe { core::ptr::write(sp as *mut u64, 0) };
    }
    sp -= 8;
    // SAFETY: same as `build_initial_user_stack`, pointed at the
    // zero-RAX variant of the trampoline instead.
    unsafe { core::ptr::write(sp as *mut u64, enter_forked_child_trampoline as u64) };

    sp
}

/// Zeroes `RAX` before falling into the same IRET path as
/// [`enter_usermode_trampoline`], so a forked child sees `fork()` return 0.
#[unsafe(naked)]
extern "C" fn enter_forked_child_trampoline() {
    // SAFETY: by construction (`build_forked_user_stack`), RSP at entry
    // points directly at a valid IRET frame; `iretq` consumes it and jumps
    // to ring 3 with RAX already cleared.
    naked_asm!("xor eax, eax", "iretq");
}

/// Abandons the caller's current kernel call stack and falls into the
/// trampoline at the bottom of `new_rsp`, as built by
/// [`build_initial_user_stack`]. `execve` uses this: on success it never
/// returns to its caller, the same way the outgoing image's call stack
/// never resumes.
///
/// # Safety
///
/// `new_rsp` must be a kernel stack pointer previously built by
/// [`build_initial_user_stack`] on a kernel stack the caller exclusively
/// owns (typically its own, rebuilt in place for the new program image).
#[unsafe(naked)]
pub unsafe extern "C" fn jump_to_usermode(new_rsp: u64) -> ! {
    naked_asm!(
        "mov rsp, rdi",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    );
}
