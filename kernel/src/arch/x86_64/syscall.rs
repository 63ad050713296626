//! `SYSCALL`/`SYSRET` entry point.
//!
//! There is exactly one CPU, so there is no per-CPU GS-base machinery: the
//! kernel stack to switch onto is kept in a single scratch cell, written by
//! the scheduler on every task switch (alongside `gdt::set_kernel_stack`,
//! which serves the same purpose for interrupts — `SYSCALL` does not
//! consult the TSS, so it needs its own copy of the value).

use core::arch::naked_asm;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::syscall::dispatch;

/// Scratch cell holding the destination kernel stack for the next
/// `syscall_entry`. Updated by the scheduler whenever a task becomes
/// current; read only by `syscall_entry` itself.
static KERNEL_RSP_SCRATCH: AtomicU64 = AtomicU64::new(0);

/// Scratch cell `syscall_entry` uses to stash the interrupted user `RSP`
/// while running on the kernel stack.
static USER_RSP_SCRATCH: AtomicU64 = AtomicU64::new(0);

pub fn set_kernel_stack_for_syscall(stack_top: u64) {
    KERNEL_RSP_SCRATCH.store(stack_top, Ordering::Relaxed);
}

/// The register set captured at `SYSCALL` entry: the Linux x86-64 syscall
/// ABI's six argument registers, the syscall number/return value in `rax`,
/// and what `SYSRET` needs to resume the caller (`rcx` = user `RIP`, `r11`
/// = user `RFLAGS`, plus the user `RSP` stashed on entry).
///
/// Field order mirrors the order `syscall_entry` pushes registers in, so
/// the frame can be read out of (and an updated `rax` written back into)
/// the raw stack slots without a separate copy.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SyscallFrame {
    pub user_rsp: u64,
    pub rflags: u64,
    pub rip: u64,
    pub arg6: u64,
    pub arg5: u64,
    pub arg4: u64,
    pub arg3: u64,
    pub arg2: u64,
    pub arg1: u64,
    pub rax: u64,
}

impl SyscallFrame {
    pub fn number(&self) -> u64 {
        self.rax
    }

    pub fn args(&self) -> [u64; 6] {
        [self.arg1, self.arg2, self.arg3, self.arg4, self.arg5, self.arg6]
    }

    pub fn set_return(&mut self, value: i64) {
        self.rax = value as u64;
    }
}

/// Entered directly by the CPU on `SYSCALL`. Saves the caller's registers
/// into a [`SyscallFrame`] on the task's kernel stack, calls
/// [`crate::syscall::dispatch`], then restores the (possibly updated)
/// frame and returns via `SYSRET`.
///
/// # Safety
///
/// Installed as `IA32_LSTAR` by [`init`]; never call directly.
#[unsafe(naked)]
pub unsafe extern "C" fn syscall_entry() {
    naked_asm!(
        "mov [rip + {user_rsp}], rsp",
        "mov rsp, [rip + {kernel_rsp}]",
        "push rax",
        "push rdi",
        "push rsi",
        "push rdx",
        "push r10",
        "push r8",
        "push r9",
        "push rcx",
        "push r11",
        "push qword ptr [rip + {user_rsp}]",
        "mov rdi, rsp",
        "call {dispatch}",
        "pop rax", // discard the stashed user rsp copy
        "pop r11",
        "pop rcx",
        "pop r9",
        "pop r8",
        "pop r10",
        "pop rdx",
        "pop rsi",
        "pop rdi",
        "pop rax",
        "mov rsp, [rip + {user_rsp}]",
        "sysretq",
        user_rsp = sym USER_RSP_SCRATCH,
        kernel_rsp = sym KERNEL_RSP_SCRATCH,
        dispatch = sym syscall_entry_trampoline,
    );
}

/// Thin `extern "C"` shim so the naked stub can `call` into the ordinary
/// Rust dispatcher, which takes a typed `&mut SyscallFrame` rather than a
/// raw stack pointer.
extern "C" fn syscall_entry_trampoline(frame: *mut SyscallFrame) {
    // SAFETY: `frame` points at a `SyscallFrame`-shaped region of the
    // current kernel stack, laid out by the immediately preceding pushes
    // in `syscall_entry`.
    let frame = unsafe { &mut *frame };
    dispatch(frame);
}

/// Programs `IA32_STAR`/`IA32_LSTAR`/`IA32_FMASK` and enables
/// `SYSCALL`/`SYSRET`.
pub fn init() {
    use x86_64::registers::model_specific::{Efer, EferFlags, LStar, SFMask, Star};
    use x86_64::registers::rflags::RFlags;

    let selectors = crate::arch::x86_64::gdt::selectors();

    // SAFETY: enables the SYSCALL/SYSRET feature and installs this
    // module's own entry point and segment selectors, which is exactly
    // what EFER.SCE and the STAR/LSTAR MSRs are for.
    unsafe {
        Efer::update(|flags| {
            flags.insert(EferFlags::SYSTEM_CALL_EXTENSIONS);
        });
        LStar::write(x86_64::VirtAddr::new(syscall_entry as usize as u64));
        Star::write(
            selectors.user_code_selector,
            selectors.user_data_selector,
            selectors.code_selector,
            selectors.data_selector,
        )
        .expect("GDT selectors are not SYSCALL/SYSRET compatible");
        // Clear IF on entry so the syscall stub runs with interrupts off
        // until dispatch explicitly re-enables them.
        SFMask::write(RFlags::INTERRUPT_FLAG);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips_args_and_return() {
        let mut frame = SyscallFrame {
            user_rsp: 0,
            rflags: 0,
            rip: 0,
            arg6: 6,
            arg5: 5,
            arg4: 4,
            arg3: 3,
            arg2: 2,
            arg1: 1,
            rax: 42,
        };
        assert_eq!(frame.number(), 42);
        assert_eq!(frame.args(), [1, 2, 3, 4, 5, 6]);
        frame.set_return(-2);
        assert_eq!(frame.rax as i64, -2);
    }
}
