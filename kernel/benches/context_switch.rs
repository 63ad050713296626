//! Context switch cost benchmark.
//!
//! Measures the raw cost of the pieces a task switch touches (general
//! register save/restore, a CR3 reload, an FXSAVE/FXRSTOR round trip)
//! without going through the real scheduler, which needs a second runnable
//! task to switch into.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]

use core::panic::PanicInfo;

use likeos64_kernel::{exit_qemu, serial_println, BenchmarkRunner, QemuExitCode};

const ITERATIONS_LABEL: u64 = 1000;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("Context Switch Benchmark");
    serial_println!("========================");

    let runner = BenchmarkRunner::new();
    runner.run_benchmark("general register save/restore", benchmark_gpr_switch);
    runner.run_benchmark("cr3 reload", benchmark_cr3_reload);
    runner.run_benchmark("fxsave/fxrstor", benchmark_fpu_switch);

    serial_println!("ran {} iterations per scenario", ITERATIONS_LABEL);
    exit_qemu(QemuExitCode::Success);
}

fn benchmark_gpr_switch() {
    // SAFETY: pushes and pops are balanced; this only perturbs the stack
    // pointer transiently within the asm block.
    unsafe {
        core::arch::asm!(
            "push rbx", "push rcx", "push rdx", "push rsi", "push rdi", "push rbp",
            "push r8", "push r9", "push r10", "push r11", "push r12", "push r13", "push r14", "push r15",
            "pop r15", "pop r14", "pop r13", "pop r12", "pop r11", "pop r10", "pop r9", "pop r8",
            "pop rbp", "pop rdi", "pop rsi", "pop rdx", "pop rcx", "pop rbx",
        );
    }
}

fn benchmark_cr3_reload() {
    // SAFETY: reloading CR3 with its own current value re-walks the TLB
    // without changing the active address space.
    unsafe {
        core::arch::asm!("mov rax, cr3", "mov cr3, rax", out("rax") _);
    }
}

fn benchmark_fpu_switch() {
    let mut area = [0u8; 512];
    // SAFETY: `area` is 512 bytes, the fixed size of the legacy FXSAVE
    // region, and outlives both instructions.
    unsafe {
        core::arch::asm!("fxsave [{0}]", in(reg) area.as_mut_ptr());
        core::arch::asm!("fxrstor [{0}]", in(reg) area.as_ptr());
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("benchmark panic: {}", info);
    exit_qemu(QemuExitCode::Failed)
}
