//! Heap allocation cost benchmark: small/medium/large `Vec` allocations
//! and deallocation through the kernel's `linked_list_allocator`-backed
//! global allocator.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]

extern crate alloc;

use alloc::vec::Vec;
use core::panic::PanicInfo;

use likeos64_kernel::{exit_qemu, serial_println, BenchmarkRunner, QemuExitCode};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("Memory Allocation Benchmark");
    serial_println!("===========================");

    let runner = BenchmarkRunner::new();
    runner.run_benchmark("alloc 64B", || bench_alloc(64));
    runner.run_benchmark("alloc 4KiB", || bench_alloc(4096));
    runner.run_benchmark("alloc 64KiB", || bench_alloc(65536));
    runner.run_benchmark("alloc+drop 64B", || drop(alloc_vec(64)));

    exit_qemu(QemuExitCode::Success)
}

fn alloc_vec(size: usize) -> Vec<u8> {
    let mut v: Vec<u8> = Vec::with_capacity(size);
    // SAFETY: only prevents the allocation from being optimized away; the
    // read never outlives `v`.
    unsafe {
        core::ptr::read_volatile(&v as *const _);
    }
    v.resize(size, 0);
    v
}

fn bench_alloc(size: usize) {
    drop(alloc_vec(size));
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("benchmark panic: {}", info);
    exit_qemu(QemuExitCode::Failed)
}
