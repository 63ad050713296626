//! Scheduler integration tests: task spawn, lookup and reap, run under the
//! bare-metal QEMU harness since they need the real per-CPU current-task
//! state `sched` keeps.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(likeos64_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use likeos64_kernel::sched::{self, Task, TaskState};
use likeos64_kernel::{kernel_assert, kernel_assert_eq, serial_println};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("=== Scheduler Tests ===");
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    likeos64_kernel::test_panic_handler(info)
}

#[test_case]
fn spawn_assigns_a_fresh_task_id() {
    let stack = alloc::vec![0u8; 4096];
    let top = stack.as_ptr() as u64 + stack.len() as u64;
    let task = Task::new_kernel(top);
    let id = task.id;
    let spawned = sched::spawn(task);
    kernel_assert_eq!(spawned, id);
    core::mem::forget(stack);
}

#[test_case]
fn find_task_locates_a_spawned_task() {
    let stack = alloc::vec![0u8; 4096];
    let top = stack.as_ptr() as u64 + stack.len() as u64;
    let id = sched::spawn(Task::new_kernel(top));
    kernel_assert!(sched::find_task(id).is_some());
    core::mem::forget(stack);
}

#[test_case]
fn new_kernel_task_starts_ready() {
    let stack = alloc::vec![0u8; 4096];
    let top = stack.as_ptr() as u64 + stack.len() as u64;
    let task = Task::new_kernel(top);
    kernel_assert_eq!(*task.state.lock(), TaskState::Ready);
    core::mem::forget(stack);
}

#[test_case]
fn children_of_an_idle_task_is_empty() {
    let stack = alloc::vec![0u8; 4096];
    let top = stack.as_ptr() as u64 + stack.len() as u64;
    let id = sched::spawn(Task::new_kernel(top));
    kernel_assert!(sched::children_of(id).is_empty());
    core::mem::forget(stack);
}
