//! Kernel bring-up sequence.
//!
//! Mirrors the control flow this kernel follows after the bootloader hands
//! off: logging, memory, interrupts, USB, the scheduler, and finally the
//! timer that drives preemption — each stage logged so a hung boot can be
//! pinpointed from the serial log alone.

use bootloader_api::info::{MemoryRegionKind, MemoryRegions};
use bootloader_api::BootInfo;

use crate::mm::FrameNumber;

pub fn stage1_start() {
    log::info!("stage 1: architecture bring-up");
}

pub fn stage1_complete() {
    log::info!("stage 1 complete: GDT/IDT/PIC online");
}

pub fn stage2_start() {
    log::info!("stage 2: memory management");
}

pub fn stage2_complete() {
    log::info!("stage 2 complete: paging and heap online");
}

pub fn stage3_start() {
    log::info!("stage 3: device bring-up");
}

pub fn stage3_complete() {
    log::info!("stage 3 complete: USB/xHCI online");
}

pub fn stage4_start() {
    log::info!("stage 4: scheduler and timer");
}

pub fn stage4_complete() {
    log::info!("stage 4 complete: entering scheduler");
}

/// Finds the largest contiguous usable region in the firmware memory map
/// and returns `(base_frame, frame_count)`.
fn largest_usable_region(regions: &MemoryRegions) -> (FrameNumber, usize) {
    let mut best_start = 0u64;
    let mut best_len = 0u64;
    for region in regions.iter() {
        if region.kind != MemoryRegionKind::Usable {
            continue;
        }
        let len = region.end.saturating_sub(region.start);
        if len > best_len {
            best_len = len;
            best_start = region.start;
        }
    }
    (FrameNumber::from_phys_addr(best_start), (best_len / crate::mm::FRAME_SIZE as u64) as usize)
}

/// Runs every bring-up stage in order, then falls into the scheduler's
/// idle loop. Never returns.
pub fn run(boot_info: &'static mut BootInfo) -> ! {
    stage1_start();
    crate::arch::x86_64::gdt::init();
    crate::arch::x86_64::idt::init();
    stage1_complete();

    stage2_start();
    let (base, frames) = largest_usable_region(&boot_info.memory_regions);
    crate::mm::init(base, frames, &[])
        .expect("memory management bring-up must succeed; nothing can run without a heap");
    stage2_complete();

    if let Err(e) = crate::arch::x86_64::apic::init() {
        log::warn!("APIC bring-up failed, staying on the legacy PIC: {:?}", e);
    }
    crate::irq::init().expect("IRQ controller bring-up must succeed");
    crate::fs::init();
    crate::process::init();
    crate::sched::init();
    crate::arch::x86_64::syscall::init();

    stage3_start();
    crate::drivers::init();
    stage3_complete();

    stage4_start();
    crate::arch::x86_64::timer::setup_timer(10);
    x86_64::instructions::interrupts::enable();
    stage4_complete();

    crate::sched::run()
}
