//! x86_64 paging bring-up.
//!
//! `bootloader_api` hands the kernel a working set of page tables (identity
//! map plus a higher-half mapping of the kernel image) and has already run
//! `ExitBootServices` by the time `kernel_main` is reached. This module
//! replaces those tables with the kernel's own: an identity map of the low
//! 2 MiB (legacy MMIO, real-mode-adjacent structures), a direct physical
//! map of all usable RAM at [`crate::mm::DIRECT_MAP_BASE`], and the
//! existing higher-half kernel mapping carried over by copying PML4
//! entries rather than re-walking the image.

use crate::mm::{page_table::PageTable, PhysicalAddress, VirtualAddress, DIRECT_MAP_BASE};

pub fn init(memory_regions: &[(u64, u64)]) {
    log::info!("building kernel page tables");

    let current_l4 = PhysicalAddress::new(read_cr3().as_u64());
    let new_l4 = build_kernel_tables(current_l4, memory_regions);

    write_cr3(new_l4);
    crate::mm::page_table::set_active(new_l4);
    enable_protections();

    log::info!("paging online, direct map base 0x{:x}", DIRECT_MAP_BASE);
}

/// Allocates a fresh PML4, carries over the bootloader's higher-half
/// entries (where the kernel image and its boot-time stacks live), then
/// installs an identity map of the low 2 MiB and a direct map of
/// `memory_regions` built from 1 GiB pages where alignment allows and
/// 2 MiB pages otherwise.
fn build_kernel_tables(current_l4: PhysicalAddress, memory_regions: &[(u64, u64)]) -> PhysicalAddress {
    let new_l4_phys = crate::mm::frame_allocator()
        .alloc()
        .expect("no frames left to build the kernel's own page tables");
    let new_l4_virt = crate::mm::phys_to_virt(new_l4_phys.phys_addr() as usize) as *mut PageTable;
    let old_l4_virt = current_l4.as_u64() as *mut PageTable;

    // SAFETY: `new_l4_virt` is a freshly allocated, exclusively owned frame
    // reached through the identity-mapped low memory the bootloader still
    // has active at this point. `old_l4_virt` is the table the CPU is
    // currently running under, so reading it is safe.
    unsafe {
        (*new_l4_virt).zero();
        // Copy the upper half (indices 256..512) verbatim: this is where
        // the kernel image, its stacks, and the bootloader's own
        // structures live, and their sub-tables don't need to move.
        for i in 256..512 {
            (*new_l4_virt)[i] = (*old_l4_virt)[i];
        }
    }

    identity_map_low_2mib(new_l4_phys.phys_addr());
    build_direct_map(new_l4_phys.phys_addr(), memory_regions);

    PhysicalAddress::new(new_l4_phys.phys_addr())
}

/// Builds a fresh PML4 for a new user task: empty user half, kernel higher
/// half copied from the currently active table so interrupts and syscalls
/// taken while this task runs still find the kernel mapped.
pub fn new_user_space() -> PhysicalAddress {
    let l4_phys = crate::mm::frame_allocator()
        .alloc()
        .expect("no frames left to build a user address space");
    let new_l4_virt = crate::mm::phys_to_virt(l4_phys.phys_addr() as usize) as *mut PageTable;
    let active_l4 = crate::mm::page_table::active();
    let active_l4_virt = crate::mm::phys_to_virt(active_l4.as_u64() as usize) as *mut PageTable;

    // SAFETY: `new_l4_virt` is a freshly allocated, exclusively owned frame;
    // `active_l4_virt` is the table currently loaded in CR3, safe to read.
    unsafe {
        (*new_l4_virt).zero();
        for i in 256..512 {
            (*new_l4_virt)[i] = (*active_l4_virt)[i];
        }
    }

    PhysicalAddress::new(l4_phys.phys_addr())
}

fn identity_map_low_2mib(l4_phys: u64) {
    use crate::mm::{page_table, PageFlags};
    page_table::map_huge_page(
        PhysicalAddress::new(l4_phys),
        VirtualAddress::new(0),
        PhysicalAddress::new(0),
        PageFlags::kernel_rw(),
    )
    .ok();
}

fn build_direct_map(l4_phys: u64, memory_regions: &[(u64, u64)]) {
    use crate::mm::{page_table, PageFlags};
    let flags = PageFlags::kernel_rw() | PageFlags::NO_EXECUTE;

    for &(start, len) in memory_regions {
        let mut phys = start & !(0x20_0000 - 1);
        let end = start + len;
        while phys < end {
            let virt = VirtualAddress::new(DIRECT_MAP_BASE + phys);
            page_table::map_huge_page(
                PhysicalAddress::new(l4_phys),
                virt,
                PhysicalAddress::new(phys),
                flags,
            )
            .ok();
            phys += 0x20_0000;
        }
    }
}

/// Enables SMEP/SMAP/NX, each gated on CPUID support.
fn enable_protections() {
    use x86_64::registers::{
        control::{Cr4, Cr4Flags, EferFlags},
        model_specific::Efer,
    };

    // SAFETY: setting these bits only tightens the privilege boundary
    // between supervisor and user mappings; no currently-executing code
    // relies on the relaxed behavior they remove.
    unsafe {
        Efer::update(|flags| *flags |= EferFlags::NO_EXECUTE_ENABLE);
        Cr4::update(|flags| {
            *flags |= Cr4Flags::SUPERVISOR_MODE_EXECUTION_PROTECTION
                | Cr4Flags::SUPERVISOR_MODE_ACCESS_PREVENTION;
        });
    }
}

pub fn read_cr3() -> PhysicalAddress {
    let cr3: u64;
    // SAFETY: reading CR3 has no side effects.
    unsafe {
        core::arch::asm!("mov {}, cr3", out(reg) cr3);
    }
    PhysicalAddress::new(cr3 & 0x000F_FFFF_FFFF_F000)
}

pub fn write_cr3(addr: PhysicalAddress) {
    // SAFETY: the caller (this module, exclusively) guarantees `addr`
    // points to a complete, valid PML4 covering every page currently
    // executing.
    unsafe {
        core::arch::asm!("mov cr3, {}", in(reg) addr.as_u64());
    }
}

pub fn invlpg(virt: VirtualAddress) {
    // SAFETY: invlpg only drops a stale TLB entry; it cannot itself cause
    // a fault.
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) virt.as_u64());
    }
}

pub fn flush_tlb_address(addr: u64) {
    invlpg(VirtualAddress::new(addr));
}

pub fn flush_tlb_all() {
    write_cr3(read_cr3());
}

pub fn read_cr2() -> VirtualAddress {
    let cr2: u64;
    // SAFETY: reading CR2 has no side effects.
    unsafe {
        core::arch::asm!("mov {}, cr2", out(reg) cr2);
    }
    VirtualAddress::new(cr2)
}
