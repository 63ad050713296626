//! Page fault resolution.
//!
//! A single [`handle_page_fault`] routine handles every fault reason: demand
//! paging, copy-on-write, and guard-page stack growth all funnel through it,
//! whether the IDT's `#PF` gate calls it directly or a future explicit
//! validation path (`mm::user_validation`) triggers the same fault context.
//! There is deliberately no separate "IDT-hook" vs. "explicit-hook" copy of
//! this logic.

use crate::error::KernelError;
use crate::mm::{frame_allocator, page_table, PageFlags, PhysicalAddress, VirtualAddress, FRAME_SIZE};

/// Why the fault occurred, as decoded from the architecture error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultReason {
    NotPresent,
    ProtectionViolation,
}

/// Everything the fault handler needs, collected by the IDT's `#PF` stub
/// before any policy decision is made.
#[derive(Debug, Clone, Copy)]
pub struct FaultContext {
    pub faulting_address: u64,
    pub reason: FaultReason,
    pub was_write: bool,
    pub was_user_mode: bool,
    pub instruction_pointer: u64,
}

const STACK_GUARD_SIZE: u64 = FRAME_SIZE as u64;
const MAX_STACK_GROWTH: u64 = 128 * 1024;

/// Resolves a page fault, or returns the error that should become a
/// SIGSEGV (user mode) or a fatal exception dump (kernel mode).
pub fn handle_page_fault(ctx: &FaultContext) -> Result<(), KernelError> {
    let l4 = page_table::active();
    let page = VirtualAddress::new(ctx.faulting_address & !0xFFF);

    if ctx.was_write && ctx.reason == FaultReason::ProtectionViolation {
        if let Some((frame, flags)) = page_table::translate(l4, page) {
            if !flags.contains(PageFlags::WRITABLE) {
                return resolve_cow(l4, page, frame, flags);
            }
        }
    }

    if ctx.reason == FaultReason::NotPresent {
        let task = crate::sched::current_task();
        if within_stack_guard(ctx.faulting_address, task.user_stack_top, task.user_stack_bottom) {
            return grow_stack(l4, page, task.user_stack_bottom);
        }
    }

    Err(KernelError::InvalidAddress {
        addr: ctx.faulting_address as usize,
    })
}

/// A write to a page whose refcount is 1 simply becomes writable again; a
/// shared page is copied, the copy takes the fault, and the original's
/// refcount drops by one.
fn resolve_cow(
    l4: PhysicalAddress,
    page: VirtualAddress,
    frame: crate::mm::FrameNumber,
    flags: PageFlags,
) -> Result<(), KernelError> {
    let fa = frame_allocator();
    if fa.refcount(frame) <= 1 {
        page_table::remap_page(l4, page, flags | PageFlags::WRITABLE)?;
        return Ok(());
    }

    let new_frame = fa.alloc()?;
    // SAFETY: `old` is the direct-map view of a page we hold a valid
    // mapping to; `new` is a freshly allocated, exclusively owned frame.
    // Copying one full page between two direct-map pointers does not
    // alias any Rust-level reference.
    unsafe {
        let old = PhysicalAddress::new(frame.phys_addr()).direct_map_virt().as_u64() as *const u8;
        let new = PhysicalAddress::new(new_frame.phys_addr()).direct_map_virt().as_u64() as *mut u8;
        core::ptr::copy_nonoverlapping(old, new, FRAME_SIZE);
    }
    page_table::unmap_page(l4, page)?;
    page_table::map_page(l4, page, new_frame, flags | PageFlags::WRITABLE)?;
    fa.free(frame)?;
    Ok(())
}

fn within_stack_guard(fault_addr: u64, stack_top: u64, stack_bottom: u64) -> bool {
    fault_addr < stack_bottom
        && fault_addr >= stack_bottom.saturating_sub(MAX_STACK_GROWTH)
        && stack_top.saturating_sub(fault_addr) <= MAX_STACK_GROWTH + STACK_GUARD_SIZE
}

fn grow_stack(l4: PhysicalAddress, page: VirtualAddress, _stack_bottom: u64) -> Result<(), KernelError> {
    let frame = frame_allocator().alloc()?;
    page_table::map_page(l4, page, frame, PageFlags::user_rw() | PageFlags::NO_EXECUTE)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_guard_window_is_bounded() {
        let top = 0x7fff_0000_1000;
        let bottom = top - 4096;
        assert!(within_stack_guard(bottom - 4096, top, bottom));
        assert!(!within_stack_guard(bottom - MAX_STACK_GROWTH - FRAME_SIZE as u64 * 2, top, bottom));
    }
}
