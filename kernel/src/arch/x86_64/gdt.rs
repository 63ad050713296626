//! Global Descriptor Table and Task State Segment.
//!
//! Single static GDT/TSS pair, built once via `lazy_static` and never
//! mutated except for the TSS's `RSP0` slot, which the scheduler rewrites
//! on every task switch through a raw pointer (the `TaskStateSegment` type
//! itself exposes no setter, and there is exactly one TSS on this single-CPU
//! kernel, so no locking is needed around the write).

use lazy_static::lazy_static;
use x86_64::{
    structures::{
        gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector},
        tss::TaskStateSegment,
    },
    VirtAddr,
};

/// IST slot the double-fault handler runs on, set in [`idt::init`](super::idt).
pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;

const KERNEL_STACK_BYTES: usize = 4096 * 5;

/// A `[u8; N]` wrapper forced to 16-byte alignment, since the x86-64 ABI
/// (and the `movaps` family a handler's prologue may use) requires it.
#[repr(align(16))]
struct AlignedStack([u8; KERNEL_STACK_BYTES]);

static RSP0_STACK: AlignedStack = AlignedStack([0; KERNEL_STACK_BYTES]);
static DOUBLE_FAULT_STACK: AlignedStack = AlignedStack([0; KERNEL_STACK_BYTES]);

/// GDT selectors for kernel and user segments.
///
/// Layout: `0x00` null, `0x08` kernel code, `0x10` kernel data, `0x18` TSS
/// (two entries, through `0x20`), `0x28` user data (ring 3 selector
/// `0x2B`), `0x30` user code (ring 3 selector `0x33`). The user data/code
/// order matters: `SYSRET` derives `SS = STAR[63:48]+8` and
/// `CS = STAR[63:48]+16`, so data must sit immediately below code.
pub struct Selectors {
    pub code_selector: SegmentSelector,
    pub data_selector: SegmentSelector,
    pub tss_selector: SegmentSelector,
    pub user_data_selector: SegmentSelector,
    pub user_code_selector: SegmentSelector,
}

lazy_static! {
    static ref TSS: TaskStateSegment = {
        let mut tss = TaskStateSegment::new();
        tss.privilege_stack_table[0] = VirtAddr::from_ptr(&raw const RSP0_STACK) + KERNEL_STACK_BYTES as u64;
        tss.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] =
            VirtAddr::from_ptr(&raw const DOUBLE_FAULT_STACK) + KERNEL_STACK_BYTES as u64;
        tss
    };

    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        let mut gdt = GlobalDescriptorTable::new();
        let code_selector = gdt.append(Descriptor::kernel_code_segment());
        let data_selector = gdt.append(Descriptor::kernel_data_segment());
        let tss_selector = gdt.append(Descriptor::tss_segment(&TSS));
        let user_data_selector = gdt.append(Descriptor::user_data_segment());
        let user_code_selector = gdt.append(Descriptor::user_code_segment());
        (gdt, Selectors { code_selector, data_selector, tss_selector, user_data_selector, user_code_selector })
    };
}

/// Loads the GDT, reloads `CS`/`DS` to reference it, and loads the TSS.
/// Must run before [`super::syscall::init`] and [`super::idt::init`], both
/// of which read selectors or IST slots this sets up.
pub fn init() {
    use x86_64::instructions::{
        segmentation::{Segment, CS, DS},
        tables::load_tss,
    };

    GDT.0.load();
    // SAFETY: the selectors in `GDT.1` were computed from the table this
    // call just loaded, so they name valid descriptors; reloading CS/DS and
    // the TSS after a GDT load is the documented sequence for making the
    // new table take effect on the currently running CPU.
    unsafe {
        CS::set_reg(GDT.1.code_selector);
        DS::set_reg(GDT.1.data_selector);
        load_tss(GDT.1.tss_selector);
    }
}

/// The selectors for the GDT `init` built. Panics if called before `init`
/// runs, same as any other `lazy_static`.
pub fn selectors() -> &'static Selectors {
    &GDT.1
}

/// Rewrites the TSS's `RSP0` (the stack loaded on a ring 3 → ring 0
/// transition via interrupt or `SYSCALL`). Called by the scheduler on every
/// task switch so the next privilege-level change lands on the incoming
/// task's kernel stack rather than the outgoing one's.
///
/// # Safety
///
/// `TSS` is a single static with no other writer; this always runs with
/// interrupts disabled (inside `reschedule`), so no ring 3 → ring 0
/// transition can race the write.
pub fn set_kernel_stack(stack_top: u64) {
    let tss_ptr = &*TSS as *const TaskStateSegment as *mut TaskStateSegment;
    // SAFETY: see above.
    unsafe {
        (*tss_ptr).privilege_stack_table[0] = VirtAddr::new(stack_top);
    }
}
