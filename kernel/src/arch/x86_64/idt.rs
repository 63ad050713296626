//! Interrupt Descriptor Table: exception gates and the 16 legacy IRQ
//! vectors (32..47), both implemented on top of `x86_64`'s
//! `extern "x86-interrupt"` ABI support.
//!
//! Exceptions are handled inline (page fault routes into
//! [`crate::mm::page_fault`], the rest dump state and halt or kill the
//! faulting task). IRQs are acknowledged against the 8259 pair and handed
//! to [`crate::irq::dispatch`].

use lazy_static::lazy_static;
use pic8259::ChainedPics;
use spin::Mutex;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

use crate::irq::IrqNumber;
use crate::mm::page_fault::{FaultContext, FaultReason};

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

/// The pair of 8259 PICs, remapped so their 16 IRQ lines land at vectors
/// 32..47 instead of colliding with the CPU exception range.
pub static PICS: Mutex<ChainedPics> =
    // SAFETY: PIC_1_OFFSET/PIC_2_OFFSET place the remapped vectors outside
    // the 0..32 exception range, the only requirement `ChainedPics::new`
    // has on its caller.
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum InterruptIndex {
    Timer = PIC_1_OFFSET,
    Keyboard,
}

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.general_protection_fault
            .set_handler_fn(general_protection_fault_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        idt.divide_error.set_handler_fn(divide_error_handler);
        // SAFETY: the double-fault stack index names a dedicated IST slot
        // set up once in `gdt::init`, never reused for any other gate.
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(crate::arch::x86_64::gdt::DOUBLE_FAULT_IST_INDEX);
        }

        idt[InterruptIndex::Timer as u8].set_handler_fn(timer_interrupt_handler);
        idt[InterruptIndex::Keyboard as u8].set_handler_fn(keyboard_interrupt_handler);
        install_generic_irq_handlers(&mut idt);
        idt
    };
}

pub fn init() {
    IDT.load();
    // SAFETY: the remap sequence masks every line before reprogramming the
    // PICs, so no stray IRQ can fire mid-sequence.
    unsafe { PICS.lock().initialize() };
}

fn eoi(vector: u8) {
    // SAFETY: `vector` is always one of the 16 remapped IRQ vectors this
    // IDT installs a handler for.
    unsafe { PICS.lock().notify_end_of_interrupt(vector) };
}

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    log::warn!("breakpoint\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn double_fault_handler(stack_frame: InterruptStackFrame, _error_code: u64) -> ! {
    panic!("double fault\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn invalid_opcode_handler(stack_frame: InterruptStackFrame) {
    if stack_frame.code_segment.rpl() == x86_64::PrivilegeLevel::Ring3 {
        crate::sched::terminate_current(crate::process::signal::SIGILL);
        return;
    }
    panic!("invalid opcode\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn divide_error_handler(stack_frame: InterruptStackFrame) {
    if stack_frame.code_segment.rpl() == x86_64::PrivilegeLevel::Ring3 {
        crate::sched::terminate_current(crate::process::signal::SIGFPE);
        return;
    }
    panic!("divide error\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    use x86_64::registers::control::Cr2;

    let faulting_address = Cr2::read().map(|a| a.as_u64()).unwrap_or(0);
    let was_user_mode = stack_frame.code_segment.rpl() == x86_64::PrivilegeLevel::Ring3;
    let was_write = error_code.contains(PageFaultErrorCode::CAUSED_BY_WRITE);
    let reason = if error_code.contains(PageFaultErrorCode::PROTECTION_VIOLATION) {
        FaultReason::ProtectionViolation
    } else {
        FaultReason::NotPresent
    };

    let ctx = FaultContext {
        faulting_address,
        reason,
        was_write,
        was_user_mode,
        instruction_pointer: stack_frame.instruction_pointer.as_u64(),
    };

    if crate::mm::page_fault::handle_page_fault(&ctx).is_ok() {
        return;
    }

    if was_user_mode {
        crate::sched::terminate_current(crate::process::signal::SIGSEGV);
        return;
    }

    log::error!(
        "unrecoverable kernel page fault at {:#x}, rip={:#x}, code={:?}\n{:#?}",
        faulting_address,
        ctx.instruction_pointer,
        error_code,
        stack_frame
    );
    panic!("page fault in ring 0");
}

extern "x86-interrupt" fn general_protection_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    if stack_frame.code_segment.rpl() == x86_64::PrivilegeLevel::Ring3 {
        log::warn!("user GPF, error={:#x}\n{:#?}", error_code, stack_frame);
        crate::sched::terminate_current(crate::process::signal::SIGSEGV);
        return;
    }
    panic!("general protection fault, error={:#x}\n{:#?}", error_code, stack_frame);
}

extern "x86-interrupt" fn timer_interrupt_handler(_stack_frame: InterruptStackFrame) {
    crate::arch::x86_64::timer::tick();
    eoi(InterruptIndex::Timer as u8);
}

extern "x86-interrupt" fn keyboard_interrupt_handler(_stack_frame: InterruptStackFrame) {
    crate::irq::dispatch(IrqNumber(1));
    eoi(InterruptIndex::Keyboard as u8);
}

/// One `extern "x86-interrupt"` stub per remaining legacy IRQ line (2..7,
/// 9..15; lines 0 and 1 have dedicated handlers above). The vector is baked
/// into the generated function at compile time since the ISR ABI carries no
/// extra argument for it.
macro_rules! irq_stub {
    ($name:ident, $irq:expr) => {
        extern "x86-interrupt" fn $name(_stack_frame: InterruptStackFrame) {
            crate::irq::dispatch(IrqNumber($irq));
            eoi(PIC_1_OFFSET + $irq as u8);
        }
    };
}

irq_stub!(irq2_handler, 2);
irq_stub!(irq3_handler, 3);
irq_stub!(irq4_handler, 4);
irq_stub!(irq5_handler, 5);
irq_stub!(irq6_handler, 6);
irq_stub!(irq7_handler, 7);
irq_stub!(irq8_handler, 8);
irq_stub!(irq9_handler, 9);
irq_stub!(irq10_handler, 10);
irq_stub!(irq11_handler, 11);
irq_stub!(irq12_handler, 12);
irq_stub!(irq13_handler, 13);
irq_stub!(irq14_handler, 14);
irq_stub!(irq15_handler, 15);

fn install_generic_irq_handlers(idt: &mut InterruptDescriptorTable) {
    idt[(PIC_1_OFFSET + 2) as u8].set_handler_fn(irq2_handler);
    idt[(PIC_1_OFFSET + 3) as u8].set_handler_fn(irq3_handler);
    idt[(PIC_1_OFFSET + 4) as u8].set_handler_fn(irq4_handler);
    idt[(PIC_1_OFFSET + 5) as u8].set_handler_fn(irq5_handler);
    idt[(PIC_1_OFFSET + 6) as u8].set_handler_fn(irq6_handler);
    idt[(PIC_1_OFFSET + 7) as u8].set_handler_fn(irq7_handler);
    idt[(PIC_1_OFFSET + 8) as u8].set_handler_fn(irq8_handler);
    idt[(PIC_1_OFFSET + 9) as u8].set_handler_fn(irq9_handler);
    idt[(PIC_1_OFFSET + 10) as u8].set_handler_fn(irq10_handler);
    idt[(PIC_1_OFFSET + 11) as u8].set_handler_fn(irq11_handler);
    idt[(PIC_1_OFFSET + 12) as u8].set_handler_fn(irq12_handler);
    idt[(PIC_1_OFFSET + 13) as u8].set_handler_fn(irq13_handler);
    idt[(PIC_1_OFFSET + 14) as u8].set_handler_fn(irq14_handler);
    idt[(PIC_1_OFFSET + 15) as u8].set_handler_fn(irq15_handler);
}
