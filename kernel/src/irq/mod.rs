//! Architecture-independent IRQ dispatch layer.
//!
//! Hardware interrupt controllers (PIC/IOAPIC/LAPIC) live under
//! `arch::x86_64`; this module is the handler registry that the
//! architecture-specific entry stubs call into once they've acknowledged
//! the interrupt at the controller.

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::collections::BTreeMap;

use spin::Mutex;

use crate::{
    error::{KernelError, KernelResult},
    sync::once_lock::GlobalState,
};

/// IRQ line number (0-15 legacy PIC range, up to 223 via the IOAPIC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IrqNumber(pub u32);

impl IrqNumber {
    pub const fn new(irq: u32) -> Self {
        Self(irq)
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for IrqNumber {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<IrqNumber> for u32 {
    fn from(irq: IrqNumber) -> u32 {
        irq.0
    }
}

impl core::fmt::Display for IrqNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "IRQ#{}", self.0)
    }
}

pub type IrqHandler = fn(IrqNumber);

const MAX_IRQ: u32 = 224;

struct IrqManager {
    #[cfg(feature = "alloc")]
    handlers: BTreeMap<u32, IrqHandler>,
    dispatch_count: u64,
}

impl IrqManager {
    fn new() -> Self {
        Self {
            #[cfg(feature = "alloc")]
            handlers: BTreeMap::new(),
            dispatch_count: 0,
        }
    }

    #[cfg(feature = "alloc")]
    fn register(&mut self, irq: IrqNumber, handler: IrqHandler) -> KernelResult<()> {
        if irq.0 >= MAX_IRQ {
            return Err(KernelError::InvalidArgument {
                name: "irq",
                value: "exceeds maximum IRQ number",
            });
        }
        if self.handlers.contains_key(&irq.0) {
            return Err(KernelError::InvalidState {
                expected: "no handler registered",
                actual: "handler already registered",
            });
        }
        self.handlers.insert(irq.0, handler);
        Ok(())
    }

    #[cfg(feature = "alloc")]
    fn unregister(&mut self, irq: IrqNumber) -> KernelResult<()> {
        if self.handlers.remove(&irq.0).is_none() {
            return Err(KernelError::NotFound {
                resource: "IRQ handler",
                id: irq.0 as u64,
            });
        }
        Ok(())
    }

    #[cfg(feature = "alloc")]
    fn dispatch(&mut self, irq: IrqNumber) {
        self.dispatch_count += 1;
        if let Some(&handler) = self.handlers.get(&irq.0) {
            handler(irq);
        } else {
            log::trace!("spurious {}", irq);
        }
    }

    fn dispatch_count(&self) -> u64 {
        self.dispatch_count
    }
}

static IRQ_MANAGER: GlobalState<Mutex<IrqManager>> = GlobalState::new();

pub fn init() -> KernelResult<()> {
    IRQ_MANAGER
        .init(Mutex::new(IrqManager::new()))
        .map_err(|_| KernelError::InvalidState {
            expected: "uninitialized",
            actual: "already initialized",
        })?;
    log::info!("irq manager online");
    Ok(())
}

/// Registers `handler` for `irq`. Only one handler per line.
#[cfg(feature = "alloc")]
pub fn register_handler(irq: IrqNumber, handler: IrqHandler) -> KernelResult<()> {
    IRQ_MANAGER
        .with_mut(|mtx| mtx.lock().register(irq, handler))
        .unwrap_or(Err(KernelError::NotInitialized {
            subsystem: "irq",
        }))
}

#[cfg(feature = "alloc")]
pub fn unregister_handler(irq: IrqNumber) -> KernelResult<()> {
    IRQ_MANAGER
        .with_mut(|mtx| mtx.lock().unregister(irq))
        .unwrap_or(Err(KernelError::NotInitialized {
            subsystem: "irq",
        }))
}

/// Called from the raw `extern "x86-interrupt"` stubs in `arch::x86_64::idt`
/// after the controller has been told the interrupt was accepted, but
/// before EOI is sent.
#[cfg(feature = "alloc")]
pub fn dispatch(irq: IrqNumber) {
    IRQ_MANAGER.with_mut(|mtx| mtx.lock().dispatch(irq));
}

pub fn enable_irq(irq: IrqNumber) -> KernelResult<()> {
    crate::arch::x86_64::apic::unmask_irq(irq.0 as u8)
}

pub fn disable_irq(irq: IrqNumber) -> KernelResult<()> {
    crate::arch::x86_64::apic::mask_irq(irq.0 as u8)
}

pub fn eoi(_irq: IrqNumber) -> KernelResult<()> {
    crate::arch::x86_64::apic::send_eoi();
    Ok(())
}

pub fn dispatch_count() -> u64 {
    IRQ_MANAGER
        .with(|mtx| mtx.lock().dispatch_count())
        .unwrap_or(0)
}
