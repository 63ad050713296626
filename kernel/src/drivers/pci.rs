//! PCI configuration-space access.
//!
//! Just enough of a bus scan to find a device by class/subclass/prog-if and
//! resolve its BAR0 to a physical MMIO base. Resolving a BAR's address is
//! the only thing [`super::usb::xhci`] needs from this bus; everything else
//! a real PCI subsystem would do (capability lists, MSI/MSI-X setup,
//! hot-plug) is out of scope.

use x86_64::instructions::port::Port;

const CONFIG_ADDRESS: u16 = 0xCF8;
const CONFIG_DATA: u16 = 0xCFC;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciAddress {
    pub bus: u8,
    pub slot: u8,
    pub func: u8,
}

impl PciAddress {
    fn config_address(&self, offset: u8) -> u32 {
        (1 << 31)
            | ((self.bus as u32) << 16)
            | ((self.slot as u32) << 11)
            | ((self.func as u32) << 8)
            | (offset as u32 & 0xFC)
    }
}

/// Reads one 32-bit configuration-space register.
///
/// SAFETY: port I/O to 0xCF8/0xCFC is how every x86 platform exposes PCI
/// configuration space; no device driver holds these ports otherwise.
fn read_config32(addr: PciAddress, offset: u8) -> u32 {
    unsafe {
        let mut address_port: Port<u32> = Port::new(CONFIG_ADDRESS);
        let mut data_port: Port<u32> = Port::new(CONFIG_DATA);
        address_port.write(addr.config_address(offset));
        data_port.read()
    }
}

fn write_config32(addr: PciAddress, offset: u8, value: u32) {
    unsafe {
        let mut address_port: Port<u32> = Port::new(CONFIG_ADDRESS);
        let mut data_port: Port<u32> = Port::new(CONFIG_DATA);
        address_port.write(addr.config_address(offset));
        data_port.write(value);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PciDevice {
    pub address: PciAddress,
    pub vendor_id: u16,
    pub device_id: u16,
    pub class: u8,
    pub subclass: u8,
    pub prog_if: u8,
}

impl PciDevice {
    fn probe(addr: PciAddress) -> Option<Self> {
        let id = read_config32(addr, 0x00);
        let vendor_id = (id & 0xFFFF) as u16;
        if vendor_id == 0xFFFF {
            return None;
        }
        let device_id = (id >> 16) as u16;
        let class_reg = read_config32(addr, 0x08);
        Some(Self {
            address: addr,
            vendor_id,
            device_id,
            class: (class_reg >> 24) as u8,
            subclass: (class_reg >> 16) as u8,
            prog_if: (class_reg >> 8) as u8,
        })
    }

    /// Resolves BAR `index`'s physical base address. Merges the adjacent
    /// BAR for a 64-bit-capable (`type` bits == 0b10) memory BAR; I/O-space
    /// BARs (bit 0 set) aren't meaningful as an MMIO base and return `None`.
    pub fn bar(&self, index: u8) -> Option<u64> {
        let offset = 0x10 + index * 4;
        let low = read_config32(self.address, offset);
        if low & 0x1 != 0 {
            return None;
        }
        let base = (low & !0xF) as u64;
        if (low >> 1) & 0b11 == 0b10 {
            let high = read_config32(self.address, offset + 4);
            Some(base | ((high as u64) << 32))
        } else {
            Some(base)
        }
    }

    /// Sets the bus-master and memory-space-enable bits so the device can
    /// issue MMIO reads/writes and DMA.
    pub fn enable_bus_master(&self) {
        let command = read_config32(self.address, 0x04);
        write_config32(self.address, 0x04, command | 0x6);
    }
}

/// Enumerates every function on every bus/slot, skipping absent slots
/// (vendor ID `0xFFFF`). A brute-force scan rather than walking bridges'
/// secondary-bus numbers, since this kernel only needs to locate one
/// controller at boot, not maintain a live topology.
pub fn scan() -> alloc::vec::Vec<PciDevice> {
    let mut found = alloc::vec::Vec::new();
    for bus in 0..=255u8 {
        for slot in 0..32u8 {
            for func in 0..8u8 {
                let addr = PciAddress { bus, slot, func };
                if let Some(device) = PciDevice::probe(addr) {
                    found.push(device);
                    if func == 0 {
                        let header_type = (read_config32(addr, 0x0C) >> 16) & 0xFF;
                        if header_type & 0x80 == 0 {
                            break;
                        }
                    }
                }
            }
        }
    }
    found
}

pub fn find_by_class(class: u8, subclass: u8, prog_if: u8) -> Option<PciDevice> {
    scan()
        .into_iter()
        .find(|d| d.class == class && d.subclass == subclass && d.prog_if == prog_if)
}

pub fn init() {
    let devices = scan();
    log::info!("pci: found {} device(s)", devices.len());
}
