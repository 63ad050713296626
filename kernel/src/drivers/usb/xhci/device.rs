//! USB descriptor parsing and the standard control requests enumeration
//! needs. Protocol-level only; actually issuing a control transfer is
//! `Controller::control_transfer` in `super::mod`.

use alloc::vec::Vec;

use crate::error::{DriverError, KernelError, KernelResult};

pub const REQUEST_GET_DESCRIPTOR: u8 = 6;
pub const REQUEST_SET_CONFIGURATION: u8 = 9;
pub const DESCRIPTOR_DEVICE: u8 = 1;
pub const DESCRIPTOR_CONFIGURATION: u8 = 2;
pub const DESCRIPTOR_INTERFACE: u8 = 4;
pub const DESCRIPTOR_ENDPOINT: u8 = 5;

/// Transfer Type (TRT) field of a Setup Stage TRB: no data, OUT data, or
/// IN data.
pub const TRT_NO_DATA: u32 = 0;
pub const TRT_OUT_DATA: u32 = 2;
pub const TRT_IN_DATA: u32 = 3;

/// Builds the 8-byte `bmRequestType, bRequest, wValue, wIndex, wLength`
/// Setup packet a control transfer's first TRB embeds directly.
pub fn setup_packet(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> [u8; 8] {
    let mut packet = [0u8; 8];
    packet[0] = request_type;
    packet[1] = request;
    packet[2..4].copy_from_slice(&value.to_le_bytes());
    packet[4..6].copy_from_slice(&index.to_le_bytes());
    packet[6..8].copy_from_slice(&length.to_le_bytes());
    packet
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub usb_version: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub max_packet_size0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    pub fn parse(buf: &[u8]) -> KernelResult<Self> {
        if buf.len() < 8 {
            return Err(KernelError::from(DriverError::DescriptorTooShort));
        }
        let mut d = DeviceDescriptor {
            length: buf[0],
            descriptor_type: buf[1],
            usb_version: u16::from_le_bytes([buf[2], buf[3]]),
            max_packet_size0: buf[7],
            ..Default::default()
        };
        if buf.len() >= 18 {
            d.device_class = buf[4];
            d.device_subclass = buf[5];
            d.device_protocol = buf[6];
            d.vendor_id = u16::from_le_bytes([buf[8], buf[9]]);
            d.product_id = u16::from_le_bytes([buf[10], buf[11]]);
            d.num_configurations = buf[17];
        }
        Ok(d)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EndpointDescriptor {
    pub endpoint_address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
}

impl EndpointDescriptor {
    pub fn number(&self) -> u8 {
        self.endpoint_address & 0x0F
    }

    pub fn is_in(&self) -> bool {
        self.endpoint_address & 0x80 != 0
    }

    pub fn is_bulk(&self) -> bool {
        self.attributes & 0x03 == 2
    }
}

/// Walks a Configuration Descriptor's nested Interface/Endpoint descriptors
/// and returns every bulk endpoint found, in encounter order.
pub fn parse_bulk_endpoints(config: &[u8]) -> Vec<EndpointDescriptor> {
    let mut endpoints = Vec::new();
    let mut offset = 0usize;
    while offset + 2 <= config.len() {
        let len = config[offset] as usize;
        if len == 0 || offset + len > config.len() {
            break;
        }
        let descriptor_type = config[offset + 1];
        if descriptor_type == DESCRIPTOR_ENDPOINT && len >= 7 {
            let ep = EndpointDescriptor {
                endpoint_address: config[offset + 2],
                attributes: config[offset + 3],
                max_packet_size: u16::from_le_bytes([config[offset + 4], config[offset + 5]]),
            };
            if ep.is_bulk() {
                endpoints.push(ep);
            }
        }
        offset += len;
    }
    endpoints
}

/// EP0 max packet size by port speed (xHCI Table 5-?, USB2/3 spec): Low
/// Speed always 8; Full Speed starts at 8 until the real value is read
/// back from the first 8 bytes of the Device Descriptor; High/Super Speed
/// are fixed at 64/512.
pub fn default_ep0_max_packet_size(speed: u8) -> u16 {
    match speed {
        2 => 8,   // Low Speed
        1 => 8,   // Full Speed, corrected after the first GET_DESCRIPTOR(8)
        3 => 64,  // High Speed
        4..=7 => 512, // SuperSpeed and faster
        _ => 8,
    }
}
