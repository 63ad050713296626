//! xHCI driver unit tests: the ring/context/descriptor logic that doesn't
//! need a real controller behind it, run under the bare-metal harness since
//! the driver itself is `no_std`.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(likeos64_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use likeos64_kernel::drivers::usb::xhci::context::dci_for_endpoint;
use likeos64_kernel::drivers::usb::xhci::device::{default_ep0_max_packet_size, parse_bulk_endpoints, setup_packet, DeviceDescriptor};
use likeos64_kernel::drivers::usb::xhci::ring::{completion_is_success, Ring, Trb};
use likeos64_kernel::{kernel_assert, kernel_assert_eq, serial_println};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("=== xHCI Tests ===");
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
fn dci_maps_ep0_to_zero() {
    kernel_assert_eq!(dci_for_endpoint(0, false), 0);
}

#[test_case]
fn dci_separates_in_and_out_on_the_same_endpoint_number() {
    let out_dci = dci_for_endpoint(1, false);
    let in_dci = dci_for_endpoint(1, true);
    kernel_assert!(out_dci != in_dci);
    kernel_assert_eq!(out_dci, 1);
    kernel_assert_eq!(in_dci, 2);
}

#[test_case]
fn setup_packet_encodes_fields_little_endian() {
    let packet = setup_packet(0x80, 6, 0x0100, 0, 18);
    kernel_assert_eq!(packet[0], 0x80);
    kernel_assert_eq!(packet[1], 6);
    kernel_assert_eq!(u16::from_le_bytes([packet[2], packet[3]]), 0x0100);
    kernel_assert_eq!(u16::from_le_bytes([packet[6], packet[7]]), 18);
}

#[test_case]
fn device_descriptor_parse_rejects_short_buffers() {
    kernel_assert!(DeviceDescriptor::parse(&[0u8; 4]).is_err());
}

#[test_case]
fn device_descriptor_parse_reads_partial_eight_byte_header() {
    let mut buf = [0u8; 8];
    buf[0] = 8;
    buf[1] = 1;
    buf[7] = 64;
    let desc = DeviceDescriptor::parse(&buf).unwrap();
    kernel_assert_eq!(desc.max_packet_size0, 64);
}

#[test_case]
fn device_descriptor_parse_reads_full_eighteen_byte_descriptor() {
    let mut buf = [0u8; 18];
    buf[0] = 18;
    buf[1] = 1;
    buf[7] = 64;
    buf[8] = 0x34;
    buf[9] = 0x12;
    buf[17] = 1;
    let desc = DeviceDescriptor::parse(&buf).unwrap();
    kernel_assert_eq!(desc.vendor_id, 0x1234);
    kernel_assert_eq!(desc.num_configurations, 1);
}

#[test_case]
fn parse_bulk_endpoints_skips_non_endpoint_descriptors() {
    // Interface descriptor (9 bytes, type 4) followed by one bulk IN
    // endpoint descriptor (7 bytes, type 5) and one interrupt endpoint
    // descriptor (which should be ignored).
    let config: [u8; 23] = [
        9, 4, 0, 0, 2, 0, 0, 0, 0, // interface
        7, 5, 0x81, 2, 64, 0, 0, // bulk IN, EP1
        7, 5, 0x03, 3, 8, 0, 0, // interrupt OUT, EP3
    ];
    let endpoints = parse_bulk_endpoints(&config);
    kernel_assert_eq!(endpoints.len(), 1);
    kernel_assert!(endpoints[0].is_in());
    kernel_assert_eq!(endpoints[0].number(), 1);
}

#[test_case]
fn ep0_max_packet_by_speed() {
    kernel_assert_eq!(default_ep0_max_packet_size(2), 8);
    kernel_assert_eq!(default_ep0_max_packet_size(3), 64);
    kernel_assert_eq!(default_ep0_max_packet_size(5), 512);
}

#[test_case]
fn completion_code_success_and_short_packet_are_both_ok() {
    kernel_assert!(completion_is_success(1).is_ok());
    kernel_assert!(completion_is_success(13).is_ok());
    kernel_assert!(completion_is_success(6).is_err());
}

#[test_case]
fn ring_enqueue_wraps_and_toggles_cycle_bit() {
    let mut ring = Ring::new().unwrap();
    let initial_cycle = ring.cycle_state();
    // RING_SIZE is 16 with the last slot reserved for the Link TRB, so
    // enqueuing 15 TRBs crosses the link and flips the cycle state.
    for _ in 0..15 {
        ring.enqueue(Trb::noop_cmd());
    }
    kernel_assert!(ring.cycle_state() != initial_cycle);
}
