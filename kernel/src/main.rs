//! Bare-metal entry point. `bootloader_api::entry_point!` installs
//! [`kernel_main`] as the UEFI bootloader's handoff target; everything
//! past that call belongs to [`likeos64_kernel::bootstrap::run`].

#![no_std]
#![no_main]

use bootloader_api::config::{BootloaderConfig, Mapping};
use bootloader_api::{entry_point, BootInfo};
use likeos64_kernel::mm::DIRECT_MAP_BASE;

/// Pins the bootloader's physical-memory mapping at [`DIRECT_MAP_BASE`]
/// instead of letting it pick a random offset, so `mm::phys_to_virt` and
/// every `direct_map_virt()` call agree with what's actually mapped.
static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(Mapping::FixedAddress(DIRECT_MAP_BASE));
    config
};

entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    likeos64_kernel::bootstrap::run(boot_info)
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("panic: {}", info);
    loop {
        core::hint::spin_loop();
    }
}
