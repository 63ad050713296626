//! User-space pointer validation and SMAP-aware copies.
//!
//! Every syscall argument that is a pointer must go through
//! [`copy_from_user`]/[`copy_to_user`] rather than being dereferenced
//! directly: user mappings can be unmapped or swapped out from under a
//! syscall, and with SMAP enabled the CPU will fault on any supervisor
//! access to a user page unless `stac`/`clac` bracket it.

use crate::error::{KernelError, KernelResult};
use crate::mm::{page_table, PageFlags};

/// Top of the user half of the address space (canonical, 47-bit).
pub const USER_SPACE_LIMIT: usize = 0x0000_8000_0000_0000;

pub fn is_user_addr_valid(addr: usize) -> bool {
    addr < USER_SPACE_LIMIT
}

/// Looks up the mapping backing `addr` in the currently active address
/// space, if any.
pub fn translate_address(addr: usize) -> Option<(crate::mm::FrameNumber, PageFlags)> {
    let l4 = page_table::active();
    page_table::translate(l4, crate::mm::VirtualAddress::new(addr as u64))
}

fn validate_range(addr: usize, len: usize, want_write: bool) -> KernelResult<()> {
    if !is_user_addr_valid(addr) || !is_user_addr_valid(addr.saturating_add(len)) {
        return Err(KernelError::BadUserPointer { addr });
    }
    let mut page = addr & !0xFFF;
    let end = addr + len;
    while page < end {
        match translate_address(page) {
            Some((_, flags)) if flags.contains(PageFlags::USER) => {
                if want_write && !flags.contains(PageFlags::WRITABLE) {
                    return Err(KernelError::BadUserPointer { addr });
                }
            }
            _ => return Err(KernelError::BadUserPointer { addr }),
        }
        page += 4096;
    }
    Ok(())
}

/// Copies `dst.len()` bytes from the user address `src` into kernel memory,
/// validating the whole range up front and disabling SMAP only around the
/// copy itself.
pub fn copy_from_user(dst: &mut [u8], src: usize) -> KernelResult<()> {
    validate_range(src, dst.len(), false)?;
    let _guard = SmapGuard::engage();
    // SAFETY: `validate_range` confirmed every page in `[src, src+len)` is
    // present and user-accessible; SMAP is disabled for the duration of
    // this copy by `_guard`.
    unsafe {
        core::ptr::copy_nonoverlapping(src as *const u8, dst.as_mut_ptr(), dst.len());
    }
    Ok(())
}

/// Copies `src` into the user address `dst`, with the same validation as
/// [`copy_from_user`].
pub fn copy_to_user(dst: usize, src: &[u8]) -> KernelResult<()> {
    validate_range(dst, src.len(), true)?;
    let _guard = SmapGuard::engage();
    // SAFETY: see `copy_from_user`; the range was additionally checked
    // writable.
    unsafe {
        core::ptr::copy_nonoverlapping(src.as_ptr(), dst as *mut u8, src.len());
    }
    Ok(())
}

/// Longest path/argument string a single `copy_user_cstring` call will
/// read before giving up, matching Linux's `PATH_MAX`.
pub const USER_CSTRING_MAX: usize = 4096;

/// Reads a NUL-terminated string from user memory, one page-sized chunk at
/// a time so a long string doesn't require the whole range to already be
/// known-valid up front.
pub fn copy_user_cstring(addr: usize) -> KernelResult<alloc::string::String> {
    let mut out = alloc::vec::Vec::new();
    let mut cursor = addr;
    while out.len() < USER_CSTRING_MAX {
        let mut byte = [0u8; 1];
        copy_from_user(&mut byte, cursor)?;
        if byte[0] == 0 {
            return alloc::string::String::from_utf8(out)
                .map_err(|_| KernelError::BadUserPointer { addr });
        }
        out.push(byte[0]);
        cursor += 1;
    }
    Err(KernelError::BadUserPointer { addr })
}

/// RAII `stac`/`clac` bracket. SMAP is re-armed as soon as the guard drops,
/// so a preempting interrupt handler is never run with it disabled for
/// longer than this copy.
struct SmapGuard;

impl SmapGuard {
    #[cfg(target_arch = "x86_64")]
    fn engage() -> Self {
        // SAFETY: stac only relaxes supervisor access to user pages; the
        // matching clac in `Drop` always runs before this function returns
        // control past the copy.
        unsafe { core::arch::asm!("stac", options(nomem, nostack, preserves_flags)) };
        Self
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn engage() -> Self {
        Self
    }
}

impl Drop for SmapGuard {
    fn drop(&mut self) {
        #[cfg(target_arch = "x86_64")]
        // SAFETY: re-enables SMAP enforcement; always paired with a prior
        // `stac` in `engage`.
        unsafe {
            core::arch::asm!("clac", options(nomem, nostack, preserves_flags))
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_addresses_are_rejected() {
        assert!(!is_user_addr_valid(0xFFFF_8000_0000_1000));
        assert!(is_user_addr_valid(0x0000_0000_0040_1000));
    }
}
