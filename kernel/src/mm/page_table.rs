//! 4-level x86_64 page tables.
//!
//! Tables are walked and mutated exclusively through the direct physical
//! map (`phys + DIRECT_MAP_BASE`); there is no recursive mapping and no
//! temporary-mapping scheme.

use core::ops::{Index, IndexMut};

use super::{frame_allocator, FrameNumber, PageFlags, PhysicalAddress, VirtualAddress};
use crate::error::{KernelError, KernelResult};

pub const PAGE_TABLE_ENTRIES: usize = 512;

#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
pub struct PageTableEntry {
    entry: u64,
}

impl PageTableEntry {
    pub const fn empty() -> Self {
        Self { entry: 0 }
    }

    pub const fn is_unused(&self) -> bool {
        self.entry == 0
    }

    pub fn is_present(&self) -> bool {
        self.flags().contains(PageFlags::PRESENT)
    }

    pub fn frame(&self) -> Option<FrameNumber> {
        self.is_present()
            .then(|| FrameNumber::new((self.entry & 0x000F_FFFF_FFFF_F000) >> 12))
    }

    pub fn addr(&self) -> Option<PhysicalAddress> {
        self.frame().map(|f| PhysicalAddress::new(f.as_u64() << 12))
    }

    pub fn flags(&self) -> PageFlags {
        PageFlags::from_bits_truncate(self.entry)
    }

    pub fn set(&mut self, frame: FrameNumber, flags: PageFlags) {
        self.entry = (frame.as_u64() << 12) | flags.bits();
    }

    pub fn set_flags(&mut self, flags: PageFlags) {
        let frame_bits = self.entry & 0x000F_FFFF_FFFF_F000;
        self.entry = frame_bits | flags.bits();
    }

    pub fn clear(&mut self) {
        self.entry = 0;
    }
}

#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; PAGE_TABLE_ENTRIES],
}

impl PageTable {
    pub const fn new() -> Self {
        Self {
            entries: [PageTableEntry::empty(); PAGE_TABLE_ENTRIES],
        }
    }

    pub fn zero(&mut self) {
        for entry in &mut self.entries {
            entry.clear();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageTableEntry> {
        self.entries.iter()
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<usize> for PageTable {
    type Output = PageTableEntry;
    fn index(&self, index: usize) -> &Self::Output {
        &self.entries[index]
    }
}

impl IndexMut<usize> for PageTable {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.entries[index]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableIndex(u16);

impl PageTableIndex {
    pub const fn new_truncate(index: u16) -> Self {
        Self(index & 0x1FF)
    }
}

impl From<PageTableIndex> for usize {
    fn from(index: PageTableIndex) -> Self {
        index.0 as usize
    }
}

/// Breakdown of a virtual address into the four page-table indices plus
/// the in-page offset.
#[derive(Debug, Clone, Copy)]
pub struct VirtualAddressBreakdown {
    pub l4_index: PageTableIndex,
    pub l3_index: PageTableIndex,
    pub l2_index: PageTableIndex,
    pub l1_index: PageTableIndex,
    pub page_offset: u16,
}

impl VirtualAddressBreakdown {
    pub fn new(addr: VirtualAddress) -> Self {
        let addr = addr.as_u64();
        Self {
            l4_index: PageTableIndex::new_truncate((addr >> 39) as u16),
            l3_index: PageTableIndex::new_truncate((addr >> 30) as u16),
            l2_index: PageTableIndex::new_truncate((addr >> 21) as u16),
            l1_index: PageTableIndex::new_truncate((addr >> 12) as u16),
            page_offset: (addr & 0xFFF) as u16,
        }
    }
}

/// Physical address of the active PML4, cached so `mmu::write_cr3` isn't
/// needed just to find out what's loaded.
static mut ACTIVE_L4: u64 = 0;

/// Translates a table-pointing physical address to the direct-map pointer
/// used to read/write it.
fn table_at(phys: PhysicalAddress) -> *mut PageTable {
    super::phys_to_virt(phys.as_u64() as usize) as *mut PageTable
}

/// Walks from `l4` down to the L1 table covering `addr`, allocating any
/// missing intermediate tables along the way when `create` is set.
fn walk(
    l4: PhysicalAddress,
    addr: VirtualAddress,
    create: bool,
) -> KernelResult<*mut PageTable> {
    let breakdown = VirtualAddressBreakdown::new(addr);
    let mut table_phys = l4;

    for index in [breakdown.l4_index, breakdown.l3_index, breakdown.l2_index] {
        // SAFETY: `table_phys` always names a table owned by this address
        // space, reached through the direct map, which is mapped for the
        // whole lifetime of the kernel.
        let table = unsafe { &mut *table_at(table_phys) };
        let entry = &mut table[usize::from(index)];
        if !entry.is_present() {
            if !create {
                return Err(KernelError::UnmappedMemory {
                    addr: addr.as_u64() as usize,
                });
            }
            let frame = frame_allocator().alloc()?;
            // SAFETY: a freshly allocated frame, reached via the direct
            // map, owned exclusively by this call until linked in below.
            unsafe { (*table_at(frame.phys_addr().into())).zero() };
            entry.set(frame, PageFlags::kernel_rw());
        }
        table_phys = entry.addr().expect("entry marked present without a frame");
    }

    Ok(table_at(table_phys))
}

/// Walks from `l4` down to the L2 (page directory) table covering `addr`,
/// allocating missing L4/L3 tables along the way when `create` is set.
/// Used for 2 MiB huge-page mappings, which terminate one level higher
/// than the 4 KiB path in [`walk`].
fn walk_to_l2(
    l4: PhysicalAddress,
    addr: VirtualAddress,
    create: bool,
) -> KernelResult<*mut PageTable> {
    let breakdown = VirtualAddressBreakdown::new(addr);
    let mut table_phys = l4;

    for index in [breakdown.l4_index, breakdown.l3_index] {
        // SAFETY: see `walk`.
        let table = unsafe { &mut *table_at(table_phys) };
        let entry = &mut table[usize::from(index)];
        if !entry.is_present() {
            if !create {
                return Err(KernelError::UnmappedMemory {
                    addr: addr.as_u64() as usize,
                });
            }
            let frame = frame_allocator().alloc()?;
            unsafe { (*table_at(frame.phys_addr().into())).zero() };
            entry.set(frame, PageFlags::kernel_rw());
        }
        table_phys = entry.addr().expect("entry marked present without a frame");
    }

    Ok(table_at(table_phys))
}

/// Maps a 2 MiB-aligned `page` to a 2 MiB-aligned physical address via a
/// huge page at the L2 level. `flags` must not include [`PageFlags::HUGE`]
/// (set implicitly).
pub fn map_huge_page(
    l4: PhysicalAddress,
    page: VirtualAddress,
    phys: PhysicalAddress,
    flags: PageFlags,
) -> KernelResult<()> {
    let breakdown = VirtualAddressBreakdown::new(page);
    let l2 = walk_to_l2(l4, page, true)?;
    // SAFETY: `walk_to_l2` returns a direct-map pointer to a table this
    // address space owns.
    let entry = unsafe { &mut (*l2)[usize::from(breakdown.l2_index)] };
    if entry.is_present() {
        return Err(KernelError::AlreadyMapped {
            addr: page.as_u64() as usize,
        });
    }
    let frame = FrameNumber::new(phys.as_u64() / super::FRAME_SIZE as u64);
    entry.set(frame, flags | PageFlags::PRESENT | PageFlags::HUGE);
    Ok(())
}

impl From<u64> for PhysicalAddress {
    fn from(v: u64) -> Self {
        PhysicalAddress::new(v)
    }
}

/// Maps `page` to `frame` in the address space rooted at `l4`.
pub fn map_page(
    l4: PhysicalAddress,
    page: VirtualAddress,
    frame: FrameNumber,
    flags: PageFlags,
) -> KernelResult<()> {
    let breakdown = VirtualAddressBreakdown::new(page);
    let l1 = walk(l4, page, true)?;
    // SAFETY: `walk` returns a direct-map pointer to a table this address
    // space owns.
    let entry = unsafe { &mut (*l1)[usize::from(breakdown.l1_index)] };
    if entry.is_present() {
        return Err(KernelError::AlreadyMapped {
            addr: page.as_u64() as usize,
        });
    }
    entry.set(frame, flags | PageFlags::PRESENT);
    Ok(())
}

/// Replaces the flags of an existing mapping, keeping its frame.
pub fn remap_page(l4: PhysicalAddress, page: VirtualAddress, flags: PageFlags) -> KernelResult<()> {
    let breakdown = VirtualAddressBreakdown::new(page);
    let l1 = walk(l4, page, false)?;
    let entry = unsafe { &mut (*l1)[usize::from(breakdown.l1_index)] };
    if !entry.is_present() {
        return Err(KernelError::UnmappedMemory {
            addr: page.as_u64() as usize,
        });
    }
    entry.set_flags(flags | PageFlags::PRESENT);
    crate::arch::x86_64::mmu::flush_tlb_address(page.as_u64());
    Ok(())
}

/// Unmaps `page`, returning the frame it pointed to.
pub fn unmap_page(l4: PhysicalAddress, page: VirtualAddress) -> KernelResult<FrameNumber> {
    let breakdown = VirtualAddressBreakdown::new(page);
    let l1 = walk(l4, page, false)?;
    let entry = unsafe { &mut (*l1)[usize::from(breakdown.l1_index)] };
    let frame = entry.frame().ok_or(KernelError::UnmappedMemory {
        addr: page.as_u64() as usize,
    })?;
    entry.clear();
    crate::arch::x86_64::mmu::flush_tlb_address(page.as_u64());
    Ok(frame)
}

/// Looks up the mapping for `page` without modifying the table.
pub fn translate(l4: PhysicalAddress, page: VirtualAddress) -> Option<(FrameNumber, PageFlags)> {
    let breakdown = VirtualAddressBreakdown::new(page);
    let l1 = walk(l4, page, false).ok()?;
    let entry = unsafe { &(*l1)[usize::from(breakdown.l1_index)] };
    entry.frame().map(|f| (f, entry.flags()))
}

/// Allocates a fresh, zeroed top-level table and returns its physical
/// address.
pub fn new_address_space() -> KernelResult<PhysicalAddress> {
    let frame = frame_allocator().alloc()?;
    let phys = PhysicalAddress::new(frame.phys_addr());
    unsafe { (*table_at(phys)).zero() };
    Ok(phys)
}

/// Records the physical address of the PML4 the CPU currently has loaded;
/// called once by `mmu::init` right after the first `write_cr3`.
pub fn set_active(l4: PhysicalAddress) {
    unsafe {
        ACTIVE_L4 = l4.as_u64();
    }
}

pub fn active() -> PhysicalAddress {
    unsafe { PhysicalAddress::new(ACTIVE_L4) }
}

/// Duplicates every 4 KiB user-space mapping (L4 indices 0..256, i.e.
/// everything below the higher half) from `parent` into `child` by
/// copy-on-write: every writable page is re-set read-only in both address
/// spaces and its frame's refcount is bumped, so both tasks fault into
/// `page_fault::resolve_cow` the first time either writes to it instead of
/// the kernel paying for a copy no one may ever need.
pub fn clone_user_mappings(parent: PhysicalAddress, child: PhysicalAddress) -> KernelResult<()> {
    let parent_l4 = unsafe { &*table_at(parent) };
    for l4_idx in 0..256 {
        let l4_entry = parent_l4[l4_idx];
        if !l4_entry.is_present() {
            continue;
        }
        let l3_phys = l4_entry.addr().expect("present L4 entry has a frame");
        let l3 = unsafe { &*table_at(l3_phys) };
        for l3_idx in 0..PAGE_TABLE_ENTRIES {
            let l3_entry = l3[l3_idx];
            if !l3_entry.is_present() {
                continue;
            }
            let l2_phys = l3_entry.addr().expect("present L3 entry has a frame");
            let l2 = unsafe { &*table_at(l2_phys) };
            for l2_idx in 0..PAGE_TABLE_ENTRIES {
                let l2_entry = l2[l2_idx];
                if !l2_entry.is_present() {
                    continue;
                }
                if l2_entry.flags().contains(PageFlags::HUGE) {
                    // User mappings in this kernel are always 4 KiB; a huge
                    // entry here would mean another subsystem mapped one
                    // directly, which fork doesn't support duplicating.
                    continue;
                }
                let l1_phys = l2_entry.addr().expect("present L2 entry has a frame");
                let l1 = unsafe { &mut *table_at(l1_phys) };
                for l1_idx in 0..PAGE_TABLE_ENTRIES {
                    let entry = &mut l1[l1_idx];
                    let Some(frame) = entry.frame() else { continue };
                    let mut flags = entry.flags();

                    let virt_bits = ((l4_idx as u64) << 39)
                        | ((l3_idx as u64) << 30)
                        | ((l2_idx as u64) << 21)
                        | ((l1_idx as u64) << 12);
                    let page = VirtualAddress::new(virt_bits);

                    if flags.contains(PageFlags::WRITABLE) {
                        flags.remove(PageFlags::WRITABLE);
                        entry.set_flags(flags);
                        crate::arch::x86_64::mmu::flush_tlb_address(page.as_u64());
                    }

                    frame_allocator().share(frame)?;
                    map_page(child, page, frame, flags)?;
                }
            }
        }
    }
    Ok(())
}

/// Frees every frame backing `l4`'s user half (indices 0..256) along with
/// the L3/L2/L1 tables themselves, but leaves the L4 entries cleared and
/// the L4 frame itself in place. Shared by [`destroy_address_space`] (which
/// also frees `l4`) and `execve` (which reuses `l4` for the new image).
fn free_user_mappings(l4: PhysicalAddress) -> KernelResult<()> {
    let l4_table = unsafe { &mut *table_at(l4) };
    for l4_idx in 0..256 {
        let l4_entry = l4_table[l4_idx];
        if !l4_entry.is_present() {
            continue;
        }
        let l3_phys = l4_entry.addr().expect("present L4 entry has a frame");
        let l3 = unsafe { &*table_at(l3_phys) };
        for l3_idx in 0..PAGE_TABLE_ENTRIES {
            let l3_entry = l3[l3_idx];
            if !l3_entry.is_present() {
                continue;
            }
            let l2_phys = l3_entry.addr().expect("present L3 entry has a frame");
            let l2 = unsafe { &*table_at(l2_phys) };
            for l2_idx in 0..PAGE_TABLE_ENTRIES {
                let l2_entry = l2[l2_idx];
                if !l2_entry.is_present() {
                    continue;
                }
                if l2_entry.flags().contains(PageFlags::HUGE) {
                    continue;
                }
                let l1_phys = l2_entry.addr().expect("present L2 entry has a frame");
                let l1 = unsafe { &*table_at(l1_phys) };
                for l1_idx in 0..PAGE_TABLE_ENTRIES {
                    if let Some(frame) = l1[l1_idx].frame() {
                        frame_allocator().free(frame)?;
                    }
                }
                frame_allocator().free(FrameNumber::from_phys_addr(l1_phys.as_u64()))?;
            }
            frame_allocator().free(FrameNumber::from_phys_addr(l2_phys.as_u64()))?;
        }
        frame_allocator().free(FrameNumber::from_phys_addr(l3_phys.as_u64()))?;
        l4_table[l4_idx].clear();
    }
    Ok(())
}

/// Frees every frame backing `l4`'s user half, then the L4 frame itself.
/// Called when a task exits and its address space has no other users
/// left. Does not touch the higher half, which is a reference into the
/// kernel's own tables, never owned per-task.
pub fn destroy_address_space(l4: PhysicalAddress) -> KernelResult<()> {
    free_user_mappings(l4)?;
    frame_allocator().free(FrameNumber::from_phys_addr(l4.as_u64()))?;
    Ok(())
}

/// Frees every frame backing `l4`'s user half but keeps `l4` itself and its
/// kernel higher half, ready to be repopulated with a new program image.
/// `execve` uses this instead of `destroy_address_space` to replace the
/// calling task's image while keeping the same address space root (and
/// therefore the same `Task::address_space` value).
pub fn clear_user_mappings(l4: PhysicalAddress) -> KernelResult<()> {
    free_user_mappings(l4)
}

/// Nothing to do until the first address space is built by
/// `arch::x86_64::mmu`; kept as a module entry point for symmetry with the
/// rest of `mm::init`'s boot sequence.
pub fn init() -> KernelResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakdown_round_trips_canonical_address() {
        let addr = VirtualAddress::new(0xFFFF_8000_1234_5000);
        let b = VirtualAddressBreakdown::new(addr);
        assert_eq!(usize::from(b.l1_index), 0x45);
        assert_eq!(b.page_offset, 0);
    }

    #[test]
    fn entry_round_trips_frame_and_flags() {
        let mut e = PageTableEntry::empty();
        assert!(e.is_unused());
        e.set(FrameNumber::new(7), PageFlags::kernel_rw());
        assert_eq!(e.frame(), Some(FrameNumber::new(7)));
        assert!(e.flags().contains(PageFlags::WRITABLE));
    }
}
