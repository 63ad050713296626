//! ELF64 binary loader for `execve`.
//!
//! Parses a static ELF64 executable and maps its `PT_LOAD` segments into a
//! target address space. Segment bytes are written through the direct map
//! rather than through the target's own virtual addresses, since the
//! address space being built is not necessarily the one active on this
//! CPU at load time (`execve` builds the new image before switching to
//! it). Dynamic linking (`PT_DYNAMIC`, relocations, symbol resolution) is
//! out of scope: user tasks here are static binaries only.

use alloc::vec::Vec;
use core::mem;

use crate::fs::get_vfs;
use crate::mm::{frame_allocator, page_table, PageFlags, PhysicalAddress, VirtualAddress, FRAME_SIZE};

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ElfClass {
    None = 0,
    Elf64 = 2,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ElfData {
    None = 0,
    LittleEndian = 1,
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ElfType {
    Executable = 2,
}

pub const EM_X86_64: u16 = 62;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Elf64Header {
    pub magic: [u8; 4],
    pub class: u8,
    pub data: u8,
    pub version: u8,
    pub os_abi: u8,
    pub abi_version: u8,
    pub padding: [u8; 7],
    pub elf_type: u16,
    pub machine: u16,
    pub version2: u32,
    pub entry: u64,
    pub phoff: u64,
    pub shoff: u64,
    pub flags: u32,
    pub ehsize: u16,
    pub phentsize: u16,
    pub phnum: u16,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

pub const PT_LOAD: u32 = 1;
pub const PF_X: u32 = 0x1;
pub const PF_W: u32 = 0x2;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Elf64ProgramHeader {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_paddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

#[derive(Debug)]
pub enum ElfError {
    TooSmall,
    InvalidMagic,
    InvalidClass,
    InvalidData,
    InvalidType,
    UnsupportedMachine,
    InvalidProgramHeader,
    MapFailed,
    FileReadFailed,
}

/// A loaded executable, ready for a task to be built around.
pub struct LoadedImage {
    pub entry_point: u64,
    /// Highest address touched by any segment, page-rounded up; a
    /// reasonable starting point for `brk`.
    pub initial_break: u64,
}

pub struct ElfLoader;

impl Default for ElfLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ElfLoader {
    pub fn new() -> Self {
        Self
    }

    fn parse_header(&self, data: &[u8]) -> Result<Elf64Header, ElfError> {
        if data.len() < mem::size_of::<Elf64Header>() {
            return Err(ElfError::TooSmall);
        }
        // SAFETY: length checked above; Elf64Header is repr(C) and Copy, and
        // the value is copied out immediately rather than referenced.
        let header = unsafe { *(data.as_ptr() as *const Elf64Header) };
        Ok(header)
    }

    fn validate_header(&self, header: &Elf64Header) -> Result<(), ElfError> {
        if header.magic != ELF_MAGIC {
            return Err(ElfError::InvalidMagic);
        }
        if header.class != ElfClass::Elf64 as u8 {
            return Err(ElfError::InvalidClass);
        }
        if header.data != ElfData::LittleEndian as u8 {
            return Err(ElfError::InvalidData);
        }
        if header.elf_type != ElfType::Executable as u16 {
            return Err(ElfError::InvalidType);
        }
        if header.machine != EM_X86_64 {
            return Err(ElfError::UnsupportedMachine);
        }
        Ok(())
    }

    fn parse_program_headers(
        &self,
        data: &[u8],
        header: &Elf64Header,
    ) -> Result<Vec<Elf64ProgramHeader>, ElfError> {
        let mut headers = Vec::new();
        let ph_offset = header.phoff as usize;
        let ph_size = header.phentsize as usize;
        for i in 0..header.phnum as usize {
            let offset = ph_offset + i * ph_size;
            if offset + mem::size_of::<Elf64ProgramHeader>() > data.len() {
                return Err(ElfError::InvalidProgramHeader);
            }
            // SAFETY: bounds checked above; copied out immediately.
            let ph = unsafe { *(data[offset..].as_ptr() as *const Elf64ProgramHeader) };
            headers.push(ph);
        }
        Ok(headers)
    }

    /// Validates `data` as a static x86-64 ELF64 executable and returns its
    /// program headers alongside the parsed file header.
    pub fn parse(&self, data: &[u8]) -> Result<(Elf64Header, Vec<Elf64ProgramHeader>), ElfError> {
        let header = self.parse_header(data)?;
        self.validate_header(&header)?;
        let phdrs = self.parse_program_headers(data, &header)?;
        Ok((header, phdrs))
    }

    /// Maps every `PT_LOAD` segment of `data` into the address space rooted
    /// at `l4`, zero-filling BSS, and returns the entry point and a
    /// starting `brk` address above the highest mapped byte.
    pub fn load_into_address_space(
        &self,
        data: &[u8],
        l4: PhysicalAddress,
    ) -> Result<LoadedImage, ElfError> {
        let (header, phdrs) = self.parse(data)?;
        let mut highest = 0u64;

        for ph in phdrs.iter().filter(|p| p.p_type == PT_LOAD) {
            let page_start = ph.p_vaddr & !0xFFF;
            let page_end = (ph.p_vaddr + ph.p_memsz + 0xFFF) & !0xFFF;
            let mut flags = PageFlags::USER;
            if ph.p_flags & PF_W != 0 {
                flags |= PageFlags::WRITABLE;
            }
            if ph.p_flags & PF_X == 0 {
                flags |= PageFlags::NO_EXECUTE;
            }

            let mut page = page_start;
            while page < page_end {
                let frame = frame_allocator().alloc().map_err(|_| ElfError::MapFailed)?;
                // SAFETY: `frame` was just allocated and is not yet mapped
                // anywhere; zeroing it through the direct map is always
                // valid.
                unsafe {
                    core::ptr::write_bytes(
                        crate::mm::phys_to_virt(frame.phys_addr() as usize) as *mut u8,
                        0,
                        FRAME_SIZE,
                    );
                }
                page_table::map_page(l4, VirtualAddress::new(page), frame, flags)
                    .map_err(|_| ElfError::MapFailed)?;
                page += FRAME_SIZE as u64;
            }

            if ph.p_filesz > 0 {
                let src_start = ph.p_offset as usize;
                let src_end = src_start + ph.p_filesz as usize;
                if src_end > data.len() {
                    return Err(ElfError::InvalidProgramHeader);
                }
                write_through_direct_map(l4, ph.p_vaddr, &data[src_start..src_end])?;
            }

            highest = highest.max(page_end);
        }

        Ok(LoadedImage { entry_point: header.entry, initial_break: highest })
    }
}

/// Copies `bytes` into the already-mapped pages of `l4` starting at
/// `vaddr`, translating each destination page to its backing frame and
/// writing through the direct map. Used instead of dereferencing `vaddr`
/// directly because `l4` need not be the active address space.
fn write_through_direct_map(l4: PhysicalAddress, vaddr: u64, bytes: &[u8]) -> Result<(), ElfError> {
    let mut written = 0usize;
    while written < bytes.len() {
        let cur = vaddr + written as u64;
        let page = cur & !0xFFF;
        let page_off = (cur - page) as usize;
        let (frame, _flags) =
            page_table::translate(l4, VirtualAddress::new(page)).ok_or(ElfError::MapFailed)?;
        let chunk = (FRAME_SIZE - page_off).min(bytes.len() - written);
        // SAFETY: `frame` backs a page this loader just mapped; writing
        // within [page_off, page_off + chunk) stays inside the frame.
        unsafe {
            let dst = (crate::mm::phys_to_virt(frame.phys_addr() as usize) as *mut u8).add(page_off);
            core::ptr::copy_nonoverlapping(bytes[written..written + chunk].as_ptr(), dst, chunk);
        }
        written += chunk;
    }
    Ok(())
}

/// Reads an ELF64 executable from the root filesystem. Used by `execve`.
pub fn read_elf_file(path: &str) -> Result<Vec<u8>, ElfError> {
    let vfs = get_vfs().read();
    let node = vfs.resolve_path(path).map_err(|_| ElfError::FileReadFailed)?;
    let metadata = node.metadata().map_err(|_| ElfError::FileReadFailed)?;
    let mut buffer = alloc::vec![0u8; metadata.size];
    node.read(0, &mut buffer).map_err(|_| ElfError::FileReadFailed)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn make_minimal_elf(entry: u64, vaddr: u64, memsz: u64, filesz: u64) -> Vec<u8> {
        let header_size = mem::size_of::<Elf64Header>();
        let ph_size = mem::size_of::<Elf64ProgramHeader>();
        let mut buf = vec![0u8; header_size + ph_size + filesz as usize];

        buf[0..4].copy_from_slice(&ELF_MAGIC);
        buf[4] = ElfClass::Elf64 as u8;
        buf[5] = ElfData::LittleEndian as u8;
        buf[6] = 1;
        buf[16..18].copy_from_slice(&(ElfType::Executable as u16).to_le_bytes());
        buf[18..20].copy_from_slice(&EM_X86_64.to_le_bytes());
        buf[24..32].copy_from_slice(&entry.to_le_bytes());
        buf[32..40].copy_from_slice(&(header_size as u64).to_le_bytes());
        buf[52..54].copy_from_slice(&(header_size as u16).to_le_bytes());
        buf[54..56].copy_from_slice(&(ph_size as u16).to_le_bytes());
        buf[56..58].copy_from_slice(&1u16.to_le_bytes());

        let ph_offset = header_size;
        buf[ph_offset..ph_offset + 4].copy_from_slice(&PT_LOAD.to_le_bytes());
        buf[ph_offset + 4..ph_offset + 8].copy_from_slice(&(PF_X | PF_W).to_le_bytes());
        let file_offset = (header_size + ph_size) as u64;
        buf[ph_offset + 8..ph_offset + 16].copy_from_slice(&file_offset.to_le_bytes());
        buf[ph_offset + 16..ph_offset + 24].copy_from_slice(&vaddr.to_le_bytes());
        buf[ph_offset + 32..ph_offset + 40].copy_from_slice(&filesz.to_le_bytes());
        buf[ph_offset + 40..ph_offset + 48].copy_from_slice(&memsz.to_le_bytes());
        buf[ph_offset + 48..ph_offset + 56].copy_from_slice(&0x1000u64.to_le_bytes());

        buf
    }

    #[test]
    fn rejects_bad_magic() {
        let loader = ElfLoader::new();
        let data = vec![0u8; 128];
        assert!(matches!(loader.parse(&data), Err(ElfError::InvalidMagic)));
    }

    #[test]
    fn rejects_truncated_header() {
        let loader = ElfLoader::new();
        let data = vec![0x7f, b'E', b'L', b'F'];
        assert!(matches!(loader.parse(&data), Err(ElfError::TooSmall)));
    }

    #[test]
    fn parses_minimal_static_binary() {
        let loader = ElfLoader::new();
        let data = make_minimal_elf(0x40_0000, 0x40_0000, 0x2000, 16);
        let (header, phdrs) = loader.parse(&data).expect("valid minimal ELF");
        assert_eq!(header.entry, 0x40_0000);
        assert_eq!(phdrs.len(), 1);
        assert_eq!(phdrs[0].p_type, PT_LOAD);
    }

    #[test]
    fn rejects_32_bit_class() {
        let loader = ElfLoader::new();
        let mut data = make_minimal_elf(0x1000, 0x1000, 0x1000, 0);
        data[4] = ElfClass::None as u8;
        assert!(matches!(loader.parse(&data), Err(ElfError::InvalidClass)));
    }
}
