//! ELF32 on-disk structures
//!
//! Little-endian 32-bit ELF header, section header, symbol and relocation
//! entries, decoded field by field from raw file bytes.

use crate::image::SegmentFlags;
use core::mem;
use static_assertions::const_assert_eq;

// =============================================================================
// ELF CONSTANTS
// =============================================================================

/// ELF magic number
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Identification indices
pub const EI_CLASS: usize = 4;
/// Data encoding index
pub const EI_DATA: usize = 5;
/// Identification version index
pub const EI_VERSION: usize = 6;

/// 32-bit objects
pub const ELFCLASS32: u8 = 1;
/// Little endian
pub const ELFDATA2LSB: u8 = 1;
/// Current version
pub const EV_CURRENT: u8 = 1;

/// ELF types
pub mod elf_type {
    pub const ET_NONE: u16 = 0;
    pub const ET_REL: u16 = 1;
    pub const ET_EXEC: u16 = 2;
    pub const ET_DYN: u16 = 3;
    pub const ET_CORE: u16 = 4;
}

/// ELF machine types
pub mod machine {
    pub const EM_386: u16 = 3;
    pub const EM_ARM: u16 = 40;
}

/// Section header types
pub mod sht {
    pub const SHT_NULL: u32 = 0;
    pub const SHT_PROGBITS: u32 = 1;
    pub const SHT_SYMTAB: u32 = 2;
    pub const SHT_STRTAB: u32 = 3;
    pub const SHT_RELA: u32 = 4;
    pub const SHT_NOBITS: u32 = 8;
    pub const SHT_REL: u32 = 9;
    pub const SHT_DYNSYM: u32 = 11;
}

/// Section header flags
pub mod shf {
    pub const SHF_WRITE: u32 = 1;
    pub const SHF_ALLOC: u32 = 2;
    pub const SHF_EXECINSTR: u32 = 4;
}

/// Special section indices
pub mod shn {
    pub const SHN_UNDEF: u16 = 0;
    pub const SHN_LORESERVE: u16 = 0xFF00;
    pub const SHN_ABS: u16 = 0xFFF1;
    pub const SHN_COMMON: u16 = 0xFFF2;
}

// =============================================================================
// ELF STRUCTURES
// =============================================================================

/// ELF32 file header
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Elf32Ehdr {
    /// Magic number and info
    pub e_ident: [u8; 16],
    /// Object file type
    pub e_type: u16,
    /// Machine type
    pub e_machine: u16,
    /// Object file version
    pub e_version: u32,
    /// Entry point address
    pub e_entry: u32,
    /// Program header offset
    pub e_phoff: u32,
    /// Section header offset
    pub e_shoff: u32,
    /// Processor-specific flags
    pub e_flags: u32,
    /// ELF header size
    pub e_ehsize: u16,
    /// Program header entry size
    pub e_phentsize: u16,
    /// Program header count
    pub e_phnum: u16,
    /// Section header entry size
    pub e_shentsize: u16,
    /// Section header count
    pub e_shnum: u16,
    /// Section name string table index
    pub e_shstrndx: u16,
}

/// ELF32 section header
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Elf32Shdr {
    /// Name offset in the section name table
    pub sh_name: u32,
    /// Section type
    pub sh_type: u32,
    /// Section flags
    pub sh_flags: u32,
    /// Link address
    pub sh_addr: u32,
    /// File offset
    pub sh_offset: u32,
    /// Size in bytes
    pub sh_size: u32,
    /// Associated section
    pub sh_link: u32,
    /// Extra information
    pub sh_info: u32,
    /// Required alignment
    pub sh_addralign: u32,
    /// Entry size for table sections
    pub sh_entsize: u32,
}

/// ELF32 symbol table entry
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Elf32Sym {
    /// Name offset in the linked string table
    pub st_name: u32,
    /// Value
    pub st_value: u32,
    /// Size
    pub st_size: u32,
    /// Type and binding
    pub st_info: u8,
    /// Visibility
    pub st_other: u8,
    /// Section index
    pub st_shndx: u16,
}

/// ELF32 relocation entry (implicit addend)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Elf32Rel {
    /// Offset of the patched word
    pub r_offset: u32,
    /// Symbol index and relocation type
    pub r_info: u32,
}

/// ELF32 relocation entry (explicit addend)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Elf32Rela {
    /// Offset of the patched word
    pub r_offset: u32,
    /// Symbol index and relocation type
    pub r_info: u32,
    /// Addend
    pub r_addend: i32,
}

/// On-disk size of [`Elf32Ehdr`]
pub const EHDR_SIZE: usize = 52;
/// On-disk size of [`Elf32Shdr`]
pub const SHDR_SIZE: usize = 40;
/// On-disk size of [`Elf32Sym`]
pub const SYM_SIZE: usize = 16;
/// On-disk size of [`Elf32Rel`]
pub const REL_SIZE: usize = 8;
/// On-disk size of [`Elf32Rela`]
pub const RELA_SIZE: usize = 12;

const_assert_eq!(mem::size_of::<Elf32Ehdr>(), EHDR_SIZE);
const_assert_eq!(mem::size_of::<Elf32Shdr>(), SHDR_SIZE);
const_assert_eq!(mem::size_of::<Elf32Sym>(), SYM_SIZE);
const_assert_eq!(mem::size_of::<Elf32Rel>(), REL_SIZE);
const_assert_eq!(mem::size_of::<Elf32Rela>(), RELA_SIZE);

fn u16_at(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([data[off], data[off + 1]])
}

fn u32_at(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

impl Elf32Ehdr {
    /// Decode a header
    pub fn parse(data: &[u8; EHDR_SIZE]) -> Self {
        let mut e_ident = [0u8; 16];
        e_ident.copy_from_slice(&data[..16]);
        Self {
            e_ident,
            e_type: u16_at(data, 16),
            e_machine: u16_at(data, 18),
            e_version: u32_at(data, 20),
            e_entry: u32_at(data, 24),
            e_phoff: u32_at(data, 28),
            e_shoff: u32_at(data, 32),
            e_flags: u32_at(data, 36),
            e_ehsize: u16_at(data, 40),
            e_phentsize: u16_at(data, 42),
            e_phnum: u16_at(data, 44),
            e_shentsize: u16_at(data, 46),
            e_shnum: u16_at(data, 48),
            e_shstrndx: u16_at(data, 50),
        }
    }

    /// Is this a little-endian ELF32 image of a type we can place?
    pub fn is_supported(&self) -> bool {
        self.e_ident[..4] == ELF_MAGIC
            && self.e_ident[EI_CLASS] == ELFCLASS32
            && self.e_ident[EI_DATA] == ELFDATA2LSB
            && self.e_ident[EI_VERSION] == EV_CURRENT
            && matches!(self.e_type, elf_type::ET_REL | elf_type::ET_EXEC)
    }

    /// Is this a relocatable object?
    pub fn is_relocatable(&self) -> bool {
        self.e_type == elf_type::ET_REL
    }
}

impl Elf32Shdr {
    /// Decode a section header from at least [`SHDR_SIZE`] bytes
    pub fn parse(data: &[u8]) -> Self {
        Self {
            sh_name: u32_at(data, 0),
            sh_type: u32_at(data, 4),
            sh_flags: u32_at(data, 8),
            sh_addr: u32_at(data, 12),
            sh_offset: u32_at(data, 16),
            sh_size: u32_at(data, 20),
            sh_link: u32_at(data, 24),
            sh_info: u32_at(data, 28),
            sh_addralign: u32_at(data, 32),
            sh_entsize: u32_at(data, 36),
        }
    }

    /// Does the section occupy memory at runtime?
    pub fn is_alloc(&self) -> bool {
        self.sh_flags & shf::SHF_ALLOC != 0
    }

    /// Is the section pure runtime storage with no file contents?
    pub fn is_nobits(&self) -> bool {
        self.sh_type == sht::SHT_NOBITS
    }

    /// Permissions the section asks for
    pub fn segment_flags(&self) -> SegmentFlags {
        let mut flags = SegmentFlags::READ;
        if self.sh_flags & shf::SHF_WRITE != 0 {
            flags |= SegmentFlags::WRITE;
        }
        if self.sh_flags & shf::SHF_EXECINSTR != 0 {
            flags |= SegmentFlags::EXECUTE;
        }
        flags
    }

    /// Does the link range of this section contain `addr`?
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.sh_addr && addr - self.sh_addr < self.sh_size
    }
}

impl Elf32Sym {
    /// Decode a symbol from at least [`SYM_SIZE`] bytes
    pub fn parse(data: &[u8]) -> Self {
        Self {
            st_name: u32_at(data, 0),
            st_value: u32_at(data, 4),
            st_size: u32_at(data, 8),
            st_info: data[12],
            st_other: data[13],
            st_shndx: u16_at(data, 14),
        }
    }

    /// Symbol binding
    pub fn binding(&self) -> u8 {
        self.st_info >> 4
    }

    /// Symbol type
    pub fn symbol_type(&self) -> u8 {
        self.st_info & 0xF
    }
}

impl Elf32Rela {
    /// Decode a `SHT_RELA` entry
    pub fn parse(data: &[u8]) -> Self {
        Self {
            r_offset: u32_at(data, 0),
            r_info: u32_at(data, 4),
            r_addend: u32_at(data, 8) as i32,
        }
    }

    /// Decode a `SHT_REL` entry; the addend is implicit
    pub fn parse_rel(data: &[u8]) -> Elf32Rel {
        Elf32Rel {
            r_offset: u32_at(data, 0),
            r_info: u32_at(data, 4),
        }
    }
}

impl Elf32Rel {
    /// Symbol table index
    pub fn sym(&self) -> usize {
        (self.r_info >> 8) as usize
    }

    /// Relocation type
    pub fn rel_type(&self) -> u32 {
        self.r_info & 0xFF
    }
}

impl Elf32Rela {
    /// Symbol table index
    pub fn sym(&self) -> usize {
        (self.r_info >> 8) as usize
    }

    /// Relocation type
    pub fn rel_type(&self) -> u32 {
        self.r_info & 0xFF
    }
}

/// NUL-terminated string at `offset` in a string table
pub fn str_at(table: &[u8], offset: usize) -> Option<&str> {
    let tail = table.get(offset..)?;
    let end = tail.iter().position(|&b| b == 0)?;
    core::str::from_utf8(&tail[..end]).ok()
}
