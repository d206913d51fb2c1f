//! ELF64 format support
//!
//! On-disk structures and constants for the 64-bit Executable and Linkable
//! Format, restricted to what the hypervisor's own toolchain emits. Fields
//! are decoded explicitly as little-endian reads through the bounds-checked
//! view rather than by casting into packed structs, so a truncated or
//! corrupted table can never be read past the end of the buffer.

use bitflags::bitflags;
use static_assertions::const_assert_eq;

use crate::error::Result;
use crate::view::Bytes;

/// ELF header size on disk
pub const EHDR_SIZE: u64 = 64;
/// Program header entry size on disk
pub const PHDR_SIZE: u64 = 56;
/// Section header entry size on disk
pub const SHDR_SIZE: u64 = 64;
/// Symbol table entry size on disk
pub const SYM_SIZE: u64 = 24;
/// Relocation (rela) entry size on disk
pub const RELA_SIZE: u64 = 24;
/// Dynamic entry size on disk
pub const DYN_SIZE: u64 = 16;

// A rela entry is three 64-bit words, a dynamic entry two.
const_assert_eq!(RELA_SIZE, 3 * 8);
const_assert_eq!(DYN_SIZE, 2 * 8);

/// ELF64 header
#[derive(Debug, Clone, Copy)]
pub struct ElfHeader {
    /// Identification bytes (magic, class, data, version, ABI)
    pub ident: [u8; 16],
    /// File type
    pub file_type: u16,
    /// Machine architecture
    pub machine: u16,
    /// ELF version
    pub version: u32,
    /// Entry point virtual address
    pub entry: u64,
    /// Program header table file offset
    pub phoff: u64,
    /// Section header table file offset
    pub shoff: u64,
    /// Processor-specific flags
    pub flags: u32,
    /// ELF header size
    pub ehsize: u16,
    /// Program header entry size
    pub phentsize: u16,
    /// Program header entry count
    pub phnum: u16,
    /// Section header entry size
    pub shentsize: u16,
    /// Section header entry count
    pub shnum: u16,
    /// Section name string table index
    pub shstrndx: u16,
}

impl ElfHeader {
    /// Decode the header at the start of the image.
    pub fn read(view: &Bytes<'_>) -> Result<Self> {
        let mut ident = [0u8; 16];
        ident.copy_from_slice(view.range(0, 16)?);
        Ok(Self {
            ident,
            file_type: view.read_u16(16)?,
            machine: view.read_u16(18)?,
            version: view.read_u32(20)?,
            entry: view.read_u64(24)?,
            phoff: view.read_u64(32)?,
            shoff: view.read_u64(40)?,
            flags: view.read_u32(48)?,
            ehsize: view.read_u16(52)?,
            phentsize: view.read_u16(54)?,
            phnum: view.read_u16(56)?,
            shentsize: view.read_u16(58)?,
            shnum: view.read_u16(60)?,
            shstrndx: view.read_u16(62)?,
        })
    }
}

/// ELF64 program header
#[derive(Debug, Clone, Copy)]
pub struct ProgramHeader {
    /// Segment type
    pub segment_type: u32,
    /// Segment flags
    pub flags: u32,
    /// File offset
    pub offset: u64,
    /// Virtual address
    pub vaddr: u64,
    /// Physical address
    pub paddr: u64,
    /// Segment size in file
    pub filesz: u64,
    /// Segment size in memory
    pub memsz: u64,
    /// Segment alignment
    pub align: u64,
}

impl ProgramHeader {
    /// Decode one program header at `offset` in the image.
    pub fn read(view: &Bytes<'_>, offset: u64) -> Result<Self> {
        Ok(Self {
            segment_type: view.read_u32(offset)?,
            flags: view.read_u32(offset + 4)?,
            offset: view.read_u64(offset + 8)?,
            vaddr: view.read_u64(offset + 16)?,
            paddr: view.read_u64(offset + 24)?,
            filesz: view.read_u64(offset + 32)?,
            memsz: view.read_u64(offset + 40)?,
            align: view.read_u64(offset + 48)?,
        })
    }

    /// Typed view of the segment permission bits.
    pub fn permissions(&self) -> SegmentFlags {
        SegmentFlags::from_bits_truncate(self.flags)
    }
}

/// ELF64 section header
#[derive(Debug, Clone, Copy)]
pub struct SectionHeader {
    /// Section name (index into the section name string table)
    pub name: u32,
    /// Section type
    pub section_type: u32,
    /// Section flags
    pub flags: u64,
    /// Virtual address
    pub addr: u64,
    /// File offset
    pub offset: u64,
    /// Section size
    pub size: u64,
    /// Section link
    pub link: u32,
    /// Section info
    pub info: u32,
    /// Section alignment
    pub addralign: u64,
    /// Entry size for table sections
    pub entsize: u64,
}

impl SectionHeader {
    /// Decode one section header at `offset` in the image.
    pub fn read(view: &Bytes<'_>, offset: u64) -> Result<Self> {
        Ok(Self {
            name: view.read_u32(offset)?,
            section_type: view.read_u32(offset + 4)?,
            flags: view.read_u64(offset + 8)?,
            addr: view.read_u64(offset + 16)?,
            offset: view.read_u64(offset + 24)?,
            size: view.read_u64(offset + 32)?,
            link: view.read_u32(offset + 40)?,
            info: view.read_u32(offset + 44)?,
            addralign: view.read_u64(offset + 48)?,
            entsize: view.read_u64(offset + 56)?,
        })
    }

    /// Typed view of the section flag bits.
    pub fn section_flags(&self) -> SectionFlags {
        SectionFlags::from_bits_truncate(self.flags)
    }

    /// Whether the section occupies bytes in the file (SHT_NOBITS and
    /// SHT_NULL do not).
    pub fn has_file_data(&self) -> bool {
        self.section_type != constants::SHT_NOBITS && self.section_type != constants::SHT_NULL
    }
}

/// ELF64 symbol table entry
#[derive(Debug, Clone, Copy)]
pub struct Symbol {
    /// Symbol name (index into the associated string table)
    pub name: u32,
    /// Symbol binding and type
    pub info: u8,
    /// Symbol visibility
    pub other: u8,
    /// Defining section index
    pub section_index: u16,
    /// Symbol value
    pub value: u64,
    /// Symbol size
    pub size: u64,
}

impl Symbol {
    /// Decode one symbol entry at `offset` in the image.
    pub fn read(view: &Bytes<'_>, offset: u64) -> Result<Self> {
        Ok(Self {
            name: view.read_u32(offset)?,
            info: view.read_u8(offset + 4)?,
            other: view.read_u8(offset + 5)?,
            section_index: view.read_u16(offset + 6)?,
            value: view.read_u64(offset + 8)?,
            size: view.read_u64(offset + 16)?,
        })
    }

    /// Symbol binding (upper nibble of `info`).
    pub fn bind(&self) -> u8 {
        self.info >> 4
    }

    /// Whether any section defines this symbol.
    pub fn is_defined(&self) -> bool {
        self.section_index != constants::SHN_UNDEF
    }

    /// Whether the symbol value is absolute and must not be rebased.
    pub fn is_absolute(&self) -> bool {
        self.section_index == constants::SHN_ABS
    }
}

/// ELF64 relocation entry with addend
#[derive(Debug, Clone, Copy)]
pub struct Rela {
    /// Address of the patch target, in link space
    pub offset: u64,
    /// Packed symbol index and relocation type
    pub info: u64,
    /// Constant addend
    pub addend: i64,
}

impl Rela {
    /// Decode one rela entry at `offset` in the image.
    pub fn read(view: &Bytes<'_>, offset: u64) -> Result<Self> {
        Ok(Self {
            offset: view.read_u64(offset)?,
            info: view.read_u64(offset + 8)?,
            addend: view.read_i64(offset + 16)?,
        })
    }

    /// Index of the referenced symbol.
    pub fn symbol_index(&self) -> u32 {
        (self.info >> 32) as u32
    }

    /// Raw relocation type tag.
    pub fn reloc_type(&self) -> u32 {
        self.info as u32
    }
}

/// ELF64 dynamic entry
#[derive(Debug, Clone, Copy)]
pub struct Dynamic {
    /// Dynamic entry tag
    pub tag: u64,
    /// Value or address
    pub value: u64,
}

impl Dynamic {
    /// Decode one dynamic entry at `offset` in the image.
    pub fn read(view: &Bytes<'_>, offset: u64) -> Result<Self> {
        Ok(Self {
            tag: view.read_u64(offset)?,
            value: view.read_u64(offset + 8)?,
        })
    }
}

/// The closed set of relocation kinds this loader understands.
///
/// The hypervisor's toolchain emits exactly these; anything else is a
/// build-system bug and surfaces as an unsupported-relocation failure
/// rather than being patched blindly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// R_X86_64_NONE - nothing to patch
    None,
    /// R_X86_64_64 - absolute 64-bit, symbol + addend
    Abs64,
    /// R_X86_64_GLOB_DAT - GOT slot, symbol address
    GlobDat,
    /// R_X86_64_JUMP_SLOT - PLT slot bound eagerly, symbol address
    JumpSlot,
    /// R_X86_64_RELATIVE - load base + addend, no symbol
    Relative,
}

impl RelocKind {
    /// Map a raw type tag onto the supported set.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            constants::R_X86_64_NONE => Some(Self::None),
            constants::R_X86_64_64 => Some(Self::Abs64),
            constants::R_X86_64_GLOB_DAT => Some(Self::GlobDat),
            constants::R_X86_64_JUMP_SLOT => Some(Self::JumpSlot),
            constants::R_X86_64_RELATIVE => Some(Self::Relative),
            _ => None,
        }
    }

    /// Whether the computed value depends on a resolved symbol.
    pub fn needs_symbol(&self) -> bool {
        matches!(self, Self::Abs64 | Self::GlobDat | Self::JumpSlot)
    }
}

bitflags! {
    /// Section header flags (`sh_flags`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u64 {
        /// Writable during execution
        const WRITE = 0x1;
        /// Occupies memory during execution
        const ALLOC = 0x2;
        /// Contains executable instructions
        const EXECINSTR = 0x4;
        /// Holds thread-local data
        const TLS = 0x400;
    }
}

bitflags! {
    /// Program header flags (`p_flags`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        /// Executable
        const X = 0x1;
        /// Writable
        const W = 0x2;
        /// Readable
        const R = 0x4;
    }
}

/// ELF constants
pub mod constants {
    /// ELF magic number
    pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

    /// ELF classes
    pub const ELFCLASS64: u8 = 2;

    /// ELF data encodings
    pub const ELFDATA2LSB: u8 = 1; // Little endian

    /// ELF versions
    pub const EV_CURRENT: u8 = 1;

    /// ELF machine types
    pub const EM_X86_64: u16 = 62; // AMD x86-64 architecture

    /// Program header types
    pub const PT_LOAD: u32 = 1; // Loadable segment
    pub const PT_DYNAMIC: u32 = 2; // Dynamic linking information

    /// Section header types
    pub const SHT_NULL: u32 = 0; // Inactive section
    pub const SHT_PROGBITS: u32 = 1; // Program data
    pub const SHT_SYMTAB: u32 = 2; // Symbol table
    pub const SHT_STRTAB: u32 = 3; // String table
    pub const SHT_RELA: u32 = 4; // Relocation entries with addends
    pub const SHT_DYNAMIC: u32 = 6; // Dynamic linking information
    pub const SHT_NOBITS: u32 = 8; // Program space with no data (bss)
    pub const SHT_DYNSYM: u32 = 11; // Dynamic linker symbol table
    pub const SHT_INIT_ARRAY: u32 = 14; // Array of constructors
    pub const SHT_FINI_ARRAY: u32 = 15; // Array of destructors

    /// Special section indices
    pub const SHN_UNDEF: u16 = 0; // Undefined symbol
    pub const SHN_ABS: u16 = 0xfff1; // Absolute value, never rebased

    /// Symbol bindings
    pub const STB_LOCAL: u8 = 0; // Local symbol
    pub const STB_GLOBAL: u8 = 1; // Global symbol
    pub const STB_WEAK: u8 = 2; // Weak symbol

    /// Dynamic tags
    pub const DT_NULL: u64 = 0; // Marks end of dynamic section
    pub const DT_RELA: u64 = 7; // Address of Rela relocs
    pub const DT_RELASZ: u64 = 8; // Total size of Rela relocs
    pub const DT_RELAENT: u64 = 9; // Size of one Rela reloc
    pub const DT_INIT: u64 = 12; // Address of init function
    pub const DT_FINI: u64 = 13; // Address of termination function

    /// Relocation types (x86-64)
    pub const R_X86_64_NONE: u32 = 0;
    pub const R_X86_64_64: u32 = 1;
    pub const R_X86_64_GLOB_DAT: u32 = 6;
    pub const R_X86_64_JUMP_SLOT: u32 = 7;
    pub const R_X86_64_RELATIVE: u32 = 8;
}
