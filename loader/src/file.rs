//! ELF64 image parser
//!
//! [`ElfFile`] is a validated, indexed view over one raw module image. All
//! structural validation happens in [`ElfFile::new`]; a value that fails any
//! check is never constructed, so every later stage (section lookup,
//! relocation) operates on ranges already known to lie inside the buffer.
//!
//! The image bytes are borrowed, not copied: compiled modules can be large
//! and the caller owns the backing memory for the file's lifetime.

use core::cell::Cell;

use log::debug;

use crate::elf64::constants::*;
use crate::elf64::{
    Dynamic, ElfHeader, ProgramHeader, Rela, SectionHeader, Symbol, DYN_SIZE, EHDR_SIZE,
    PHDR_SIZE, RELA_SIZE, SHDR_SIZE, SYM_SIZE,
};
use crate::error::{ElfError, Result};
use crate::view::Bytes;

/// Where a registered image lives: the execution base backing memory and
/// the link-time base its symbol values are expressed against.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoadAddrs {
    pub exec: u64,
    pub virt: u64,
}

/// Location of the symbol table and its associated string table.
#[derive(Debug, Clone, Copy)]
struct SymtabRef {
    offset: u64,
    count: u64,
    strtab_offset: u64,
    strtab_size: u64,
}

/// Location of the relocation table, from the dynamic section.
#[derive(Debug, Clone, Copy)]
struct RelaRef {
    offset: u64,
    count: u64,
}

/// One parsed, validated ELF64 module image.
#[derive(Debug)]
pub struct ElfFile<'a> {
    view: Bytes<'a>,
    ehdr: ElfHeader,
    shstr_offset: u64,
    shstr_size: u64,
    symtab: Option<SymtabRef>,
    rela: Option<RelaRef>,
    init: u64,
    fini: u64,
    load: Cell<Option<LoadAddrs>>,
}

impl<'a> ElfFile<'a> {
    /// Parse and validate a raw ELF64 image.
    ///
    /// The buffer is untrusted input: every offset, size, count and index
    /// derived from it is checked against the whole buffer before use.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let view = Bytes::new(data);
        if view.is_empty() {
            return Err(ElfError::EmptyImage);
        }
        if view.len() < EHDR_SIZE {
            return Err(ElfError::TruncatedHeader);
        }

        let ehdr = ElfHeader::read(&view)?;
        Self::check_ident(&ehdr)?;

        Self::check_program_headers(&view, &ehdr)?;
        let (shstr_offset, shstr_size) = Self::check_section_headers(&view, &ehdr)?;
        let symtab = Self::find_symtab(&view, &ehdr)?;
        let (rela, init, fini) = Self::parse_dynamic(&view, &ehdr)?;

        debug!(
            "parsed ELF64 image: {} sections, {} symbols, {} relocations",
            ehdr.shnum,
            symtab.map_or(0, |s| s.count),
            rela.map_or(0, |r| r.count),
        );

        Ok(Self {
            view,
            ehdr,
            shstr_offset,
            shstr_size,
            symtab,
            rela,
            init,
            fini,
            load: Cell::new(None),
        })
    }

    fn check_ident(ehdr: &ElfHeader) -> Result {
        if ehdr.ident[0..4] != ELF_MAGIC {
            return Err(ElfError::BadMagic);
        }
        if ehdr.ident[4] != ELFCLASS64 {
            return Err(ElfError::UnsupportedClass(ehdr.ident[4]));
        }
        if ehdr.ident[5] != ELFDATA2LSB {
            return Err(ElfError::UnsupportedEncoding(ehdr.ident[5]));
        }
        if ehdr.ident[6] != EV_CURRENT {
            return Err(ElfError::UnsupportedVersion(ehdr.ident[6]));
        }
        if ehdr.machine != EM_X86_64 {
            return Err(ElfError::UnsupportedMachine(ehdr.machine));
        }
        Ok(())
    }

    /// Validate the program header table and each segment's file range.
    fn check_program_headers(view: &Bytes<'a>, ehdr: &ElfHeader) -> Result {
        if ehdr.phnum == 0 {
            return Ok(());
        }
        let entsize = ehdr.phentsize as u64;
        if entsize < PHDR_SIZE {
            return Err(ElfError::BadEntrySize);
        }
        view.check_range(ehdr.phoff, ehdr.phnum as u64 * entsize)?;

        for i in 0..ehdr.phnum as u64 {
            let ph = ProgramHeader::read(view, ehdr.phoff + i * entsize)?;
            if ph.filesz > 0 {
                view.check_range(ph.offset, ph.filesz)?;
            }
            if ph.segment_type == PT_LOAD && ph.memsz < ph.filesz {
                return Err(ElfError::OutOfBounds);
            }
        }
        Ok(())
    }

    /// Validate the section header table, every section's file range and
    /// every section name, and locate the section name string table.
    fn check_section_headers(view: &Bytes<'a>, ehdr: &ElfHeader) -> Result<(u64, u64)> {
        if ehdr.shnum == 0 || ehdr.shstrndx >= ehdr.shnum {
            return Err(ElfError::BadSectionIndex(ehdr.shstrndx));
        }
        let entsize = ehdr.shentsize as u64;
        if entsize < SHDR_SIZE {
            return Err(ElfError::BadEntrySize);
        }
        view.check_range(ehdr.shoff, ehdr.shnum as u64 * entsize)?;

        let shstr = SectionHeader::read(view, ehdr.shoff + ehdr.shstrndx as u64 * entsize)?;
        if shstr.section_type != SHT_STRTAB {
            return Err(ElfError::BadStringTable);
        }
        view.check_range(shstr.offset, shstr.size)?;

        for i in 0..ehdr.shnum as u64 {
            let sh = SectionHeader::read(view, ehdr.shoff + i * entsize)?;
            if sh.has_file_data() && sh.size > 0 {
                view.check_range(sh.offset, sh.size)?;
            }
            if sh.name as u64 >= shstr.size {
                return Err(ElfError::BadStringTable);
            }
        }
        Ok((shstr.offset, shstr.size))
    }

    /// Locate the symbol table by section type (`SHT_DYNSYM` preferred,
    /// `SHT_SYMTAB` otherwise) and validate it together with the string
    /// table its `sh_link` points at.
    fn find_symtab(view: &Bytes<'a>, ehdr: &ElfHeader) -> Result<Option<SymtabRef>> {
        let entsize = ehdr.shentsize as u64;
        let mut found: Option<SectionHeader> = None;

        for i in 0..ehdr.shnum as u64 {
            let sh = SectionHeader::read(view, ehdr.shoff + i * entsize)?;
            match sh.section_type {
                SHT_DYNSYM => {
                    found = Some(sh);
                    break;
                }
                SHT_SYMTAB if found.is_none() => found = Some(sh),
                _ => {}
            }
        }

        let Some(sh) = found else {
            return Ok(None);
        };

        if sh.entsize != SYM_SIZE || sh.size % SYM_SIZE != 0 {
            return Err(ElfError::BadEntrySize);
        }
        if sh.link as u64 >= ehdr.shnum as u64 {
            return Err(ElfError::BadSectionIndex(sh.link as u16));
        }
        let strtab = SectionHeader::read(view, ehdr.shoff + sh.link as u64 * entsize)?;
        if strtab.section_type != SHT_STRTAB {
            return Err(ElfError::BadStringTable);
        }

        let symtab = SymtabRef {
            offset: sh.offset,
            count: sh.size / SYM_SIZE,
            strtab_offset: strtab.offset,
            strtab_size: strtab.size,
        };

        // Pre-validate every name index so later lookups cannot fail.
        for i in 0..symtab.count {
            let sym = Symbol::read(view, symtab.offset + i * SYM_SIZE)?;
            if sym.name as u64 >= symtab.strtab_size && sym.name != 0 {
                return Err(ElfError::BadStringTable);
            }
        }
        Ok(Some(symtab))
    }

    /// Walk the dynamic section (if any) and extract the relocation table
    /// location plus the legacy init/fini function addresses.
    ///
    /// A missing dynamic section, a missing `DT_RELA` and missing
    /// `DT_INIT`/`DT_FINI` are all valid: non-PIC objects carry none of
    /// them.
    fn parse_dynamic(view: &Bytes<'a>, ehdr: &ElfHeader) -> Result<(Option<RelaRef>, u64, u64)> {
        let Some((dyn_offset, dyn_size)) = Self::find_dynamic(view, ehdr)? else {
            return Ok((None, 0, 0));
        };

        let mut rela_addr: Option<u64> = None;
        let mut relasz: Option<u64> = None;
        let mut relaent: Option<u64> = None;
        let mut init = 0u64;
        let mut fini = 0u64;

        for i in 0..dyn_size / DYN_SIZE {
            let entry = Dynamic::read(view, dyn_offset + i * DYN_SIZE)?;
            match entry.tag {
                DT_NULL => break,
                DT_RELA => rela_addr = Some(entry.value),
                DT_RELASZ => relasz = Some(entry.value),
                DT_RELAENT => relaent = Some(entry.value),
                DT_INIT => init = entry.value,
                DT_FINI => fini = entry.value,
                _ => {}
            }
        }

        let Some(addr) = rela_addr else {
            return Ok((None, init, fini));
        };
        let size = relasz.ok_or(ElfError::MissingDynamicEntry(DT_RELASZ))?;
        if relaent.is_some_and(|e| e != RELA_SIZE) || size % RELA_SIZE != 0 {
            return Err(ElfError::BadEntrySize);
        }

        let offset = Self::vaddr_to_offset(view, ehdr, addr, size)?;
        view.check_range(offset, size)?;

        Ok((
            Some(RelaRef {
                offset,
                count: size / RELA_SIZE,
            }),
            init,
            fini,
        ))
    }

    /// Find the dynamic section region: `PT_DYNAMIC` segment first, then a
    /// `SHT_DYNAMIC` section for images without program headers.
    fn find_dynamic(view: &Bytes<'a>, ehdr: &ElfHeader) -> Result<Option<(u64, u64)>> {
        for i in 0..ehdr.phnum as u64 {
            let ph = ProgramHeader::read(view, ehdr.phoff + i * ehdr.phentsize as u64)?;
            if ph.segment_type == PT_DYNAMIC {
                return Ok(Some((ph.offset, ph.filesz)));
            }
        }
        for i in 0..ehdr.shnum as u64 {
            let sh = SectionHeader::read(view, ehdr.shoff + i * ehdr.shentsize as u64)?;
            if sh.section_type == SHT_DYNAMIC {
                return Ok(Some((sh.offset, sh.size)));
            }
        }
        Ok(None)
    }

    /// Translate a link-space address range into a file offset through the
    /// `PT_LOAD` segments.
    fn vaddr_to_offset(view: &Bytes<'a>, ehdr: &ElfHeader, addr: u64, size: u64) -> Result<u64> {
        for i in 0..ehdr.phnum as u64 {
            let ph = ProgramHeader::read(view, ehdr.phoff + i * ehdr.phentsize as u64)?;
            if ph.segment_type != PT_LOAD {
                continue;
            }
            let seg_end = ph.vaddr.checked_add(ph.filesz).ok_or(ElfError::OutOfBounds)?;
            let end = addr.checked_add(size).ok_or(ElfError::OutOfBounds)?;
            if addr >= ph.vaddr && end <= seg_end {
                return Ok(ph.offset + (addr - ph.vaddr));
            }
        }
        Err(ElfError::OutOfBounds)
    }

    /// Entry point recorded in the header, in link space.
    pub fn entry(&self) -> u64 {
        self.ehdr.entry
    }

    /// Number of section headers.
    pub fn section_count(&self) -> u16 {
        self.ehdr.shnum
    }

    /// Fetch one section header by index.
    pub fn section(&self, index: u16) -> Result<SectionHeader> {
        if index >= self.ehdr.shnum {
            return Err(ElfError::BadSectionIndex(index));
        }
        SectionHeader::read(
            &self.view,
            self.ehdr.shoff + index as u64 * self.ehdr.shentsize as u64,
        )
    }

    /// Iterate over all section headers.
    pub fn sections(&self) -> Sections<'a> {
        Sections {
            view: self.view,
            offset: self.ehdr.shoff,
            entsize: self.ehdr.shentsize as u64,
            remaining: self.ehdr.shnum as u64,
        }
    }

    /// Iterate over all program headers.
    pub fn program_headers(&self) -> ProgramHeaders<'a> {
        ProgramHeaders {
            view: self.view,
            offset: self.ehdr.phoff,
            entsize: self.ehdr.phentsize as u64,
            remaining: self.ehdr.phnum as u64,
        }
    }

    /// Resolve a section's name through the section name string table.
    pub fn section_name(&self, section: &SectionHeader) -> Result<&'a [u8]> {
        let table = Bytes::new(self.view.range(self.shstr_offset, self.shstr_size)?);
        table.cstr(section.name as u64)
    }

    /// Number of symbol table entries (0 when the image has no symbols).
    pub fn symbol_count(&self) -> u64 {
        self.symtab.map_or(0, |s| s.count)
    }

    /// Fetch one symbol by index.
    pub fn symbol(&self, index: u32) -> Result<Symbol> {
        let symtab = self
            .symtab
            .ok_or(ElfError::BadSymbolIndex(index))?;
        if index as u64 >= symtab.count {
            return Err(ElfError::BadSymbolIndex(index));
        }
        Symbol::read(&self.view, symtab.offset + index as u64 * SYM_SIZE)
    }

    /// Iterate over all symbols.
    pub fn symbols(&self) -> Symbols<'a> {
        Symbols {
            view: self.view,
            offset: self.symtab.map_or(0, |s| s.offset),
            remaining: self.symbol_count(),
        }
    }

    /// Resolve a symbol's name through the symbol string table.
    pub fn symbol_name(&self, symbol: &Symbol) -> Result<&'a [u8]> {
        let symtab = self.symtab.ok_or(ElfError::BadStringTable)?;
        let table = Bytes::new(self.view.range(symtab.strtab_offset, symtab.strtab_size)?);
        table.cstr(symbol.name as u64)
    }

    /// Number of relocation entries.
    pub fn relocation_count(&self) -> u64 {
        self.rela.map_or(0, |r| r.count)
    }

    /// Iterate over all relocation entries, in table order.
    pub fn relocations(&self) -> Relocations<'a> {
        Relocations {
            view: self.view,
            offset: self.rela.map_or(0, |r| r.offset),
            remaining: self.relocation_count(),
        }
    }

    /// Legacy single init function address (`DT_INIT`), 0 when absent.
    pub fn init(&self) -> u64 {
        self.init
    }

    /// Legacy single fini function address (`DT_FINI`), 0 when absent.
    pub fn fini(&self) -> u64 {
        self.fini
    }

    /// Override the legacy init function address.
    ///
    /// The value is taken as-is; it is not validated against the image's
    /// address range. The embedder owns the decision of what to call.
    pub fn set_init(&mut self, addr: u64) {
        self.init = addr;
    }

    /// Override the legacy fini function address. Not validated, see
    /// [`ElfFile::set_init`].
    pub fn set_fini(&mut self, addr: u64) {
        self.fini = addr;
    }

    /// Lowest `PT_LOAD` virtual address, the image's link-time base.
    pub fn image_base(&self) -> u64 {
        self.program_headers()
            .filter(|ph| ph.segment_type == PT_LOAD)
            .map(|ph| ph.vaddr)
            .min()
            .unwrap_or(0)
    }

    /// Bytes of memory the loaded image spans, from the link-time base to
    /// the end of the highest `PT_LOAD` segment. The embedder sizes the
    /// execution region from this before copying the image in.
    pub fn total_memsz(&self) -> u64 {
        let base = self.image_base();
        self.program_headers()
            .filter(|ph| ph.segment_type == PT_LOAD)
            .map(|ph| ph.vaddr.saturating_add(ph.memsz).saturating_sub(base))
            .max()
            .unwrap_or(0)
    }

    /// Copy every `PT_LOAD` segment into the execution region and zero the
    /// BSS tails. `dst` must span at least [`ElfFile::total_memsz`] bytes.
    pub fn load_into(&self, dst: &mut [u8]) -> Result {
        let base = self.image_base();
        for ph in self.program_headers() {
            if ph.segment_type != PT_LOAD {
                continue;
            }
            let start = usize::try_from(ph.vaddr - base)
                .map_err(|_| ElfError::ExecRegionTooSmall)?;
            let filesz = usize::try_from(ph.filesz).map_err(|_| ElfError::ExecRegionTooSmall)?;
            let memsz = usize::try_from(ph.memsz).map_err(|_| ElfError::ExecRegionTooSmall)?;
            let end = start.checked_add(memsz).ok_or(ElfError::ExecRegionTooSmall)?;
            if end > dst.len() {
                return Err(ElfError::ExecRegionTooSmall);
            }

            let src = self.view.range(ph.offset, ph.filesz)?;
            dst[start..start + filesz].copy_from_slice(src);
            dst[start + filesz..end].fill(0);

            debug!(
                "loaded segment at {:#x}+{:#x} ({:?})",
                ph.vaddr,
                ph.memsz,
                ph.permissions()
            );
        }
        Ok(())
    }

    pub(crate) fn load_addrs(&self) -> Option<LoadAddrs> {
        self.load.get()
    }

    /// Record where the image executes. Set once, at registration.
    pub(crate) fn set_load_addrs(&self, exec: u64, virt: u64) -> Result {
        if self.load.get().is_some() {
            return Err(ElfError::AlreadyRegistered);
        }
        self.load.set(Some(LoadAddrs { exec, virt }));
        Ok(())
    }
}

/// Iterator over section headers. Ranges were validated at construction,
/// so iteration cannot fail.
pub struct Sections<'a> {
    view: Bytes<'a>,
    offset: u64,
    entsize: u64,
    remaining: u64,
}

impl Iterator for Sections<'_> {
    type Item = SectionHeader;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let sh = SectionHeader::read(&self.view, self.offset).ok()?;
        self.offset += self.entsize;
        self.remaining -= 1;
        Some(sh)
    }
}

/// Iterator over program headers.
pub struct ProgramHeaders<'a> {
    view: Bytes<'a>,
    offset: u64,
    entsize: u64,
    remaining: u64,
}

impl Iterator for ProgramHeaders<'_> {
    type Item = ProgramHeader;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let ph = ProgramHeader::read(&self.view, self.offset).ok()?;
        self.offset += self.entsize;
        self.remaining -= 1;
        Some(ph)
    }
}

/// Iterator over symbol table entries.
pub struct Symbols<'a> {
    view: Bytes<'a>,
    offset: u64,
    remaining: u64,
}

impl Iterator for Symbols<'_> {
    type Item = Symbol;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let sym = Symbol::read(&self.view, self.offset).ok()?;
        self.offset += SYM_SIZE;
        self.remaining -= 1;
        Some(sym)
    }
}

/// Iterator over relocation entries, in table order.
pub struct Relocations<'a> {
    view: Bytes<'a>,
    offset: u64,
    remaining: u64,
}

impl Iterator for Relocations<'_> {
    type Item = Rela;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let rela = Rela::read(&self.view, self.offset).ok()?;
        self.offset += RELA_SIZE;
        self.remaining -= 1;
        Some(rela)
    }
}
