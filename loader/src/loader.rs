//! Module registry and cross-module relocator
//!
//! [`ElfLoader`] holds the set of parsed module images together with their
//! execution regions and performs the one link step of the boot: resolving
//! every relocation in every registered image against the combined symbol
//! space, then patching the execution memory in place.
//!
//! Registration order matters twice: symbols are searched across modules in
//! registration order, and images are relocated in registration order.
//! Relocation runs exactly once per loader instance; after a failure the
//! instance must not be used further, since it is unspecified which patches
//! were already applied.

use arrayvec::ArrayVec;
use log::{debug, trace, warn};
use static_assertions::const_assert;

use crate::elf64::constants::STB_WEAK;
use crate::elf64::{RelocKind, Symbol};
use crate::error::{ElfError, Result};
use crate::file::ElfFile;

/// Maximum number of modules one loader instance can link.
///
/// The hypervisor build produces a handful of modules; the bound exists so
/// the registry lives in a fixed boot-time footprint with no allocation.
pub const MAX_MODULES: usize = 64;

const_assert!(MAX_MODULES >= 2);

/// One registered module: the parsed image, the memory it executes from
/// and the link-time base its symbol values are expressed against.
struct Module<'a> {
    file: &'a ElfFile<'a>,
    exec: &'a mut [u8],
    exec_base: u64,
    virt_base: u64,
}

/// Fixed-capacity registry of parsed images plus the relocation engine.
pub struct ElfLoader<'a> {
    modules: ArrayVec<Module<'a>, MAX_MODULES>,
    relocated: bool,
}

impl<'a> ElfLoader<'a> {
    /// Create an empty loader.
    pub fn new() -> Self {
        Self {
            modules: ArrayVec::new(),
            relocated: false,
        }
    }

    /// Number of registered modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether no module has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Register one parsed image.
    ///
    /// `exec` is the caller-allocated memory the module executes from (the
    /// image must already have been copied in, see [`ElfFile::load_into`]);
    /// `virt_base` is the link-time base address the module's symbol values
    /// are relative to. Both are fixed for the image's life.
    pub fn add(&mut self, file: &'a ElfFile<'a>, exec: &'a mut [u8], virt_base: u64) -> Result {
        if self.relocated {
            return Err(ElfError::AlreadyRelocated);
        }
        if exec.is_empty() {
            return Err(ElfError::ExecRegionEmpty);
        }
        if self.modules.is_full() {
            return Err(ElfError::LoaderFull);
        }

        let exec_base = exec.as_ptr() as u64;
        file.set_load_addrs(exec_base, virt_base)?;

        debug!(
            "registered module {} at exec {:#x} (virt base {:#x}, {} relocations)",
            self.modules.len(),
            exec_base,
            virt_base,
            file.relocation_count(),
        );

        self.modules.push(Module {
            file,
            exec,
            exec_base,
            virt_base,
        });
        Ok(())
    }

    /// Resolve and apply every relocation in every registered image.
    ///
    /// Must be called after all modules participating in cross-module
    /// symbol resolution have been registered, and at most once. On failure
    /// it is unspecified which patches were already written; the loader and
    /// all execution regions must be treated as unusable.
    pub fn relocate(&mut self) -> Result {
        if self.relocated {
            return Err(ElfError::AlreadyRelocated);
        }
        self.relocated = true;

        for index in 0..self.modules.len() {
            let file = self.modules[index].file;
            let exec_base = self.modules[index].exec_base;
            let virt_base = self.modules[index].virt_base;

            for rela in file.relocations() {
                let raw = rela.reloc_type();
                let kind = RelocKind::from_raw(raw)
                    .ok_or(ElfError::UnsupportedRelocation(raw))?;

                let value = match kind {
                    RelocKind::None => continue,
                    RelocKind::Relative => exec_base
                        .wrapping_sub(virt_base)
                        .wrapping_add_signed(rela.addend),
                    RelocKind::Abs64 => self
                        .resolve(index, rela.symbol_index())?
                        .wrapping_add_signed(rela.addend),
                    RelocKind::GlobDat | RelocKind::JumpSlot => {
                        self.resolve(index, rela.symbol_index())?
                    }
                };

                self.patch(index, rela.offset, value)?;
            }
            debug!(
                "relocated module {} ({} entries)",
                index,
                file.relocation_count()
            );
        }
        Ok(())
    }

    /// Resolve a symbol reference from `owner`'s symbol table.
    ///
    /// A local strong definition wins outright. Otherwise every registered
    /// module is searched by name in registration order: the first strong
    /// definition wins, the first weak definition is kept as fallback.
    fn resolve(&self, owner: usize, sym_index: u32) -> Result<u64> {
        // Index 0 is the reserved null symbol and resolves to 0.
        if sym_index == 0 {
            return Ok(0);
        }

        let file = self.modules[owner].file;
        let sym = file.symbol(sym_index)?;
        if sym.is_defined() && sym.bind() != STB_WEAK {
            return Ok(Self::placed_addr(&self.modules[owner], &sym));
        }

        let name = file.symbol_name(&sym)?;
        let mut weak: Option<u64> = None;

        for module in &self.modules {
            for candidate in module.file.symbols() {
                if !candidate.is_defined() {
                    continue;
                }
                let Ok(candidate_name) = module.file.symbol_name(&candidate) else {
                    continue;
                };
                if candidate_name != name {
                    continue;
                }
                let addr = Self::placed_addr(module, &candidate);
                if candidate.bind() != STB_WEAK {
                    return Ok(addr);
                }
                if weak.is_none() {
                    weak = Some(addr);
                }
            }
        }

        weak.ok_or_else(|| {
            warn!(
                "unresolved symbol: {}",
                core::str::from_utf8(name).unwrap_or("<non-utf8>")
            );
            ElfError::UnresolvedSymbol
        })
    }

    /// Address a symbol ends up at in its module's execution region.
    /// Absolute symbols are never rebased.
    fn placed_addr(module: &Module<'a>, sym: &Symbol) -> u64 {
        if sym.is_absolute() {
            sym.value
        } else {
            sym.value
                .wrapping_sub(module.virt_base)
                .wrapping_add(module.exec_base)
        }
    }

    /// Write one 64-bit patch into the owning module's execution region.
    fn patch(&mut self, index: usize, target: u64, value: u64) -> Result {
        let module = &mut self.modules[index];
        let offset = target
            .checked_sub(module.virt_base)
            .and_then(|o| usize::try_from(o).ok())
            .ok_or(ElfError::RelocationOutOfBounds)?;
        let end = offset.checked_add(8).ok_or(ElfError::RelocationOutOfBounds)?;
        if end > module.exec.len() {
            return Err(ElfError::RelocationOutOfBounds);
        }

        module.exec[offset..end].copy_from_slice(&value.to_le_bytes());
        trace!("patched {:#x} <- {:#x}", target, value);
        Ok(())
    }
}

impl Default for ElfLoader<'_> {
    fn default() -> Self {
        Self::new()
    }
}
