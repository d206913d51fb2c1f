//! ELF64 module loader for the hypervisor boot stage.
//!
//! At the point this code runs there is no operating system, no libc and no
//! dynamic linker: the boot stage itself must parse the hypervisor's
//! separately compiled ELF64 modules, resolve symbols across them, patch
//! their relocations and hand the runtime bootstrap the section metadata
//! (`.init_array`, `.fini_array`, `.eh_frame`) each module needs to
//! initialize itself.
//!
//! The crate is `no_std`, allocation-free and single-threaded. Every input
//! image is treated as untrusted: all structural validation happens when an
//! [`ElfFile`] is constructed, and every byte-range read goes through one
//! bounds-checked accessor, so no later stage can be reached with an
//! inconsistent image.
//!
//! Typical flow:
//!
//! ```ignore
//! let misc = ElfFile::new(misc_bytes)?;
//! let code = ElfFile::new(code_bytes)?;
//!
//! misc.load_into(misc_exec)?;
//! code.load_into(code_exec)?;
//!
//! let mut loader = ElfLoader::new();
//! loader.add(&misc, misc_exec, 0)?;
//! loader.add(&code, code_exec, 0)?;
//! loader.relocate()?;
//!
//! let info = misc.section_info();
//! // walk info.init_array, register info.eh_frame, jump in
//! ```

#![no_std]

#[cfg(test)]
extern crate std;

/// On-disk ELF64 structures and constants
pub mod elf64;

/// Error type shared by the parser and the relocator
pub mod error;

/// Image parser - one validated view per compiled module
pub mod file;

/// Module registry and cross-module relocator
pub mod loader;

/// Section locator - init/fini/eh_frame metadata for the runtime bootstrap
pub mod sections;

/// Bounds-checked byte view over raw image buffers
pub mod view;

pub use error::{ElfError, ErrorKind, Result};
pub use file::ElfFile;
pub use loader::{ElfLoader, MAX_MODULES};
pub use sections::SectionInfo;
