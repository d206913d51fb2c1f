//! Section locator
//!
//! The runtime bootstrap needs three things from every loaded module: its
//! `.init_array` (static constructors), its `.fini_array` (destructors) and
//! its `.eh_frame` (unwind tables), plus the legacy single init/fini
//! function addresses for objects built without array sections. This module
//! computes that metadata on demand from a parsed image.

use crate::file::ElfFile;

const INIT_ARRAY: &[u8] = b".init_array";
const FINI_ARRAY: &[u8] = b".fini_array";
const EH_FRAME: &[u8] = b".eh_frame";

/// Runtime section metadata for one module.
///
/// An address of 0 with a size of 0 means the section is absent, which is a
/// valid outcome: a module of pure machine code has no static constructors
/// but may still carry unwind tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionInfo {
    /// Static constructor table
    pub init_array_addr: u64,
    pub init_array_size: u64,

    /// Static destructor table
    pub fini_array_addr: u64,
    pub fini_array_size: u64,

    /// Exception unwind table
    pub eh_frame_addr: u64,
    pub eh_frame_size: u64,

    /// Legacy single init/fini function addresses, 0 when absent
    pub init_addr: u64,
    pub fini_addr: u64,
}

impl<'a> ElfFile<'a> {
    /// Locate `.init_array`, `.fini_array` and `.eh_frame` and report their
    /// address and size, together with the legacy init/fini addresses.
    ///
    /// Addresses are reported in the execution address space once the image
    /// has been registered with a loader, and in raw link space before
    /// that. Callers that need execution-ready pointers must register and
    /// relocate first. A missing section is never an error.
    pub fn section_info(&self) -> SectionInfo {
        let mut info = SectionInfo::default();

        for section in self.sections() {
            let Ok(name) = self.section_name(&section) else {
                continue;
            };
            match name {
                n if n == INIT_ARRAY => {
                    info.init_array_addr = self.rebase(section.addr);
                    info.init_array_size = section.size;
                }
                n if n == FINI_ARRAY => {
                    info.fini_array_addr = self.rebase(section.addr);
                    info.fini_array_size = section.size;
                }
                n if n == EH_FRAME => {
                    info.eh_frame_addr = self.rebase(section.addr);
                    info.eh_frame_size = section.size;
                }
                _ => {}
            }
        }

        // Presence is optional and the values are reported as recorded;
        // a nonzero sentinel set by the embedder passes through untouched.
        if self.init() != 0 {
            info.init_addr = self.rebase(self.init());
        }
        if self.fini() != 0 {
            info.fini_addr = self.rebase(self.fini());
        }

        info
    }

    /// Translate a link-space address into the execution address space when
    /// the image has been registered, identity otherwise. Zero stays zero
    /// so absent sections keep their null marker.
    fn rebase(&self, addr: u64) -> u64 {
        if addr == 0 {
            return 0;
        }
        match self.load_addrs() {
            Some(load) => addr.wrapping_sub(load.virt).wrapping_add(load.exec),
            None => addr,
        }
    }
}
