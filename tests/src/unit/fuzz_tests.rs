//! Property-based hardening tests
//!
//! The image is adversarial input: no corruption may ever make the parser
//! panic or read outside the buffer (slice discipline enforces the latter;
//! these tests pin down the former plus the error classification).

use hvelf::elf64::constants::{R_X86_64_64, STB_GLOBAL};
use hvelf::{ElfFile, ErrorKind};
use proptest::prelude::*;

use crate::common::{ehdr_offset, ElfBuilder};

/// An image that exercises every parser stage: symbols, relocations,
/// dynamic section, init/fini arrays and unwind tables.
fn full_image() -> Vec<u8> {
    let mut builder = ElfBuilder::new();
    let f = builder.add_text_symbol("f", 0x10, STB_GLOBAL);
    builder.add_rela(0x20, f, R_X86_64_64, 0);
    builder
        .with_init_array(16)
        .with_fini_array(16)
        .with_eh_frame(32)
        .set_init(0x30)
        .set_fini(0x38)
        .build()
        .bytes
}

proptest! {
    #[test]
    fn single_byte_corruption_never_panics(pos in any::<prop::sample::Index>(), byte in any::<u8>()) {
        let mut bytes = full_image();
        let idx = pos.index(bytes.len());
        bytes[idx] = byte;

        // Either the image still parses, or it is rejected cleanly; in
        // both cases every accessor stays inside the buffer.
        if let Ok(file) = ElfFile::new(&bytes) {
            let _ = file.section_info();
            for sym in file.symbols() {
                let _ = file.symbol_name(&sym);
            }
            for section in file.sections() {
                let _ = file.section_name(&section);
            }
            let _ = file.relocations().count();
            let _ = file.total_memsz();
        }
    }

    #[test]
    fn header_corruption_is_malformed_or_harmless(pos in 0usize..64, byte in any::<u8>()) {
        let mut bytes = full_image();
        bytes[pos] = byte;

        if let Err(err) = ElfFile::new(&bytes) {
            prop_assert_eq!(err.kind(), ErrorKind::MalformedImage);
        }
    }

    #[test]
    fn section_table_pushed_out_of_bounds_is_rejected(shoff in any::<u64>()) {
        let mut bytes = full_image();
        prop_assume!(shoff > bytes.len() as u64);
        bytes[ehdr_offset::SHOFF..ehdr_offset::SHOFF + 8]
            .copy_from_slice(&shoff.to_le_bytes());

        let err = ElfFile::new(&bytes).unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::MalformedImage);
    }

    #[test]
    fn program_table_pushed_out_of_bounds_is_rejected(phoff in any::<u64>()) {
        let mut bytes = full_image();
        prop_assume!(phoff > bytes.len() as u64);
        bytes[ehdr_offset::PHOFF..ehdr_offset::PHOFF + 8]
            .copy_from_slice(&phoff.to_le_bytes());

        let err = ElfFile::new(&bytes).unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::MalformedImage);
    }
}
