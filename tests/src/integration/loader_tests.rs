//! Module registry tests
//!
//! Registration bookkeeping: the fixed capacity, the one-registration and
//! one-relocation rules, and the copy into execution memory.

use hvelf::{ElfError, ElfFile, ElfLoader, MAX_MODULES};

use crate::common::ElfBuilder;

#[test]
fn empty_execution_region_is_rejected() {
    let built = ElfBuilder::new().build();
    let file = ElfFile::new(&built.bytes).unwrap();

    let mut exec: Vec<u8> = Vec::new();
    let mut loader = ElfLoader::new();
    assert_eq!(
        loader.add(&file, &mut exec, 0).unwrap_err(),
        ElfError::ExecRegionEmpty
    );
    assert!(loader.is_empty());
}

#[test]
fn an_image_registers_at_most_once() {
    let built = ElfBuilder::new().build();
    let file = ElfFile::new(&built.bytes).unwrap();

    let mut backing = vec![0u8; 2 * built.bytes.len()];
    let (exec_a, exec_b) = backing.split_at_mut(built.bytes.len());

    let mut loader = ElfLoader::new();
    loader.add(&file, exec_a, 0).unwrap();
    assert_eq!(
        loader.add(&file, exec_b, 0).unwrap_err(),
        ElfError::AlreadyRegistered
    );
    assert_eq!(loader.len(), 1);
}

#[test]
fn registry_capacity_is_enforced() {
    let images: Vec<Vec<u8>> = (0..MAX_MODULES)
        .map(|_| ElfBuilder::new().build().bytes)
        .collect();
    let files: Vec<ElfFile> = images
        .iter()
        .map(|bytes| ElfFile::new(bytes).unwrap())
        .collect();
    let mut execs: Vec<Vec<u8>> = images.iter().map(|bytes| vec![0u8; bytes.len()]).collect();

    let overflow_built = ElfBuilder::new().build();
    let overflow_file = ElfFile::new(&overflow_built.bytes).unwrap();
    let mut overflow_exec = vec![0u8; overflow_built.bytes.len()];

    let mut loader = ElfLoader::new();
    for (file, exec) in files.iter().zip(execs.iter_mut()) {
        loader.add(file, exec, 0).unwrap();
    }
    assert_eq!(loader.len(), MAX_MODULES);

    assert_eq!(
        loader.add(&overflow_file, &mut overflow_exec, 0).unwrap_err(),
        ElfError::LoaderFull
    );
}

#[test]
fn no_registration_after_relocation() {
    let built_a = ElfBuilder::new().build();
    let built_b = ElfBuilder::new().build();
    let file_a = ElfFile::new(&built_a.bytes).unwrap();
    let file_b = ElfFile::new(&built_b.bytes).unwrap();

    let mut exec_a = vec![0u8; built_a.bytes.len()];
    let mut exec_b = vec![0u8; built_b.bytes.len()];

    let mut loader = ElfLoader::new();
    loader.add(&file_a, &mut exec_a, 0).unwrap();
    loader.relocate().unwrap();

    assert_eq!(
        loader.add(&file_b, &mut exec_b, 0).unwrap_err(),
        ElfError::AlreadyRelocated
    );
}

#[test]
fn relocation_runs_at_most_once() {
    let built = ElfBuilder::new().build();
    let file = ElfFile::new(&built.bytes).unwrap();

    let mut exec = vec![0u8; built.bytes.len()];
    let mut loader = ElfLoader::new();
    loader.add(&file, &mut exec, 0).unwrap();

    loader.relocate().unwrap();
    assert_eq!(loader.relocate().unwrap_err(), ElfError::AlreadyRelocated);
}

#[test]
fn load_into_copies_the_loadable_segments() {
    let built = ElfBuilder::new().build();
    let file = ElfFile::new(&built.bytes).unwrap();

    let mut exec = vec![0u8; file.total_memsz() as usize];
    file.load_into(&mut exec).unwrap();

    // The whole file is one PT_LOAD, so the copy is byte-for-byte.
    assert_eq!(&exec[..built.bytes.len()], &built.bytes[..]);
}

#[test]
fn load_into_rejects_a_short_region() {
    let built = ElfBuilder::new().build();
    let file = ElfFile::new(&built.bytes).unwrap();

    let mut exec = vec![0u8; file.total_memsz() as usize - 1];
    assert_eq!(
        file.load_into(&mut exec).unwrap_err(),
        ElfError::ExecRegionTooSmall
    );
}
