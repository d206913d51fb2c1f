//! Loader error handling
//!
//! One discriminated error type covers the parser, the section locator and
//! the relocator. Callers that only care about the coarse outcome branch on
//! [`ErrorKind`]; the fine-grained variant says exactly which structural
//! check failed.

use core::fmt;

/// Loader error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// The input buffer is empty
    EmptyImage,

    /// Image structure errors
    TruncatedHeader,
    BadMagic,
    UnsupportedClass(u8),
    UnsupportedEncoding(u8),
    UnsupportedVersion(u8),
    UnsupportedMachine(u16),

    /// A header-derived offset/size range leaves the buffer
    OutOfBounds,

    /// A table index points outside the parsed table set
    BadSectionIndex(u16),
    BadSymbolIndex(u32),

    /// String table is missing, mistyped or not NUL-terminated
    BadStringTable,

    /// A table entry size does not match the ELF64 layout
    BadEntrySize,

    /// The dynamic section names a relocation table but omits a
    /// required companion entry (the value is the missing tag)
    MissingDynamicEntry(u64),

    /// Registry errors
    LoaderFull,
    AlreadyRegistered,
    AlreadyRelocated,
    ExecRegionEmpty,
    ExecRegionTooSmall,

    /// Link-time errors
    UnresolvedSymbol,
    UnsupportedRelocation(u32),
    RelocationOutOfBounds,
}

/// Coarse outcome classification, one branch per failure family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller-programming error: never retried, surfaced immediately
    InvalidInput,
    /// The image failed structural validation; it is untrusted input
    MalformedImage,
    /// No registered module defines a referenced symbol
    UnresolvedSymbol,
    /// A relocation kind outside the supported set was encountered
    UnsupportedRelocation,
}

impl ElfError {
    /// Classify this error into the coarse outcome families.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ElfError::EmptyImage
            | ElfError::LoaderFull
            | ElfError::AlreadyRegistered
            | ElfError::AlreadyRelocated
            | ElfError::ExecRegionEmpty
            | ElfError::ExecRegionTooSmall => ErrorKind::InvalidInput,

            ElfError::TruncatedHeader
            | ElfError::BadMagic
            | ElfError::UnsupportedClass(_)
            | ElfError::UnsupportedEncoding(_)
            | ElfError::UnsupportedVersion(_)
            | ElfError::UnsupportedMachine(_)
            | ElfError::OutOfBounds
            | ElfError::BadSectionIndex(_)
            | ElfError::BadSymbolIndex(_)
            | ElfError::BadStringTable
            | ElfError::BadEntrySize
            | ElfError::MissingDynamicEntry(_)
            | ElfError::RelocationOutOfBounds => ErrorKind::MalformedImage,

            ElfError::UnresolvedSymbol => ErrorKind::UnresolvedSymbol,
            ElfError::UnsupportedRelocation(_) => ErrorKind::UnsupportedRelocation,
        }
    }

    /// Get a human-readable description of the error
    pub fn description(&self) -> &'static str {
        match self {
            ElfError::EmptyImage => "Image buffer is empty",
            ElfError::TruncatedHeader => "Image smaller than the ELF64 header",
            ElfError::BadMagic => "Invalid ELF magic number",
            ElfError::UnsupportedClass(_) => "Not an ELF64 image",
            ElfError::UnsupportedEncoding(_) => "Not little-endian",
            ElfError::UnsupportedVersion(_) => "Unsupported ELF version",
            ElfError::UnsupportedMachine(_) => "Unsupported machine type",
            ElfError::OutOfBounds => "Offset or size exceeds image bounds",
            ElfError::BadSectionIndex(_) => "Section index out of range",
            ElfError::BadSymbolIndex(_) => "Symbol index out of range",
            ElfError::BadStringTable => "Invalid string table",
            ElfError::BadEntrySize => "Unexpected table entry size",
            ElfError::MissingDynamicEntry(_) => "Incomplete dynamic section",
            ElfError::LoaderFull => "Module registry is at capacity",
            ElfError::AlreadyRegistered => "Image is already registered",
            ElfError::AlreadyRelocated => "Loader has already relocated",
            ElfError::ExecRegionEmpty => "Execution region is empty",
            ElfError::ExecRegionTooSmall => "Execution region too small for image",
            ElfError::UnresolvedSymbol => "Unresolved symbol",
            ElfError::UnsupportedRelocation(_) => "Unsupported relocation type",
            ElfError::RelocationOutOfBounds => "Relocation target outside execution region",
        }
    }
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ElfError: {} ({:?})", self.description(), self.kind())
    }
}

/// Result type used throughout the loader
pub type Result<T = ()> = core::result::Result<T, ElfError>;
