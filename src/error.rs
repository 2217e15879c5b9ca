//! The loader's single error type.
//!
//! Every parse step reports success or failure; the first failure poisons
//! the owning [`crate::reader::ElfReader`] and subsequent operations on it
//! refuse immediately rather than working from half-read tables.

use thiserror_no_std::Error;

/// All recoverable error conditions raised by this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// The image violates the ELF specification in a way this crate checks
    /// for: bad magic, wrong class/endianness/version, a truncated table,
    /// an out-of-range index, or a malformed string reference.
    #[error("invalid ELF format: {0}")]
    InvalidFormat(&'static str),

    /// The image's machine type, or a relocation/MPU request against it,
    /// names an architecture this crate has no dispatch implementation for.
    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(&'static str),

    /// A relocation section named a relocation type this crate's
    /// architecture dispatch does not implement.
    #[error("unsupported relocation type {0:#x}")]
    UnsupportedRelocation(u32),

    /// The byte source returned an error while reading or seeking.
    #[error("I/O error while reading ELF data")]
    IoError,

    /// The embedder's allocator callback returned a null base address.
    #[error("allocator failed to provide backing memory")]
    AllocationFailed,

    /// The image needs more MPU regions than the hardware has available.
    #[error("program requires more MPU regions than are available")]
    TooManyRegions,
}

/// Convenience alias used throughout this crate.
pub type LoaderResult<T> = Result<T, Error>;
