//! A dynamic ELF loader for embedded hosts.
//!
//! Given a byte source and an embedder-supplied allocator, [`Loader::load`]
//! parses an ELF32/ELF64 image, places its `PT_LOAD` segments into
//! allocator-provided memory, and returns a [`Program`] handle. Relocation
//! ([`reloc`]) and MPU programming ([`mpu`]) are separate, optional steps
//! the embedder runs afterward; this crate never jumps to the entry point
//! or interprets debug information.
//!
//! `no_std` by default. The `alloc` feature enables the `Vec`/`String`-backed
//! parser tables (required by everything past the file header); `std`
//! additionally enables a blanket [`source::ByteSource`] impl over
//! `std::io::{Read, Seek}` so `std::fs::File` works directly.

#![cfg_attr(not(feature = "std"), no_std)]

// Every table past the file header (`Vec`/`String` of program headers,
// sections, symbols, needed names) needs a heap; `alloc` is effectively a
// hard requirement of this crate rather than an optional extra. The
// `alloc` feature documents that requirement rather than gating it.
extern crate alloc;

pub mod dynamic;
pub mod endian;
pub mod error;
pub mod header;
pub mod loader;
pub mod mpu;
pub mod reader;
pub mod reloc;
pub mod source;
pub mod symbol;

pub use error::{Error, LoaderResult};
pub use loader::{Allocator, Deallocator, Loader, Program};
pub use reader::ElfReader;
pub use reloc::{NullResolver, RelocationArch, SymbolResolver};
pub use source::{ByteSource, SliceSource};
