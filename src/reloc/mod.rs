//! Architecture-dispatched relocation processing.
//!
//! The walking logic shared by every architecture (finding `SHT_REL`/
//! `SHT_RELA` sections, decoding their entries, resolving the target
//! symbol) lives here. How the resolved `(S, A, P)` triple gets encoded
//! into a word is architecture-specific and lives under a module per
//! machine; only RISC-V is implemented.

pub mod riscv;

use alloc::vec::Vec;

use crate::header::ident::{ElfClass, ElfIdent};
use crate::header::{SectionInfo, SectionType};
use crate::loader::Program;
use crate::reader::ElfReader;
use crate::source::ByteSource;
use crate::symbol::SymbolInfo;
use crate::{Error, LoaderResult};

/// Consulted for `SHN_UNDEF` relocation targets.
pub trait SymbolResolver {
    fn resolve(&self, name: &str) -> Option<u64>;
}

/// A resolver that never resolves anything: every undefined symbol fails
/// relocation. Useful for statically-linked images that are known to carry
/// no undefined references.
pub struct NullResolver;

impl SymbolResolver for NullResolver {
    fn resolve(&self, _name: &str) -> Option<u64> {
        None
    }
}

/// The dispatch interface a relocation architecture implements. General
/// enough to add a second architecture without touching the loader.
pub trait RelocationArch<S: ByteSource> {
    fn apply_relocations(
        &self,
        program: &Program,
        reader: &mut ElfReader<'_, S>,
        resolver: &mut dyn SymbolResolver,
    ) -> LoaderResult<()>;
}

/// One decoded relocation table entry, in either `Rel` or `Rela` form.
#[derive(Clone, Copy, Debug)]
pub struct RelocEntry {
    pub offset: u64,
    pub reloc_type: u32,
    pub symbol_index: u32,
    /// `Some` for `SHT_RELA` entries. `None` for `SHT_REL` entries, whose
    /// addend must be read from the word already at the target.
    pub addend: Option<i64>,
}

impl RelocEntry {
    fn read(source: &mut dyn ByteSource, ident: &ElfIdent, offset: u64, rela: bool) -> LoaderResult<Self> {
        let endian = ident.endian;
        match ident.class {
            ElfClass::Class64 => {
                let mut buf = [0u8; 24];
                let size = if rela { 24 } else { 16 };
                source.read_at(offset, &mut buf[..size])?;
                let info = endian.read::<u64>(&buf[8..]);
                Ok(Self {
                    offset: endian.read::<u64>(&buf[0..]),
                    reloc_type: (info & 0xffff_ffff) as u32,
                    symbol_index: (info >> 32) as u32,
                    addend: if rela { Some(endian.read::<u64>(&buf[16..]) as i64) } else { None },
                })
            }
            ElfClass::Class32 => {
                let mut buf = [0u8; 12];
                let size = if rela { 12 } else { 8 };
                source.read_at(offset, &mut buf[..size])?;
                let info = endian.read::<u32>(&buf[4..]);
                Ok(Self {
                    offset: endian.read::<u32>(&buf[0..]) as u64,
                    reloc_type: info & 0xff,
                    symbol_index: info >> 8,
                    addend: if rela { Some(endian.read::<u32>(&buf[8..]) as i32 as i64) } else { None },
                })
            }
        }
    }
}

/// A relocation section together with the symbol table and apply-to
/// section it names, once both have been validated to exist.
pub struct RelocSection<'a> {
    pub section: &'a SectionInfo,
    pub symbols: &'a [SymbolInfo],
    pub target: &'a SectionInfo,
}

/// Finds every `SHT_REL`/`SHT_RELA` section whose `sh_link` (symbol table)
/// and `sh_info` (apply-to section) both name a valid section, pairing each
/// with the already-parsed symbol table it should consult.
///
/// Sections with an unresolvable link or target are skipped rather than
/// failing the whole relocation pass.
pub fn relocation_sections<'a>(sections: &'a [SectionInfo], symtab: &'a [SymbolInfo], dynsyms: &'a [SymbolInfo]) -> Vec<RelocSection<'a>> {
    let mut out = Vec::new();
    for section in sections {
        if !matches!(section.ty, SectionType::Rel | SectionType::Rela) {
            continue;
        }
        let Some(symtab_section) = sections.get(section.link as usize) else {
            continue;
        };
        let Some(target) = sections.get(section.info as usize) else {
            continue;
        };
        let symbols = if symtab_section.name == ".dynsym" {
            dynsyms
        } else if symtab_section.name == ".symtab" {
            symtab
        } else {
            continue;
        };
        out.push(RelocSection { section, symbols, target });
    }
    out
}

/// Reads every entry of a `SHT_REL`/`SHT_RELA` section.
pub fn read_entries(source: &mut dyn ByteSource, ident: &ElfIdent, section: &SectionInfo) -> LoaderResult<Vec<RelocEntry>> {
    let rela = section.ty == SectionType::Rela;
    let entry_size = match (ident.class, rela) {
        (ElfClass::Class64, true) => 24,
        (ElfClass::Class64, false) => 16,
        (ElfClass::Class32, true) => 12,
        (ElfClass::Class32, false) => 8,
    };
    let count = section.size / entry_size;
    let mut entries = Vec::with_capacity(count as usize);
    for i in 0..count {
        entries.push(RelocEntry::read(source, ident, section.offset + i * entry_size, rela)?);
    }
    Ok(entries)
}

/// Resolves the runtime address of a relocation's referenced symbol.
///
/// `SHN_UNDEF` consults `resolver`; every other symbol resolves to
/// `sym.value + offs`.
pub fn resolve_symbol(sym: &SymbolInfo, offs: i64, resolver: &dyn SymbolResolver) -> LoaderResult<i64> {
    if sym.is_undefined() {
        resolver
            .resolve(&sym.name)
            .map(|addr| addr as i64)
            .ok_or(Error::InvalidFormat("undefined symbol could not be resolved"))
    } else {
        Ok(sym.value as i64 + offs)
    }
}
