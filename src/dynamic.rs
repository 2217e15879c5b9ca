//! The subset of `PT_DYNAMIC` this crate interprets: `DT_NEEDED` entries.
//!
//! The full dynamic-tag set (symbol hashing, relocation table pointers
//! duplicated from the section headers, `DT_INIT`/`DT_FINI`, ...) is out
//! of scope; only the dependency list is consumed.

use alloc::string::String;
use alloc::vec::Vec;

use crate::header::ident::{ElfClass, ElfIdent};
use crate::source::ByteSource;
use crate::LoaderResult;

/// `d_tag` values this crate cares about.
pub const DT_NULL: u64 = 0;
pub const DT_NEEDED: u64 = 1;
pub const DT_STRTAB: u64 = 5;

/// One `Elf{32,64}_Dyn` entry.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct DynEntry {
    pub tag: u64,
    pub value: u64,
}

impl DynEntry {
    fn entry_size(class: ElfClass) -> u64 {
        match class {
            ElfClass::Class32 => 8,
            ElfClass::Class64 => 16,
        }
    }

    fn read(source: &mut dyn ByteSource, ident: &ElfIdent, offset: u64) -> LoaderResult<Self> {
        let endian = ident.endian;
        Ok(match ident.class {
            ElfClass::Class64 => {
                let mut buf = [0u8; 16];
                source.read_at(offset, &mut buf)?;
                Self {
                    tag: endian.read::<u64>(&buf[0..]),
                    value: endian.read::<u64>(&buf[8..]),
                }
            }
            ElfClass::Class32 => {
                let mut buf = [0u8; 8];
                source.read_at(offset, &mut buf)?;
                Self {
                    tag: endian.read::<u32>(&buf[0..]) as u64,
                    value: endian.read::<u32>(&buf[4..]) as u64,
                }
            }
        })
    }

    /// Walks the `PT_DYNAMIC` table at `offset` until `DT_NULL`, collecting
    /// every entry. Stops at `max_entries` as a guard against a malformed
    /// table that never terminates.
    pub fn read_table(
        source: &mut dyn ByteSource,
        ident: &ElfIdent,
        offset: u64,
        max_entries: u64,
    ) -> LoaderResult<Vec<Self>> {
        let entry_size = Self::entry_size(ident.class);
        let mut entries = Vec::new();
        for i in 0..max_entries {
            let entry = Self::read(source, ident, offset + i * entry_size)?;
            if entry.tag == DT_NULL {
                break;
            }
            entries.push(entry);
        }
        Ok(entries)
    }
}

/// Reads the null-terminated string at `strtab_offset + value` out of
/// `.dynstr`, bounded by `strtab_size` the same way
/// [`crate::reader::ElfReader`] bounds every other string-table read.
pub fn read_needed_name(
    source: &mut dyn ByteSource,
    strtab_offset: u64,
    strtab_size: u64,
    value: u64,
) -> LoaderResult<String> {
    crate::reader::read_string_bounded(source, strtab_offset, strtab_size, value)
}

/// Extracts the ordered list of `DT_NEEDED` dependency names from a
/// `PT_DYNAMIC` table, given the `.dynstr` location to resolve them
/// against.
pub fn needed_names(
    source: &mut dyn ByteSource,
    entries: &[DynEntry],
    strtab_offset: u64,
    strtab_size: u64,
) -> LoaderResult<Vec<String>> {
    let mut names = Vec::new();
    for entry in entries {
        if entry.tag == DT_NEEDED {
            names.push(read_needed_name(source, strtab_offset, strtab_size, entry.value)?);
        }
    }
    Ok(names)
}
