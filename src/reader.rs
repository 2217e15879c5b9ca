//! The streaming ELF parser: header, program headers, section headers,
//! static/dynamic symbol tables, and the `DT_NEEDED` list.
//!
//! The reader borrows its byte source for its whole lifetime and never
//! closes it. The first failed parse step poisons the reader
//! (`valid = false`); every public operation checks that flag before doing
//! any work, so a reader that has seen one bad table refuses everything
//! after it instead of working from a half-read state.

use alloc::string::String;
use alloc::vec::Vec;

use crate::dynamic::{needed_names, DynEntry};
use crate::header::ident::ElfIdent;
use crate::header::{FileHeader, ProgramInfo, SectionInfo, SegmentType};
use crate::source::ByteSource;
use crate::symbol::SymbolInfo;
use crate::{Error, LoaderResult};

/// Reads the NUL-terminated string at `table_offset + index` out of a
/// string-table section bounded by `table_size`.
///
/// Fails if `index >= table_size`. Otherwise reads the tail of the table
/// from `index` onward and stops at the first NUL byte, never reading past
/// `table_offset + table_size`.
pub(crate) fn read_string_bounded(
    source: &mut dyn ByteSource,
    table_offset: u64,
    table_size: u64,
    index: u64,
) -> LoaderResult<String> {
    if index >= table_size {
        return Err(Error::InvalidFormat("string index at or beyond string table size"));
    }

    let remaining = (table_size - index) as usize;
    let mut buf = alloc::vec![0u8; remaining];
    source.read_at(table_offset + index, &mut buf)?;

    let len = buf.iter().position(|&b| b == 0).unwrap_or(remaining);
    Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
}

/// A validated ELF reader over a borrowed [`ByteSource`].
pub struct ElfReader<'a, S: ByteSource> {
    source: &'a mut S,
    header: FileHeader,
    program_headers: Vec<ProgramInfo>,
    sections: Vec<SectionInfo>,
    symbols: Vec<SymbolInfo>,
    dynsyms: Vec<SymbolInfo>,
    needed: Vec<String>,
    valid: bool,
}

impl<'a, S: ByteSource> ElfReader<'a, S> {
    /// Reads and validates the ELF file header. This is the only table
    /// read eagerly; everything else is read on demand by
    /// [`Self::read_all`] or [`Self::read_dynamic`].
    pub fn open(source: &'a mut S) -> LoaderResult<Self> {
        let header = FileHeader::read(source)?;
        Ok(Self {
            source,
            header,
            program_headers: Vec::new(),
            sections: Vec::new(),
            symbols: Vec::new(),
            dynsyms: Vec::new(),
            needed: Vec::new(),
            valid: true,
        })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn program_headers(&self) -> &[ProgramInfo] {
        &self.program_headers
    }

    pub fn sections(&self) -> &[SectionInfo] {
        &self.sections
    }

    pub fn symbols(&self) -> &[SymbolInfo] {
        &self.symbols
    }

    pub fn dynamic_symbols(&self) -> &[SymbolInfo] {
        &self.dynsyms
    }

    pub fn needed(&self) -> &[String] {
        &self.needed
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Exposes the borrowed byte source to other modules in this crate
    /// (the loader's segment-copy step) without making the field public.
    pub(crate) fn raw_source(&mut self) -> &mut S {
        self.source
    }

    fn check_valid(&self) -> LoaderResult<()> {
        if self.valid {
            Ok(())
        } else {
            Err(Error::InvalidFormat("reader is poisoned by a previous parse failure"))
        }
    }

    /// Runs `f`, poisoning the reader if it fails.
    fn guarded<T>(&mut self, f: impl FnOnce(&mut Self) -> LoaderResult<T>) -> LoaderResult<T> {
        self.check_valid()?;
        let result = f(self);
        if result.is_err() {
            self.valid = false;
        }
        result
    }

    /// Parses program headers if they haven't been already. Exposed to
    /// other modules in this crate (the loader) so they can work directly
    /// off a freshly-`open`ed reader without requiring `read_all` first.
    pub(crate) fn ensure_program_headers(&mut self) -> LoaderResult<()> {
        self.guarded(|this| this.read_program_headers())
    }

    fn read_program_headers(&mut self) -> LoaderResult<()> {
        if !self.program_headers.is_empty() || self.header.program_header_count == 0 {
            return Ok(());
        }
        let ident = self.header.ident;
        let mut headers = Vec::with_capacity(self.header.program_header_count as usize);
        for i in 0..self.header.program_header_count {
            let offset = self.header.program_header_offset
                + i as u64 * self.header.program_header_size as u64;
            headers.push(ProgramInfo::read(self.source, &ident, offset, self.header.program_header_size)?);
        }
        self.program_headers = headers;
        Ok(())
    }

    fn read_section_headers(&mut self) -> LoaderResult<()> {
        if !self.sections.is_empty() || self.header.section_header_count == 0 {
            return Ok(());
        }
        let ident = self.header.ident;
        let mut sections = Vec::with_capacity(self.header.section_header_count as usize);
        for i in 0..self.header.section_header_count {
            let offset = self.header.section_header_offset
                + i as u64 * self.header.section_header_size as u64;
            sections.push(SectionInfo::read(self.source, &ident, offset, self.header.section_header_size)?);
        }

        // Second pass: resolve names from the section-name string table.
        if (self.header.string_table_index as usize) < sections.len() {
            let strtab = sections[self.header.string_table_index as usize].clone();
            for section in &mut sections {
                section.name = read_string_bounded(self.source, strtab.offset, strtab.size, section.name_index as u64)?;
            }
        }

        self.sections = sections;
        Ok(())
    }

    fn read_symbol_table(&mut self, section_name: &str) -> LoaderResult<Vec<SymbolInfo>> {
        let Some(symtab) = self.sections.iter().find(|s| s.name == section_name).cloned() else {
            return Ok(Vec::new());
        };
        if symtab.link as usize >= self.sections.len() {
            return Err(Error::InvalidFormat("symbol table sh_link out of range"));
        }
        let strtab = self.sections[symtab.link as usize].clone();

        let ident = self.header.ident;
        let entsize = if symtab.entry_size == 0 {
            match ident.class {
                crate::header::ident::ElfClass::Class32 => 16,
                crate::header::ident::ElfClass::Class64 => 24,
            }
        } else {
            symtab.entry_size
        };
        let count = symtab.size / entsize;
        let shnum = self.header.section_header_count;

        let mut syms = Vec::with_capacity(count as usize);
        for i in 0..count {
            let mut sym = SymbolInfo::read(self.source, &ident, symtab.offset + i * entsize, shnum)?;
            sym.name = read_string_bounded(self.source, strtab.offset, strtab.size, sym.name_index as u64)?;
            syms.push(sym);
        }
        Ok(syms)
    }

    fn read_dynamic_needed_list(&mut self) -> LoaderResult<()> {
        let Some(dynamic_ph) = self
            .program_headers
            .iter()
            .find(|p| p.ty == SegmentType::Dynamic)
        else {
            return Ok(());
        };
        let ident = self.header.ident;
        let entry_size = match ident.class {
            crate::header::ident::ElfClass::Class32 => 8,
            crate::header::ident::ElfClass::Class64 => 16,
        };
        let max_entries = dynamic_ph.file_size / entry_size;
        let entries = DynEntry::read_table(self.source, &ident, dynamic_ph.offset, max_entries)?;

        let Some(dynstr) = self.sections.iter().find(|s| s.name == ".dynstr").cloned() else {
            return Ok(());
        };
        self.needed = needed_names(self.source, &entries, dynstr.offset, dynstr.size)?;
        Ok(())
    }

    /// Populates program headers, section headers (with names resolved),
    /// `.symtab`, and `.dynsym`. Missing `.symtab`/`.dynsym` leave their
    /// tables empty rather than failing.
    pub fn read_all(&mut self) -> LoaderResult<()> {
        self.guarded(|this| {
            this.read_program_headers()?;
            this.read_section_headers()?;
            this.symbols = this.read_symbol_table(".symtab")?;
            this.dynsyms = this.read_symbol_table(".dynsym")?;
            this.read_dynamic_needed_list()?;
            Ok(())
        })
    }

    /// Populates the subset required for loading: program headers, section
    /// headers, dynamic symbols, and the `DT_NEEDED` list. Fails if no
    /// `PT_DYNAMIC` program header is present.
    pub fn read_dynamic(&mut self) -> LoaderResult<()> {
        self.guarded(|this| {
            this.read_program_headers()?;
            if !this.program_headers.iter().any(|p| p.ty == SegmentType::Dynamic) {
                return Err(Error::InvalidFormat("no PT_DYNAMIC program header present"));
            }
            this.read_section_headers()?;
            this.dynsyms = this.read_symbol_table(".dynsym")?;
            this.read_dynamic_needed_list()?;
            Ok(())
        })
    }

    /// Populates program headers and section headers only, leaving symbol
    /// tables untouched. For embedders that only want to inspect sections
    /// (dumping names, sizes, and flags) without paying for symbol table
    /// parsing.
    pub fn read_sections_only(&mut self) -> LoaderResult<()> {
        self.guarded(|this| {
            this.read_program_headers()?;
            this.read_section_headers()
        })
    }

    pub fn find_section(&self, name: &str) -> Option<&SectionInfo> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn find_symbol(&self, name: &str) -> Option<&SymbolInfo> {
        self.symbols.iter().find(|s| s.name == name)
    }

    pub fn find_dynsym(&self, name: &str) -> Option<&SymbolInfo> {
        self.dynsyms.iter().find(|s| s.name == name)
    }

    /// Emits a human-readable dump of every parsed table via the `log`
    /// crate's facade.
    pub fn dump(&self) {
        log::info!("ELF header: machine={:?} entry={:#x} type={:?}", self.header.machine, self.header.entry, self.header.ty);
        for (i, ph) in self.program_headers.iter().enumerate() {
            log::info!(
                "program header[{i}]: type={:?} vaddr={:#x} filesz={:#x} memsz={:#x} flags={:?}",
                ph.ty, ph.vaddr, ph.file_size, ph.mem_size, ph.flags
            );
        }
        for (i, sh) in self.sections.iter().enumerate() {
            log::info!(
                "section[{i}] {:?}: type={:?} addr={:#x} size={:#x}",
                sh.name, sh.ty, sh.addr, sh.size
            );
        }
        for sym in &self.symbols {
            log::debug!("symtab: {} = {:#x}", sym.name, sym.value);
        }
        for sym in &self.dynsyms {
            log::debug!("dynsym: {} = {:#x}", sym.name, sym.value);
        }
        for name in &self.needed {
            log::info!("needed: {name}");
        }
    }
}
