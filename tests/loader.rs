//! Integration-level coverage of the five concrete scenarios the loader's
//! contract is checked against: minimal static load, header rejection,
//! string/link-table-safety rejection, undefined-symbol relocation via an
//! embedder resolver, and `DT_NEEDED` extraction.

use elfloader::header::ident::ElfClass;
use elfloader::loader::Allocator;
use elfloader::reloc::riscv::{Riscv, R_RISCV_JUMP_SLOT};
use elfloader::reloc::{RelocationArch, SymbolResolver};
use elfloader::{ElfReader, Loader, SliceSource};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn le16(v: u16) -> [u8; 2] {
    v.to_le_bytes()
}
fn le32(v: u32) -> [u8; 4] {
    v.to_le_bytes()
}
fn le64(v: u64) -> [u8; 8] {
    v.to_le_bytes()
}

fn host_ident(abi: u8) -> [u8; 9] {
    let mut b = [0u8; 9];
    b[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    b[4] = if cfg!(feature = "elf32") { 1 } else { 2 };
    b[5] = if cfg!(target_endian = "big") { 2 } else { 1 };
    b[6] = 1;
    b[7] = abi;
    b
}

fn header64(e_type: u16, e_machine: u16, e_entry: u64, e_phoff: u64, e_phnum: u16, e_shoff: u64, e_shnum: u16, e_shstrndx: u16) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&host_ident(0));
    b.extend_from_slice(&[0u8; 7]); // abi_version + e_ident padding
    b.extend_from_slice(&le16(e_type));
    b.extend_from_slice(&le16(e_machine));
    b.extend_from_slice(&le32(1)); // e_version
    b.extend_from_slice(&le64(e_entry));
    b.extend_from_slice(&le64(e_phoff));
    b.extend_from_slice(&le64(e_shoff));
    b.extend_from_slice(&le32(0)); // e_flags
    b.extend_from_slice(&le16(64)); // e_ehsize
    b.extend_from_slice(&le16(56)); // e_phentsize
    b.extend_from_slice(&le16(e_phnum));
    b.extend_from_slice(&le16(64)); // e_shentsize
    b.extend_from_slice(&le16(e_shnum));
    b.extend_from_slice(&le16(e_shstrndx));
    assert_eq!(b.len(), 64);
    b
}

fn phdr64(p_type: u32, p_flags: u32, p_offset: u64, p_vaddr: u64, p_filesz: u64, p_memsz: u64, p_align: u64) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&le32(p_type));
    b.extend_from_slice(&le32(p_flags));
    b.extend_from_slice(&le64(p_offset));
    b.extend_from_slice(&le64(p_vaddr)); // p_vaddr
    b.extend_from_slice(&le64(p_vaddr)); // p_paddr
    b.extend_from_slice(&le64(p_filesz));
    b.extend_from_slice(&le64(p_memsz));
    b.extend_from_slice(&le64(p_align));
    assert_eq!(b.len(), 56);
    b
}

fn shdr64(name_off: u32, sh_type: u32, sh_addr: u64, sh_offset: u64, sh_size: u64, sh_link: u32, sh_info: u32, sh_entsize: u64) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&le32(name_off));
    b.extend_from_slice(&le32(sh_type));
    b.extend_from_slice(&le64(0)); // sh_flags
    b.extend_from_slice(&le64(sh_addr));
    b.extend_from_slice(&le64(sh_offset));
    b.extend_from_slice(&le64(sh_size));
    b.extend_from_slice(&le32(sh_link));
    b.extend_from_slice(&le32(sh_info));
    b.extend_from_slice(&le64(8)); // sh_addralign
    b.extend_from_slice(&le64(sh_entsize));
    assert_eq!(b.len(), 64);
    b
}

fn sym64(name_off: u32, info: u8, shndx: u16, value: u64) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&le32(name_off));
    b.push(info);
    b.push(0); // st_other
    b.extend_from_slice(&le16(shndx));
    b.extend_from_slice(&le64(value));
    b.extend_from_slice(&le64(0)); // st_size
    assert_eq!(b.len(), 24);
    b
}

fn rela64(r_offset: u64, sym_index: u32, ty: u32, addend: i64) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&le64(r_offset));
    let info = ((sym_index as u64) << 32) | ty as u64;
    b.extend_from_slice(&le64(info));
    b.extend_from_slice(&addend.to_le_bytes());
    assert_eq!(b.len(), 24);
    b
}

struct FixedAllocator {
    base: u64,
}
impl Allocator for FixedAllocator {
    fn allocate(&mut self, _requested: u64, _size: u64, _align: u64) -> (u64, usize) {
        (self.base, 0)
    }
}

const RISCV_MACHINE: u16 = 0xf3;
const PT_LOAD: u32 = 1;
const SHT_STRTAB: u32 = 3;
const SHT_DYNSYM: u32 = 11;
const SHT_RELA: u32 = 4;

/// Scenario 1: a minimal statically-linked RISC-V ELF with a single RX
/// segment and no relocations loads, reports `entry = header.entry + offs`,
/// and has zero `DT_NEEDED` entries.
#[test]
fn minimal_static_elf_loads_with_no_dependencies() {
    init_logging();
    if cfg!(feature = "elf32") {
        return; // fixture below is ELF64-only
    }
    let header = header64(2, RISCV_MACHINE, 0x1000, 64, 1, 0, 0, 0);
    let phdr = phdr64(PT_LOAD, 0x5, 120, 0x1000, 4, 8, 16);
    let mut bytes = header;
    bytes.extend_from_slice(&phdr);
    bytes.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);

    let mut src = SliceSource::new(&bytes);
    let mut reader = ElfReader::open(&mut src).unwrap();
    reader.read_all().unwrap();
    assert!(reader.needed().is_empty());

    let mut backing = vec![0u8; 64];
    let mut allocator = FixedAllocator { base: backing.as_mut_ptr() as u64 };
    let program = Loader::load(&mut reader, &mut allocator).unwrap();

    assert_eq!(program.entry - program.vaddr_real, reader.header().entry - program.vaddr_requested);
}

/// Scenario 2: an ELF with a mismatched `EI_CLASS` byte fails `open`.
#[test]
fn mismatched_class_fails_open() {
    init_logging();
    let mut ident = [0u8; 16];
    ident[0..9].copy_from_slice(&host_ident(0));
    ident[4] = match ElfClass::host() {
        ElfClass::Class64 => 1,
        ElfClass::Class32 => 2,
    };
    let mut src = SliceSource::new(&ident);
    assert!(ElfReader::open(&mut src).is_err());
}

/// Scenario 3: an ELF whose `.symtab` links to a section index `>= shnum`
/// fails `read_all`.
#[test]
fn symtab_out_of_range_link_fails_read_all() {
    init_logging();
    // sections: [0] NULL, [1] .shstrtab, [2] .symtab (sh_link out of range)
    let shnum: u16 = 3;
    let header_len = 64usize;
    let shdr_table_len = shnum as usize * 64;
    let content_base = header_len + shdr_table_len;

    let mut shstrtab = vec![0u8]; // index 0: empty name
    let shstrtab_name_off = shstrtab.len() as u32;
    shstrtab.extend_from_slice(b".shstrtab\0");
    let symtab_name_off = shstrtab.len() as u32;
    shstrtab.extend_from_slice(b".symtab\0");

    let shstrtab_offset = content_base as u64;
    let shstrtab_size = shstrtab.len() as u64;

    let mut bytes = header64(2, RISCV_MACHINE, 0, 0, 0, header_len as u64, shnum, 1);
    bytes.extend_from_slice(&shdr64(0, 0, 0, 0, 0, 0, 0, 0)); // [0] NULL
    bytes.extend_from_slice(&shdr64(shstrtab_name_off, SHT_STRTAB, 0, shstrtab_offset, shstrtab_size, 0, 0, 0)); // [1] .shstrtab
    bytes.extend_from_slice(&shdr64(symtab_name_off, 2 /* SHT_SYMTAB */, 0, shstrtab_offset, 24, 99, 0, 24)); // [2] .symtab, sh_link=99 >= shnum
    bytes.extend_from_slice(&shstrtab);

    let mut src = SliceSource::new(&bytes);
    let mut reader = ElfReader::open(&mut src).unwrap();
    assert!(reader.read_all().is_err());
}

struct MapResolver {
    name: &'static str,
    address: u64,
}
impl SymbolResolver for MapResolver {
    fn resolve(&self, name: &str) -> Option<u64> {
        (name == self.name).then_some(self.address)
    }
}

/// Scenario 4: a RISC-V ELF containing one `R_RISCV_JUMP_SLOT` against an
/// undefined symbol, resolved by the embedder's resolver to address `X`,
/// writes `X` into the targeted GOT slot.
#[test]
fn jump_slot_relocation_writes_resolver_address() {
    init_logging();
    if cfg!(feature = "elf32") {
        return;
    }
    // Layout: header, 1 program header (PT_LOAD covering the GOT), 5
    // section headers, then the file content area (GOT bytes, .shstrtab,
    // .dynstr, .dynsym, .rela.dyn), offsets computed as we build it so
    // arithmetic mistakes can't silently misalign the file.
    let shnum: u16 = 5;
    let phnum: u16 = 1;
    let header_len = 64u64;
    let phdr_table_len = phnum as u64 * 56;
    let shdr_table_len = shnum as u64 * 64;
    let content_base = header_len + phdr_table_len + shdr_table_len;

    let mut body = Vec::new();
    let got_offset = content_base + body.len() as u64;
    body.extend_from_slice(&[0u8; 8]); // initial GOT slot value

    let mut shstrtab = vec![0u8];
    let name_shstrtab = shstrtab.len() as u32;
    shstrtab.extend_from_slice(b".shstrtab\0");
    let name_dynstr = shstrtab.len() as u32;
    shstrtab.extend_from_slice(b".dynstr\0");
    let name_dynsym = shstrtab.len() as u32;
    shstrtab.extend_from_slice(b".dynsym\0");
    let name_rela = shstrtab.len() as u32;
    shstrtab.extend_from_slice(b".rela.dyn\0");
    let shstrtab_offset = content_base + body.len() as u64;
    let shstrtab_size = shstrtab.len() as u64;
    body.extend_from_slice(&shstrtab);

    let mut dynstr = vec![0u8];
    let name_foo = dynstr.len() as u32;
    dynstr.extend_from_slice(b"foo\0");
    let dynstr_offset = content_base + body.len() as u64;
    let dynstr_size = dynstr.len() as u64;
    body.extend_from_slice(&dynstr);

    let dynsym_offset = content_base + body.len() as u64;
    body.extend_from_slice(&sym64(0, 0, 0, 0)); // index 0: mandatory null symbol
    body.extend_from_slice(&sym64(name_foo, 0x10, 0 /* SHN_UNDEF */, 0)); // index 1: "foo"
    let dynsym_size = 2 * 24u64;

    let rela_offset = content_base + body.len() as u64;
    // r_offset names the GOT's virtual address (0x1000), not its file
    // offset: the relocation is applied to the loaded image, not the file.
    body.extend_from_slice(&rela64(0x1000, 1, R_RISCV_JUMP_SLOT, 0));
    let rela_size = 24u64;

    let mut bytes = header64(2, RISCV_MACHINE, 0x1000, header_len, phnum, header_len + phdr_table_len, shnum, 1);
    bytes.extend_from_slice(&phdr64(PT_LOAD, 0x6, got_offset, 0x1000, 8, 8, 16));
    bytes.extend_from_slice(&shdr64(0, 0, 0, 0, 0, 0, 0, 0)); // [0] NULL
    bytes.extend_from_slice(&shdr64(name_shstrtab, SHT_STRTAB, 0, shstrtab_offset, shstrtab_size, 0, 0, 0)); // [1]
    bytes.extend_from_slice(&shdr64(name_dynstr, SHT_STRTAB, 0, dynstr_offset, dynstr_size, 0, 0, 0)); // [2]
    bytes.extend_from_slice(&shdr64(name_dynsym, SHT_DYNSYM, 0, dynsym_offset, dynsym_size, 2, 1, 24)); // [3] sh_link -> .dynstr
    bytes.extend_from_slice(&shdr64(name_rela, SHT_RELA, 0, rela_offset, rela_size, 3, 0, 24)); // [4] sh_link -> .dynsym
    bytes.extend_from_slice(&body);

    let mut src = SliceSource::new(&bytes);
    let mut reader = ElfReader::open(&mut src).unwrap();
    reader.read_all().unwrap();
    assert_eq!(reader.dynamic_symbols().len(), 2);

    let mut backing = vec![0u8; 64];
    let mut allocator = FixedAllocator { base: backing.as_mut_ptr() as u64 };
    let program = Loader::load(&mut reader, &mut allocator).unwrap();

    let mut resolver = MapResolver { name: "foo", address: 0xdead_beef };
    Riscv.apply_relocations(&program, &mut reader, &mut resolver).unwrap();

    let got_value = u64::from_le_bytes(backing[0..8].try_into().unwrap());
    assert_eq!(got_value, 0xdead_beef);
}

/// Scenario 5: a `PT_DYNAMIC` entry with tag `DT_NEEDED` and value pointing
/// inside `.dynstr` appends the referenced string to the dynamic-needed
/// list.
#[test]
fn dt_needed_entry_is_collected() {
    init_logging();
    if cfg!(feature = "elf32") {
        return;
    }
    let phnum: u16 = 1;
    let header_len = 64u64;
    let phdr_table_len = phnum as u64 * 56;
    let content_base = header_len + phdr_table_len;

    let mut dynstr = vec![0u8];
    let name_needed = dynstr.len() as u32;
    dynstr.extend_from_slice(b"libc.so\0");
    let dynstr_offset = content_base;
    let dynstr_size = dynstr.len() as u64;

    // PT_DYNAMIC content: one DT_NEEDED entry (value = offset into
    // .dynstr), then DT_STRTAB, then DT_NULL.
    let mut dynamic = Vec::new();
    dynamic.extend_from_slice(&le64(1)); // DT_NEEDED
    dynamic.extend_from_slice(&le64(name_needed as u64));
    dynamic.extend_from_slice(&le64(5)); // DT_STRTAB
    dynamic.extend_from_slice(&le64(dynstr_offset));
    dynamic.extend_from_slice(&le64(0)); // DT_NULL
    dynamic.extend_from_slice(&le64(0));
    let dynamic_offset = dynstr_offset + dynstr_size;
    let dynamic_size = dynamic.len() as u64;

    // Sections: only what's needed to resolve `.dynstr` by name for the
    // reader's needed-list pass.
    let shnum: u16 = 2;

    // Minimal section table: [0] NULL, [1] .dynstr (unnamed is fine since
    // read_dynamic_needed_list looks up the section named ".dynstr", but
    // section-name resolution itself requires a valid shstrndx string
    // table; point shstrndx at a table containing ".dynstr").
    let mut shstrtab = vec![0u8];
    let name_dynstr = shstrtab.len() as u32;
    shstrtab.extend_from_slice(b".dynstr\0");
    let shstrtab_offset = dynamic_offset + dynamic_size;
    let shstrtab_size = shstrtab.len() as u64;

    let shoff = shstrtab_offset + shstrtab_size;
    let mut bytes = header64(2, RISCV_MACHINE, 0, header_len, phnum, shoff, shnum, 0);
    bytes.extend_from_slice(&phdr64(2 /* PT_DYNAMIC */, 0x6, dynamic_offset, 0x2000, dynamic_size, dynamic_size, 8));
    bytes.extend_from_slice(&dynstr);
    bytes.extend_from_slice(&dynamic);
    bytes.extend_from_slice(&shstrtab);
    // shstrndx = 0 means section [0] is its own name table; give section
    // [0] a real STRTAB type containing ".dynstr" so name resolution works
    // without a dedicated .shstrtab section.
    bytes.extend_from_slice(&shdr64(0, SHT_STRTAB, 0, shstrtab_offset, shstrtab_size, 0, 0, 0)); // [0]
    bytes.extend_from_slice(&shdr64(name_dynstr, SHT_STRTAB, 0, dynstr_offset, dynstr_size, 0, 0, 0)); // [1] .dynstr

    let mut src = SliceSource::new(&bytes);
    let mut reader = ElfReader::open(&mut src).unwrap();
    reader.read_all().unwrap();

    assert_eq!(reader.needed(), &["libc.so".to_string()]);
}
