//! RISC-V relocation type dispatch.
//!
//! `R_RISCV_PCREL_LO12_I`/`_S` reference the address of the paired
//! `R_RISCV_PCREL_HI20` relocation, not a symbol, so the HI20 entries are
//! indexed by target offset in a first pass and consulted by the LO12
//! entries in a second. `alloc` has no `HashMap` without pulling in a
//! hashing crate the rest of the corpus doesn't use for this, so the index
//! is a `BTreeMap` keyed by the HI20's `r_offset`.
//!
//! Relocations patch the *loaded* image, not the source file: once the
//! loader has placed a segment, `r_offset + load_bias` is a live host
//! address inside the allocator-supplied memory, and patching is a direct
//! pointer write (same trust boundary as the loader's own segment copy in
//! `crate::loader`).

use alloc::collections::BTreeMap;

use crate::loader::Program;
use crate::reader::ElfReader;
use crate::reloc::{read_entries, relocation_sections, resolve_symbol, RelocEntry, RelocationArch, SymbolResolver};
use crate::source::ByteSource;
use crate::symbol::SymbolInfo;
use crate::{Error, LoaderResult};

pub const R_RISCV_NONE: u32 = 0;
pub const R_RISCV_32: u32 = 1;
pub const R_RISCV_64: u32 = 2;
pub const R_RISCV_RELATIVE: u32 = 3;
pub const R_RISCV_JUMP_SLOT: u32 = 5;
pub const R_RISCV_BRANCH: u32 = 16;
pub const R_RISCV_JAL: u32 = 17;
pub const R_RISCV_CALL: u32 = 18;
pub const R_RISCV_CALL_PLT: u32 = 19;
pub const R_RISCV_PCREL_HI20: u32 = 23;
pub const R_RISCV_PCREL_LO12_I: u32 = 24;
pub const R_RISCV_PCREL_LO12_S: u32 = 25;

/// The RISC-V implementation of [`RelocationArch`].
pub struct Riscv;

/// Reads the 32-bit word at host address `addr`.
///
/// # Safety contract
/// `addr` must fall within the bounds of the `Program`'s allocator-supplied
/// memory; every call site derives it from `r_offset + load_bias` against a
/// segment the loader has already placed there.
fn read_word(addr: u64) -> u32 {
    unsafe { core::ptr::read_unaligned(addr as *const u32) }
}

fn write_word(addr: u64, word: u32) {
    unsafe { core::ptr::write_unaligned(addr as *mut u32, word) }
}

/// U-type immediate: bits `[31:12]` of a 32-bit value, sign-extension
/// folded into bit 11 via the `+ 0x800` rounding the ABI specifies so the
/// paired I-type's sign-extended low 12 bits reconstruct the original
/// value.
fn encode_u_type(insn: u32, value: i64) -> u32 {
    let hi20 = (value.wrapping_add(0x800) as u32) & 0xffff_f000;
    (insn & 0x0000_0fff) | hi20
}

/// I-type immediate: bits `[11:0]` placed at `insn[31:20]`.
fn encode_i_type(insn: u32, value: i64) -> u32 {
    let lo12 = (value as u32) & 0xfff;
    (insn & 0x000f_ffff) | (lo12 << 20)
}

/// S-type immediate: bits `[11:5]` at `insn[31:25]`, bits `[4:0]` at
/// `insn[11:7]`.
fn encode_s_type(insn: u32, value: i64) -> u32 {
    let v = (value as u32) & 0xfff;
    let hi = (v >> 5) & 0x7f;
    let lo = v & 0x1f;
    (insn & 0x01f0_0fff) | (hi << 25) | (lo << 7)
}

/// B-type immediate: bit 12 at `insn[31]`, bits `[10:5]` at `insn[30:25]`,
/// bits `[4:1]` at `insn[11:8]`, bit 11 at `insn[7]`. Bit 0 is implicitly
/// zero (branch targets are 2-byte aligned).
fn encode_b_type(insn: u32, value: i64) -> u32 {
    let v = value as u32;
    let b12 = (v >> 12) & 0x1;
    let b10_5 = (v >> 5) & 0x3f;
    let b4_1 = (v >> 1) & 0xf;
    let b11 = (v >> 11) & 0x1;
    (insn & 0x0000_007f) | (b12 << 31) | (b10_5 << 25) | (b4_1 << 8) | (b11 << 7)
}

/// J-type immediate: bit 20 at `insn[31]`, bits `[10:1]` at `insn[30:21]`,
/// bit 11 at `insn[20]`, bits `[19:12]` at `insn[19:12]`.
fn encode_j_type(insn: u32, value: i64) -> u32 {
    let v = value as u32;
    let b20 = (v >> 20) & 0x1;
    let b10_1 = (v >> 1) & 0x3ff;
    let b11 = (v >> 11) & 0x1;
    let b19_12 = (v >> 12) & 0xff;
    (insn & 0x0000_0fff) | (b20 << 31) | (b10_1 << 21) | (b11 << 20) | (b19_12 << 12)
}

impl<S: ByteSource> RelocationArch<S> for Riscv {
    fn apply_relocations(
        &self,
        program: &Program,
        reader: &mut ElfReader<'_, S>,
        resolver: &mut dyn SymbolResolver,
    ) -> LoaderResult<()> {
        let ident = reader.header().ident;
        let offs = program.load_bias();

        let sections = reader.sections().to_vec();
        let symbols = reader.symbols().to_vec();
        let dynsyms = reader.dynamic_symbols().to_vec();
        let reloc_sections = relocation_sections(&sections, &symbols, &dynsyms);

        // First pass: index every PCREL_HI20's resolved target by the
        // file-view offset of the instruction it patches, so the matching
        // PCREL_LO12_{I,S} can look it up in the second pass.
        let mut hi20_targets: BTreeMap<u64, i64> = BTreeMap::new();
        for rs in &reloc_sections {
            let entries = read_entries(reader.raw_source(), &ident, rs.section)?;
            for entry in &entries {
                if entry.reloc_type != R_RISCV_PCREL_HI20 {
                    continue;
                }
                let sym = rs
                    .symbols
                    .get(entry.symbol_index as usize)
                    .ok_or(Error::InvalidFormat("relocation symbol index out of range"))?;
                let addend = entry.addend.unwrap_or(0);
                let s = resolve_symbol(sym, offs, resolver)?;
                let p = (entry.offset as i64 + offs) as u64;
                hi20_targets.insert(entry.offset, s + addend - p as i64);
            }
        }

        let word_size = ident.class.word_size();
        for rs in &reloc_sections {
            let entries = read_entries(reader.raw_source(), &ident, rs.section)?;
            for entry in &entries {
                apply_one(entry, rs.symbols, offs, resolver, &hi20_targets, word_size)?;
            }
        }

        Ok(())
    }
}

fn apply_one(
    entry: &RelocEntry,
    symbols: &[SymbolInfo],
    offs: i64,
    resolver: &mut dyn SymbolResolver,
    hi20_targets: &BTreeMap<u64, i64>,
    word_size: usize,
) -> LoaderResult<()> {
    let p = (entry.offset as i64 + offs) as u64;

    match entry.reloc_type {
        R_RISCV_NONE => Ok(()),

        // RELATIVE/JUMP_SLOT patch a pointer-width slot (4 bytes on ELF32,
        // 8 on ELF64); 32/64 always patch their named width regardless of
        // class, matching how the ABI defines them for non-pointer data.
        R_RISCV_32 | R_RISCV_64 | R_RISCV_RELATIVE | R_RISCV_JUMP_SLOT => {
            let write_width = match entry.reloc_type {
                R_RISCV_32 => 4,
                R_RISCV_64 => 8,
                _ => word_size,
            };
            let addend = match entry.addend {
                Some(a) => a,
                None if entry.reloc_type == R_RISCV_RELATIVE => 0,
                None if write_width == 8 => {
                    let lo = read_word(p) as u64;
                    let hi = read_word(p + 4) as u64;
                    ((hi << 32) | lo) as i64
                }
                None => read_word(p) as i32 as i64,
            };
            let value = if entry.reloc_type == R_RISCV_RELATIVE {
                offs + addend
            } else {
                let sym = symbols
                    .get(entry.symbol_index as usize)
                    .ok_or(Error::InvalidFormat("relocation symbol index out of range"))?;
                resolve_symbol(sym, offs, resolver)? + addend
            };
            if write_width == 8 {
                write_word(p, value as u32);
                write_word(p + 4, (value >> 32) as u32);
            } else {
                write_word(p, value as u32);
            }
            Ok(())
        }

        R_RISCV_CALL | R_RISCV_CALL_PLT | R_RISCV_BRANCH | R_RISCV_JAL => {
            let sym = symbols
                .get(entry.symbol_index as usize)
                .ok_or(Error::InvalidFormat("relocation symbol index out of range"))?;
            let addend = entry.addend.unwrap_or(0);
            let s = resolve_symbol(sym, offs, resolver)?;
            let target = s + addend - p as i64;

            match entry.reloc_type {
                R_RISCV_BRANCH => write_word(p, encode_b_type(read_word(p), target)),
                R_RISCV_JAL => write_word(p, encode_j_type(read_word(p), target)),
                // CALL/CALL_PLT patch an AUIPC+JALR pair: AUIPC gets the
                // U-type high bits, JALR (4 bytes later) gets the I-type low
                // bits, same HI20/LO12 split as the dedicated PCREL pair.
                _ => {
                    write_word(p, encode_u_type(read_word(p), target));
                    write_word(p + 4, encode_i_type(read_word(p + 4), target));
                }
            }
            Ok(())
        }

        R_RISCV_PCREL_HI20 => {
            let sym = symbols
                .get(entry.symbol_index as usize)
                .ok_or(Error::InvalidFormat("relocation symbol index out of range"))?;
            let addend = entry.addend.unwrap_or(0);
            let s = resolve_symbol(sym, offs, resolver)?;
            let target = s + addend - p as i64;
            write_word(p, encode_u_type(read_word(p), target));
            Ok(())
        }

        R_RISCV_PCREL_LO12_I | R_RISCV_PCREL_LO12_S => {
            // `r_sym` here names the symbol table entry of the HI20
            // relocation, not a normal symbol; its `st_value` is the HI20's
            // `r_offset`.
            let hi20_offset = symbols
                .get(entry.symbol_index as usize)
                .map(|s| s.value)
                .ok_or(Error::InvalidFormat("PCREL_LO12 symbol index out of range"))?;
            let target = *hi20_targets
                .get(&hi20_offset)
                .ok_or(Error::InvalidFormat("PCREL_LO12 has no matching PCREL_HI20"))?;
            let insn = read_word(p);
            let patched = if entry.reloc_type == R_RISCV_PCREL_LO12_I {
                encode_i_type(insn, target)
            } else {
                encode_s_type(insn, target)
            };
            write_word(p, patched);
            Ok(())
        }

        other => Err(Error::UnsupportedRelocation(other)),
    }
}
