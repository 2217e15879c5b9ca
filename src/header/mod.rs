//! Fixed-layout on-file records: the ELF file header, program headers, and
//! section headers.
//!
//! Every `read` here takes an explicit byte offset and a
//! [`crate::source::ByteSource`] rather than a pre-sliced buffer, so the
//! reader never needs to hold the whole file in memory.

use alloc::string::String;
use bitflags::bitflags;

use crate::endian::EndianReader;
use crate::error::{Error, LoaderResult};
use crate::header::ident::{ElfClass, ElfEndian, ElfIdent};
use crate::source::ByteSource;

pub mod ident;

/// Reads a class-dependent address/offset field (`u32` widened to `u64` on
/// ELF32, native `u64` on ELF64) out of `buf` at `$offset`.
macro_rules! read_class_dependent {
    ($ident:expr, $buf:expr, $offset:expr) => {
        match $ident.class {
            ElfClass::Class32 => $ident.endian.read::<u32>(&$buf[$offset..]) as u64,
            ElfClass::Class64 => $ident.endian.read::<u64>(&$buf[$offset..]),
        }
    };
}

/// `e_type`.
#[repr(u16)]
#[derive(Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Default)]
pub enum FileType {
    #[default]
    None = 0,
    Relocatable = 1,
    Executable = 2,
    SharedObject = 3,
    Core = 4,
    Unknown(u16) = 5,
}

impl From<u16> for FileType {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Relocatable,
            2 => Self::Executable,
            3 => Self::SharedObject,
            4 => Self::Core,
            value => Self::Unknown(value),
        }
    }
}

/// `e_machine`, restricted to the architectures this crate's compile-time
/// configuration (`machine-x86`, `machine-x86-64`, `machine-riscv`) is
/// meant to recognise. Unset pins accept any value and leave the check to
/// the embedder.
#[repr(u16)]
#[derive(Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Default)]
pub enum TargetMachine {
    #[default]
    None = 0,
    X86 = 0x03,
    X86_64 = 0x3e,
    Arm = 40,
    Arm64 = 183,
    Riscv = 0xf3,
    Unknown(u16) = 0xffff,
}

impl From<u16> for TargetMachine {
    fn from(value: u16) -> Self {
        match value {
            0x03 => Self::X86,
            0x3e => Self::X86_64,
            40 => Self::Arm,
            183 => Self::Arm64,
            0xf3 => Self::Riscv,
            0 => Self::None,
            value => Self::Unknown(value),
        }
    }
}

impl TargetMachine {
    /// The machine type pinned at compile time by a `machine-*` feature, if
    /// any. `None` means the embedder accepts any machine.
    pub const fn pinned() -> Option<Self> {
        if cfg!(feature = "machine-x86") {
            Some(Self::X86)
        } else if cfg!(feature = "machine-x86-64") {
            Some(Self::X86_64)
        } else if cfg!(feature = "machine-riscv") {
            Some(Self::Riscv)
        } else {
            None
        }
    }

    /// The raw `e_machine` value this variant was decoded from. Carries an
    /// `Unknown(u16)` payload, so this can't be an `as` cast.
    pub fn raw(self) -> u16 {
        match self {
            Self::None => 0,
            Self::X86 => 0x03,
            Self::X86_64 => 0x3e,
            Self::Arm => 40,
            Self::Arm64 => 183,
            Self::Riscv => 0xf3,
            Self::Unknown(value) => value,
        }
    }
}

/// The ELF file header (`Elf{32,64}_Ehdr`), minus `e_ident` which lives in
/// [`ElfIdent`].
#[derive(Clone, Copy, Debug)]
pub struct FileHeader {
    pub ident: ElfIdent,
    pub ty: FileType,
    pub machine: TargetMachine,
    pub version: u32,
    pub entry: u64,
    pub program_header_offset: u64,
    pub section_header_offset: u64,
    pub flags: u32,
    pub header_size: u16,
    pub program_header_size: u16,
    pub program_header_count: u16,
    pub section_header_size: u16,
    pub section_header_count: u16,
    pub string_table_index: u16,
}

impl FileHeader {
    /// Known on-disk size of the fixed part of the header, excluding
    /// `e_ident`, for each class.
    fn rest_size(class: ElfClass) -> usize {
        match class {
            ElfClass::Class32 => 36,
            ElfClass::Class64 => 48,
        }
    }

    /// Reads and validates the complete file header, including `e_ident`.
    ///
    /// Fails with [`Error::InvalidFormat`] when: magic, class, endianness,
    /// or version invariants fail (see [`ElfIdent::parse`]); the declared
    /// header size disagrees with the known on-disk size for this class; or
    /// a compile-time machine pin is set and the file's machine disagrees.
    pub fn read(source: &mut dyn ByteSource) -> LoaderResult<Self> {
        let mut ident_bytes = [0u8; ElfIdent::SIZE];
        source.read_at(0, &mut ident_bytes)?;
        let ident = ElfIdent::parse(&ident_bytes)?;

        let rest_size = Self::rest_size(ident.class);
        let mut buf = [0u8; 48];
        source.read_at(ElfIdent::SIZE as u64, &mut buf[..rest_size])?;
        let endian = ident.endian;

        let ty = FileType::from(endian.read::<u16>(&buf[0..]));
        let machine_raw = endian.read::<u16>(&buf[2..]);
        let version = endian.read::<u32>(&buf[4..]);

        let mut off = 8;
        let entry = read_class_dependent!(ident, buf, off);
        off += ident.class.word_size();
        let program_header_offset = read_class_dependent!(ident, buf, off);
        off += ident.class.word_size();
        let section_header_offset = read_class_dependent!(ident, buf, off);
        off += ident.class.word_size();

        let flags = endian.read::<u32>(&buf[off..]);
        off += 4;
        let header_size = endian.read::<u16>(&buf[off..]);
        off += 2;
        let program_header_size = endian.read::<u16>(&buf[off..]);
        off += 2;
        let program_header_count = endian.read::<u16>(&buf[off..]);
        off += 2;
        let section_header_size = endian.read::<u16>(&buf[off..]);
        off += 2;
        let section_header_count = endian.read::<u16>(&buf[off..]);
        off += 2;
        let string_table_index = endian.read::<u16>(&buf[off..]);

        let expected_header_size = (ElfIdent::SIZE + rest_size) as u16;
        if header_size != expected_header_size {
            return Err(Error::InvalidFormat("e_ehsize disagrees with known header layout"));
        }

        if version != 1 {
            return Err(Error::InvalidFormat("e_version is not 1"));
        }

        if let Some(pinned) = TargetMachine::pinned() {
            if machine_raw != pinned.raw() {
                return Err(Error::InvalidFormat("e_machine does not match compiled-in machine"));
            }
        }

        Ok(Self {
            ident,
            ty,
            machine: TargetMachine::from(machine_raw),
            version,
            entry,
            program_header_offset,
            section_header_offset,
            flags,
            header_size,
            program_header_size,
            program_header_count,
            section_header_size,
            section_header_count,
            string_table_index,
        })
    }
}

/// `p_type`.
#[repr(u32)]
#[derive(Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Default)]
pub enum SegmentType {
    #[default]
    Null = 0x0,
    Load = 0x1,
    Dynamic = 0x2,
    Interp = 0x3,
    Note = 0x4,
    ShLib = 0x5,
    Phdr = 0x6,
    Tls = 0x7,
    GnuEhFrame = 0x6474_e550,
    GnuStack = 0x6474_e551,
    GnuRelro = 0x6474_e552,
    GnuProperty = 0x6474_e553,
    Unknown(u32) = 0xffff_ffff,
}

impl From<u32> for SegmentType {
    fn from(value: u32) -> Self {
        match value {
            0x0 => Self::Null,
            0x1 => Self::Load,
            0x2 => Self::Dynamic,
            0x3 => Self::Interp,
            0x4 => Self::Note,
            0x5 => Self::ShLib,
            0x6 => Self::Phdr,
            0x7 => Self::Tls,
            0x6474_e550 => Self::GnuEhFrame,
            0x6474_e551 => Self::GnuStack,
            0x6474_e552 => Self::GnuRelro,
            0x6474_e553 => Self::GnuProperty,
            value => Self::Unknown(value),
        }
    }
}

bitflags! {
    /// `p_flags`: access rights a `PT_LOAD` segment wants at runtime. This
    /// is exactly the input the MPU policy maps to PMP bits.
    #[derive(Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Default)]
    pub struct SegmentFlags: u32 {
        const EXECUTABLE = 0x1;
        const WRITABLE   = 0x2;
        const READABLE   = 0x4;
    }
}

/// A program header (`Elf{32,64}_Phdr`).
#[derive(Clone, Copy, Eq, PartialEq, Debug, Default)]
pub struct ProgramInfo {
    pub ty: SegmentType,
    pub flags: SegmentFlags,
    pub offset: u64,
    pub vaddr: u64,
    pub paddr: u64,
    pub file_size: u64,
    pub mem_size: u64,
    pub align: u64,
}

impl ProgramInfo {
    pub fn read(source: &mut dyn ByteSource, ident: &ElfIdent, offset: u64, entsize: u16) -> LoaderResult<Self> {
        let mut buf = [0u8; 56];
        let size = entsize as usize;
        if size > buf.len() {
            return Err(Error::InvalidFormat("program header entry size too large"));
        }
        source.read_at(offset, &mut buf[..size])?;
        let endian = ident.endian;

        let ty = SegmentType::from(endian.read::<u32>(&buf[0..]));
        Ok(match ident.class {
            ElfClass::Class64 => {
                let flags = SegmentFlags::from_bits_retain(endian.read::<u32>(&buf[4..]));
                Self {
                    ty,
                    flags,
                    offset: endian.read::<u64>(&buf[8..]),
                    vaddr: endian.read::<u64>(&buf[16..]),
                    paddr: endian.read::<u64>(&buf[24..]),
                    file_size: endian.read::<u64>(&buf[32..]),
                    mem_size: endian.read::<u64>(&buf[40..]),
                    align: endian.read::<u64>(&buf[48..]),
                }
            }
            ElfClass::Class32 => Self {
                ty,
                offset: endian.read::<u32>(&buf[4..]) as u64,
                vaddr: endian.read::<u32>(&buf[8..]) as u64,
                paddr: endian.read::<u32>(&buf[12..]) as u64,
                file_size: endian.read::<u32>(&buf[16..]) as u64,
                mem_size: endian.read::<u32>(&buf[20..]) as u64,
                flags: SegmentFlags::from_bits_retain(endian.read::<u32>(&buf[24..])),
                align: endian.read::<u32>(&buf[28..]) as u64,
            },
        })
    }
}

/// `sh_type`.
#[repr(u32)]
#[derive(Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Default)]
pub enum SectionType {
    #[default]
    Null = 0,
    ProgBits = 1,
    SymbolTable = 2,
    StringTable = 3,
    Rela = 4,
    Hash = 5,
    Dynamic = 6,
    Note = 7,
    NoBits = 8,
    Rel = 9,
    ShLib = 10,
    DynamicSymbol = 11,
    InitArray = 14,
    FiniArray = 15,
    PreInitArray = 16,
    Group = 17,
    SymbolTableIndex = 81,
    Unknown(u32) = 0xffff_ffff,
}

impl From<u32> for SectionType {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::Null,
            1 => Self::ProgBits,
            2 => Self::SymbolTable,
            3 => Self::StringTable,
            4 => Self::Rela,
            5 => Self::Hash,
            6 => Self::Dynamic,
            7 => Self::Note,
            8 => Self::NoBits,
            9 => Self::Rel,
            10 => Self::ShLib,
            11 => Self::DynamicSymbol,
            14 => Self::InitArray,
            15 => Self::FiniArray,
            16 => Self::PreInitArray,
            17 => Self::Group,
            81 => Self::SymbolTableIndex,
            value => Self::Unknown(value),
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Default)]
    pub struct SectionFlags: u64 {
        const WRITE            = 0x1;
        const ALLOC            = 0x2;
        const INSTRUCTIONS     = 0x4;
        const MERGE            = 0x10;
        const STRINGS          = 0x20;
        const INFO_LINK        = 0x40;
        const LINK_ORDER       = 0x80;
        const OS_NONCONFORMING = 0x100;
        const GROUP            = 0x200;
        const TLS              = 0x400;
        const COMPRESSED       = 0x800;
    }
}

/// A section header (`Elf{32,64}_Shdr`) together with its resolved name.
/// The name is filled in by a second pass in [`crate::reader::ElfReader`]
/// once `shstrndx` is known.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct SectionInfo {
    pub name_index: u32,
    pub ty: SectionType,
    pub flags: SectionFlags,
    pub addr: u64,
    pub offset: u64,
    pub size: u64,
    pub link: u32,
    pub info: u32,
    pub addr_align: u64,
    pub entry_size: u64,
    pub name: String,
}

impl SectionInfo {
    pub fn read(source: &mut dyn ByteSource, ident: &ElfIdent, offset: u64, entsize: u16) -> LoaderResult<Self> {
        let mut buf = [0u8; 64];
        let size = entsize as usize;
        if size > buf.len() {
            return Err(Error::InvalidFormat("section header entry size too large"));
        }
        source.read_at(offset, &mut buf[..size])?;
        let endian = ident.endian;

        let name_index = endian.read::<u32>(&buf[0..]);
        let ty = SectionType::from(endian.read::<u32>(&buf[4..]));

        Ok(match ident.class {
            ElfClass::Class64 => Self {
                name_index,
                ty,
                flags: SectionFlags::from_bits_retain(endian.read::<u64>(&buf[8..])),
                addr: endian.read::<u64>(&buf[16..]),
                offset: endian.read::<u64>(&buf[24..]),
                size: endian.read::<u64>(&buf[32..]),
                link: endian.read::<u32>(&buf[40..]),
                info: endian.read::<u32>(&buf[44..]),
                addr_align: endian.read::<u64>(&buf[48..]),
                entry_size: endian.read::<u64>(&buf[56..]),
                name: Default::default(),
            },
            ElfClass::Class32 => Self {
                name_index,
                ty,
                flags: SectionFlags::from_bits_retain(endian.read::<u32>(&buf[8..]) as u64),
                addr: endian.read::<u32>(&buf[12..]) as u64,
                offset: endian.read::<u32>(&buf[16..]) as u64,
                size: endian.read::<u32>(&buf[20..]) as u64,
                link: endian.read::<u32>(&buf[24..]),
                info: endian.read::<u32>(&buf[28..]),
                addr_align: endian.read::<u32>(&buf[32..]) as u64,
                entry_size: endian.read::<u32>(&buf[36..]) as u64,
                name: Default::default(),
            },
        })
    }
}
