//! The 16-byte `e_ident` block at the start of every ELF file.

use crate::error::{Error, LoaderResult};

/// `EI_CLASS`: word size of the object file.
///
/// - [ElfClass::Class32]: 32-bit ELF file
/// - [ElfClass::Class64]: 64-bit ELF file
#[repr(u8)]
#[derive(Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub enum ElfClass {
    Class32 = 1,
    Class64 = 2,
}

impl ElfClass {
    fn from_byte(byte: u8) -> LoaderResult<Self> {
        match byte {
            1 => Ok(Self::Class32),
            2 => Ok(Self::Class64),
            _ => Err(Error::InvalidFormat("unrecognised EI_CLASS byte")),
        }
    }

    /// The class this crate was built to accept, selected by the `elf32` feature.
    pub const fn host() -> Self {
        if cfg!(feature = "elf32") {
            Self::Class32
        } else {
            Self::Class64
        }
    }

    pub fn word_size(self) -> usize {
        match self {
            Self::Class32 => 4,
            Self::Class64 => 8,
        }
    }
}

/// `EI_DATA`: byte order of multi-byte fields.
#[repr(u8)]
#[derive(Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub enum ElfEndian {
    Little = 1,
    Big = 2,
}

impl ElfEndian {
    fn from_byte(byte: u8) -> LoaderResult<Self> {
        match byte {
            1 => Ok(Self::Little),
            2 => Ok(Self::Big),
            _ => Err(Error::InvalidFormat("unrecognised EI_DATA byte")),
        }
    }

    /// The endianness of the host this crate was built for. Cross-endian
    /// images are rejected at `open` time; see the crate-level docs.
    pub const fn host() -> Self {
        #[cfg(target_endian = "big")]
        {
            Self::Big
        }
        #[cfg(target_endian = "little")]
        {
            Self::Little
        }
    }
}

/// `EI_VERSION` in the ident block. Only version 1 (`Current`) exists.
#[repr(u8)]
#[derive(Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub enum ElfVersion {
    Current = 1,
}

impl ElfVersion {
    fn from_byte(byte: u8) -> LoaderResult<Self> {
        match byte {
            1 => Ok(Self::Current),
            _ => Err(Error::InvalidFormat("unrecognised EI_VERSION byte")),
        }
    }
}

/// `EI_OSABI`.
#[repr(u8)]
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Default)]
pub enum ElfOsAbi {
    #[default]
    Unspecified = 0x00,
    HpUx = 0x01,
    NetBsd = 0x02,
    Gnu = 0x03,
    Solaris = 0x06,
    Aix = 0x07,
    Irix = 0x08,
    FreeBsd = 0x09,
    Tru64 = 0x0a,
    Modesto = 0x0b,
    OpenBsd = 0x0c,
    OpenVms = 0x0d,
    Nsk = 0x0e,
    Aros = 0x0f,
    FenixOs = 0x10,
    CloudAbi = 0x11,
    OpenVos = 0x12,
    Other(u8),
}

impl From<u8> for ElfOsAbi {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::Unspecified,
            0x01 => Self::HpUx,
            0x02 => Self::NetBsd,
            0x03 => Self::Gnu,
            0x06 => Self::Solaris,
            0x07 => Self::Aix,
            0x08 => Self::Irix,
            0x09 => Self::FreeBsd,
            0x0a => Self::Tru64,
            0x0b => Self::Modesto,
            0x0c => Self::OpenBsd,
            0x0d => Self::OpenVms,
            0x0e => Self::Nsk,
            0x0f => Self::Aros,
            0x10 => Self::FenixOs,
            0x11 => Self::CloudAbi,
            0x12 => Self::OpenVos,
            other => Self::Other(other),
        }
    }
}

/// The 16-byte `e_ident` array, decoded and validated.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct ElfIdent {
    pub class: ElfClass,
    pub endian: ElfEndian,
    pub version: ElfVersion,
    pub abi: ElfOsAbi,
    pub abi_version: u8,
}

const MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

impl ElfIdent {
    pub const SIZE: usize = 16;

    /// Parses and validates a 16-byte `e_ident` block against the magic,
    /// host word size, and host endianness.
    pub fn parse(bytes: &[u8; Self::SIZE]) -> LoaderResult<Self> {
        if bytes[0..4] != MAGIC {
            return Err(Error::InvalidFormat("bad ELF magic"));
        }

        let class = ElfClass::from_byte(bytes[4])?;
        if class != ElfClass::host() {
            return Err(Error::InvalidFormat("ELF class does not match host word size"));
        }

        let endian = ElfEndian::from_byte(bytes[5])?;
        if endian != ElfEndian::host() {
            return Err(Error::InvalidFormat("ELF endianness does not match host"));
        }

        let version = ElfVersion::from_byte(bytes[6])?;
        let abi = ElfOsAbi::from(bytes[7]);
        let abi_version = bytes[8];

        Ok(Self {
            class,
            endian,
            version,
            abi,
            abi_version,
        })
    }
}
