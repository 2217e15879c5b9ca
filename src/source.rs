//! The random-access byte source the reader pulls structured data from.
//!
//! The loader never owns or closes this source; it is borrowed for the
//! lifetime of an [`crate::reader::ElfReader`] and every structured read
//! re-seeks explicitly rather than assuming sequential access, since its
//! file-cursor position is used as scratch between reads.

use crate::error::{Error, LoaderResult};

/// A random-access byte source: `read` and `seek`, nothing more.
///
/// Implementations are never closed by this crate. Errors from the
/// underlying source short-circuit the current parse with
/// [`Error::IoError`].
pub trait ByteSource {
    /// Reads exactly `dest.len()` bytes starting at the current position.
    fn read(&mut self, dest: &mut [u8]) -> LoaderResult<()>;

    /// Moves the current position to `offset` bytes from the start.
    fn seek(&mut self, offset: u64) -> LoaderResult<()>;

    /// Seeks to `offset` and reads exactly `dest.len()` bytes.
    fn read_at(&mut self, offset: u64, dest: &mut [u8]) -> LoaderResult<()> {
        self.seek(offset)?;
        self.read(dest)
    }
}

/// An in-memory [`ByteSource`] over a borrowed slice. Used by tests and by
/// embedders that have already staged the image in memory.
pub struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> ByteSource for SliceSource<'a> {
    fn read(&mut self, dest: &mut [u8]) -> LoaderResult<()> {
        let end = self
            .pos
            .checked_add(dest.len())
            .ok_or(Error::IoError)?;
        let src = self.data.get(self.pos..end).ok_or(Error::IoError)?;
        dest.copy_from_slice(src);
        self.pos = end;
        Ok(())
    }

    fn seek(&mut self, offset: u64) -> LoaderResult<()> {
        let offset: usize = offset.try_into().map_err(|_| Error::IoError)?;
        if offset > self.data.len() {
            return Err(Error::IoError);
        }
        self.pos = offset;
        Ok(())
    }
}

#[cfg(feature = "std")]
mod std_impl {
    use super::*;
    use std::io::{Read, Seek, SeekFrom};

    /// Blanket [`ByteSource`] impl over anything that is both
    /// [`std::io::Read`] and [`std::io::Seek`], in particular
    /// `std::fs::File`.
    impl<T: Read + Seek> ByteSource for T {
        fn read(&mut self, dest: &mut [u8]) -> LoaderResult<()> {
            Read::read_exact(self, dest).map_err(|_| Error::IoError)
        }

        fn seek(&mut self, offset: u64) -> LoaderResult<()> {
            Seek::seek(self, SeekFrom::Start(offset))
                .map(|_| ())
                .map_err(|_| Error::IoError)
        }
    }
}
