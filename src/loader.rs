//! Segment placement: computing where a program wants to live, asking the
//! embedder for backing memory, and copying file-backed bytes into it.

use core::ptr;

use crate::header::SegmentType;
use crate::reader::ElfReader;
use crate::source::ByteSource;
use crate::{Error, LoaderResult};

/// Embedder-supplied allocator. `allocate` must return `(0, _)` on failure;
/// any non-zero `real_vaddr` is taken as success even if it differs from
/// `requested_vaddr`.
pub trait Allocator {
    fn allocate(&mut self, requested_vaddr: u64, size: u64, align: u64) -> (u64, usize);
}

/// Paired with [`Allocator`] to release a [`Program`]'s backing memory.
/// Every allocator-callback loader in the wider corpus exposes the inverse
/// call, so this crate does too.
pub trait Deallocator {
    fn deallocate(&mut self, cookie: usize, size: u64);
}

/// The loader's output: where the program actually ended up, and how to
/// reach it.
#[derive(Debug)]
pub struct Program {
    pub vaddr_requested: u64,
    pub vaddr_real: u64,
    pub size: u64,
    pub memory: *mut u8,
    pub cookie: usize,
    pub entry: u64,
    pub dynamic: Option<*mut u8>,
}

impl Default for Program {
    fn default() -> Self {
        Self {
            vaddr_requested: 0,
            vaddr_real: 0,
            size: 0,
            memory: ptr::null_mut(),
            cookie: 0,
            entry: 0,
            dynamic: None,
        }
    }
}

impl Program {
    /// `real_base - requested_base`, used uniformly to translate file-view
    /// addresses into host-view addresses.
    pub fn load_bias(&self) -> i64 {
        self.vaddr_real as i64 - self.vaddr_requested as i64
    }

    fn is_empty(&self) -> bool {
        self.memory.is_null()
    }
}

const DEFAULT_ALIGN: u64 = 32;

/// Loads the `PT_LOAD` segments of a parsed image into embedder-supplied
/// memory. Does not apply relocations and does not program the MPU; those
/// are separate steps the embedder chooses to run.
pub struct Loader;

impl Loader {
    /// Computes `[addr_min, addr_max)`, the alignment, asks `allocator` for
    /// backing memory, copies every `PT_LOAD` segment's file bytes in and
    /// zero-fills its tail, computes the relocated entry point, and, if a
    /// `PT_DYNAMIC` segment is present, records its host-view address.
    ///
    /// On allocator failure (`real_base == 0`) returns an empty `Program`
    /// and logs the failure rather than erroring.
    pub fn load<S: ByteSource>(reader: &mut ElfReader<'_, S>, allocator: &mut dyn Allocator) -> LoaderResult<Program> {
        reader.ensure_program_headers()?;

        let load_segments: alloc::vec::Vec<_> = reader
            .program_headers()
            .iter()
            .filter(|p| p.ty == SegmentType::Load)
            .cloned()
            .collect();

        if load_segments.is_empty() {
            log::warn!("ELF image has no PT_LOAD segments");
            return Ok(Program::default());
        }

        let addr_min = load_segments.iter().map(|p| p.vaddr).min().unwrap();
        let addr_max = load_segments
            .iter()
            .map(|p| p.vaddr + p.mem_size)
            .max()
            .unwrap();
        let size = addr_max - addr_min;

        // Honour the largest declared segment alignment rather than the
        // hard-coded 32-byte floor when one is declared.
        let align = load_segments
            .iter()
            .map(|p| p.align)
            .filter(|&a| a.is_power_of_two())
            .max()
            .map(|a| a.max(DEFAULT_ALIGN))
            .unwrap_or(DEFAULT_ALIGN);

        let (real_base, cookie) = allocator.allocate(addr_min, size, align);
        if real_base == 0 {
            log::error!("allocator failed to provide {size:#x} bytes for ELF image");
            return Ok(Program::default());
        }

        let offs = real_base as i64 - addr_min as i64;
        let memory = real_base as *mut u8;

        for segment in &load_segments {
            let dest = (segment.vaddr as i64 + offs) as u64 as *mut u8;
            // SAFETY: `dest` lies within `[real_base, real_base + size)`
            // because `addr_min..addr_max` was derived from exactly these
            // segments and `offs` translates file-view to host-view
            // addresses uniformly.
            unsafe {
                let dest_slice = core::slice::from_raw_parts_mut(dest, segment.file_size as usize);
                reader.raw_source().read_at(segment.offset, dest_slice).map_err(|_| Error::IoError)?;

                let tail_len = (segment.mem_size - segment.file_size) as usize;
                if tail_len > 0 {
                    let tail = dest.add(segment.file_size as usize);
                    ptr::write_bytes(tail, 0, tail_len);
                }
            }
        }

        let entry = (reader.header().entry as i64 + offs) as u64;

        let mut dynamic = None;
        if let Some(dyn_ph) = reader.program_headers().iter().find(|p| p.ty == SegmentType::Dynamic) {
            let dyn_start = dyn_ph.vaddr;
            let dyn_end = dyn_ph.vaddr + dyn_ph.mem_size;
            if dyn_start < addr_min || dyn_end > addr_max {
                log::error!("PT_DYNAMIC segment lies outside the PT_LOAD address range; continuing anyway");
            } else {
                dynamic = Some((dyn_ph.vaddr as i64 + offs) as u64 as *mut u8);
            }
        }

        Ok(Program {
            vaddr_requested: addr_min,
            vaddr_real: real_base,
            size,
            memory,
            cookie,
            entry,
            dynamic,
        })
    }

    /// Releases `program`'s backing allocation via `dealloc`. Optional
    /// convenience; the embedder may instead release the cookie directly.
    pub fn unload(program: &Program, dealloc: &mut dyn Deallocator) {
        if !program.is_empty() {
            dealloc.deallocate(program.cookie, program.size);
        }
    }
}
