//! Random-access byte sources backing the parsers.
//!
//! A [`Source`] is a cheaply-cloneable view over a memory-mapped file or an
//! owned buffer. Sub-slices share the parent's backing storage, so handing a
//! fat slice or a shared-cache image to a parser never copies the bytes.
//! Every read is bounds-checked against the view; the map (or buffer) is
//! released when the last clone is dropped.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::{Error, Result};

/// Backing storage shared between a `Source` and all of its sub-slices.
#[derive(Debug)]
enum Backing {
    /// A read-only memory-mapped file.
    Mapped(Mmap),
    /// An owned in-memory buffer.
    Owned(Vec<u8>),
}

impl Backing {
    #[inline]
    fn bytes(&self) -> &[u8] {
        match self {
            Backing::Mapped(map) => map,
            Backing::Owned(buf) => buf,
        }
    }
}

/// A bounds-checked, random-access view of a byte stream.
#[derive(Debug, Clone)]
pub struct Source {
    backing: Arc<Backing>,
    start: usize,
    len: usize,
}

impl Source {
    /// Memory-maps a file read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::FileOpen {
            path: path.to_path_buf(),
            source: e,
        })?;

        let map = unsafe { Mmap::map(&file) }.map_err(|e| Error::MemoryMap {
            path: path.to_path_buf(),
            source: e,
        })?;

        let len = map.len();
        Ok(Self {
            backing: Arc::new(Backing::Mapped(map)),
            start: 0,
            len,
        })
    }

    /// Wraps an owned buffer.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            backing: Arc::new(Backing::Owned(data)),
            start: 0,
            len,
        }
    }

    /// Returns the size of this view in bytes.
    #[inline]
    pub fn len(&self) -> u64 {
        self.len as u64
    }

    /// Returns true if this view is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the entire view as a byte slice.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.backing.bytes()[self.start..self.start + self.len]
    }

    /// Reads `len` bytes at `offset` within this view.
    ///
    /// Reads that would cross the end of the view fail with an out-of-range
    /// error rather than truncating.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<&[u8]> {
        let end = offset
            .checked_add(len as u64)
            .ok_or_else(|| Error::out_of_range(offset, len as u64, self.len()))?;
        if end > self.len() {
            return Err(Error::out_of_range(offset, len as u64, self.len()));
        }
        let start = self.start + offset as usize;
        Ok(&self.backing.bytes()[start..start + len])
    }

    /// Creates a sub-view of `[offset, offset + len)`, sharing this view's
    /// backing storage.
    pub fn slice(&self, offset: u64, len: u64) -> Result<Source> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| Error::out_of_range(offset, len, self.len()))?;
        if end > self.len() {
            return Err(Error::out_of_range(offset, len, self.len()));
        }
        Ok(Source {
            backing: Arc::clone(&self.backing),
            start: self.start + offset as usize,
            len: len as usize,
        })
    }

    /// Creates a sub-view from `offset` to the end of this view.
    pub fn slice_from(&self, offset: u64) -> Result<Source> {
        if offset > self.len() {
            return Err(Error::out_of_range(offset, 0, self.len()));
        }
        self.slice(offset, self.len() - offset)
    }
}
