//! Read-only memory-mapped training sets.
//!
//! Two on-disk forms are supported:
//! - a 2-D `uint8` `.npy` array of shape `(n, dim / 8)` in C order
//! - a raw file of back-to-back packed codes with a known dimension

use crate::error::{StorageError, StorageResult};
use bivf_core::BitVectorSet;
use memmap2::Mmap;
use ndarray::ArrayView2;
use ndarray_npy::ViewNpyExt;
use std::fs::File;
use std::path::Path;

/// Packed binary vectors backed by a memory-mapped file.
pub struct MmapVectors {
    mmap: Mmap,
    /// Byte offset of the first code.
    offset: usize,
    len: usize,
    dim: usize,
}

impl MmapVectors {
    /// Map a `.npy` file holding a `(n, dim / 8)` `uint8` array.
    pub fn open_npy(path: &Path) -> StorageResult<Self> {
        let mmap = map_file(path)?;

        let (offset, len, dim) = {
            let view = ArrayView2::<u8>::view_npy(&mmap)?;
            if !view.is_standard_layout() {
                return Err(StorageError::Layout(format!(
                    "{} is not a C-contiguous array",
                    path.display()
                )));
            }
            let (rows, cols) = view.dim();
            let data = view
                .as_slice()
                .ok_or_else(|| StorageError::Layout("array data is not contiguous".into()))?;
            let offset = data.as_ptr() as usize - mmap.as_ptr() as usize;
            (offset, rows, cols * 8)
        };

        let vectors = Self {
            mmap,
            offset,
            len,
            dim,
        };
        vectors.vectors()?;
        tracing::debug!(
            "Mapped {} vectors of {} bits from {}",
            vectors.len,
            vectors.dim,
            path.display()
        );
        Ok(vectors)
    }

    /// Map a raw file of packed `dim`-bit codes with no header.
    pub fn open_raw(path: &Path, dim: usize) -> StorageResult<Self> {
        let mmap = map_file(path)?;
        let set = BitVectorSet::from_slice(&mmap, dim)?;
        let len = set.len();
        tracing::debug!(
            "Mapped {} raw vectors of {} bits from {}",
            len,
            dim,
            path.display()
        );
        Ok(Self {
            mmap,
            offset: 0,
            len,
            dim,
        })
    }

    /// Borrow the mapped codes without copying.
    pub fn vectors(&self) -> StorageResult<BitVectorSet<'_>> {
        let bytes = self.len * (self.dim / 8);
        let data = &self.mmap[self.offset..self.offset + bytes];
        Ok(BitVectorSet::from_slice(data, self.dim)?)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bits per vector.
    pub fn dim(&self) -> usize {
        self.dim
    }
}

fn map_file(path: &Path) -> StorageResult<Mmap> {
    let file = File::open(path)?;
    // Safety: the file is opened read-only and is not expected to be
    // truncated while mapped.
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(mmap)
}
