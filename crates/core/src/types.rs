//! Core type definitions: packed binary vector sets and codebooks.

use crate::error::{ClusterError, ClusterResult};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// An ordered, read-only set of `n` packed binary vectors of `dim` bits.
///
/// Rows are stored contiguously, `dim / 8` bytes each. The bytes are either
/// borrowed (for example from a memory-mapped training file) or owned (for
/// subsets and clustering output). No mutation is exposed.
#[derive(Clone, PartialEq, Eq)]
pub struct BitVectorSet<'a> {
    data: Cow<'a, [u8]>,
    dim: usize,
    code_size: usize,
    len: usize,
}

impl<'a> BitVectorSet<'a> {
    /// Build a set from packed bytes.
    ///
    /// `dim` is the number of bits per vector and must be a positive multiple
    /// of 8; `data` must hold a whole number of rows.
    pub fn new(data: impl Into<Cow<'a, [u8]>>, dim: usize) -> ClusterResult<Self> {
        let data = data.into();
        if dim == 0 || dim % 8 != 0 {
            return Err(ClusterError::InvalidDimension(dim));
        }
        let code_size = dim / 8;
        if data.len() % code_size != 0 {
            return Err(ClusterError::InvalidData(format!(
                "{} bytes is not a multiple of the {}-byte code size",
                data.len(),
                code_size
            )));
        }
        let len = data.len() / code_size;
        Ok(Self {
            data,
            dim,
            code_size,
            len,
        })
    }

    /// Borrow packed bytes without copying.
    pub fn from_slice(data: &'a [u8], dim: usize) -> ClusterResult<Self> {
        Self::new(Cow::Borrowed(data), dim)
    }

    /// Number of vectors.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bits per vector.
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Bytes per vector.
    #[inline]
    pub fn code_size(&self) -> usize {
        self.code_size
    }

    /// Get row `i`.
    ///
    /// # Panics
    /// Panics if `i >= len()`.
    #[inline]
    pub fn get(&self, i: usize) -> &[u8] {
        let offset = i * self.code_size;
        &self.data[offset..offset + self.code_size]
    }

    /// Get row `i`, or `None` when out of range.
    pub fn try_get(&self, i: usize) -> Option<&[u8]> {
        (i < self.len).then(|| self.get(i))
    }

    /// Iterate over rows in order.
    pub fn iter(&self) -> std::slice::ChunksExact<'_, u8> {
        self.data.chunks_exact(self.code_size)
    }

    /// Parallel iterator over rows in order.
    pub fn par_iter(&self) -> rayon::slice::ChunksExact<'_, u8> {
        self.data.par_chunks_exact(self.code_size)
    }

    /// All rows as one contiguous byte slice.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Whether the rows are borrowed rather than owned.
    pub fn is_borrowed(&self) -> bool {
        matches!(self.data, Cow::Borrowed(_))
    }

    /// Copy the rows at `indices`, in that order. Duplicates are allowed.
    pub fn subset(&self, indices: &[usize]) -> ClusterResult<BitVectorSet<'static>> {
        let mut data = Vec::with_capacity(indices.len() * self.code_size);
        for &index in indices {
            if index >= self.len {
                return Err(ClusterError::IndexOutOfRange {
                    index,
                    len: self.len,
                });
            }
            data.extend_from_slice(self.get(index));
        }
        Ok(BitVectorSet {
            data: Cow::Owned(data),
            dim: self.dim,
            code_size: self.code_size,
            len: indices.len(),
        })
    }

    /// Copy the rows into an owned set.
    pub fn to_owned_set(&self) -> BitVectorSet<'static> {
        BitVectorSet {
            data: Cow::Owned(self.data.to_vec()),
            dim: self.dim,
            code_size: self.code_size,
            len: self.len,
        }
    }

    /// Convert into an owned set, copying only if the rows are borrowed.
    pub fn into_owned(self) -> BitVectorSet<'static> {
        BitVectorSet {
            data: Cow::Owned(self.data.into_owned()),
            dim: self.dim,
            code_size: self.code_size,
            len: self.len,
        }
    }

    /// Concatenate sets of the same dimension, preserving order.
    pub fn concat<'s, 'b: 's, I>(dim: usize, parts: I) -> ClusterResult<BitVectorSet<'static>>
    where
        I: IntoIterator<Item = &'s BitVectorSet<'b>>,
    {
        let mut data = Vec::new();
        for part in parts {
            if part.dim != dim {
                return Err(ClusterError::DimensionMismatch {
                    expected: dim,
                    got: part.dim,
                });
            }
            data.extend_from_slice(part.as_bytes());
        }
        BitVectorSet::new(data, dim)
    }
}

impl fmt::Debug for BitVectorSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitVectorSet")
            .field("len", &self.len)
            .field("dim", &self.dim)
            .field("borrowed", &self.is_borrowed())
            .finish()
    }
}

/// The final ordered set of binary centroids handed to a quantizer.
///
/// Centroid `i` is the representative of inverted-file bucket `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Codebook {
    /// Bits per centroid.
    pub dim: usize,
    /// Centroids stored as `[nlist][dim / 8]`.
    pub centroids: Vec<u8>,
}

impl Codebook {
    /// Wrap a centroid set.
    pub fn from_set(set: BitVectorSet<'_>) -> Self {
        let dim = set.dim();
        Self {
            dim,
            centroids: set.into_owned().data.into_owned(),
        }
    }

    /// Number of centroids (inverted-file buckets).
    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.centroids.len() / (self.dim / 8)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes per centroid.
    pub fn code_size(&self) -> usize {
        self.dim / 8
    }

    /// Get centroid `i`.
    #[inline]
    pub fn get(&self, i: usize) -> &[u8] {
        let cs = self.code_size();
        &self.centroids[i * cs..(i + 1) * cs]
    }

    /// Borrow the centroids as a vector set.
    pub fn as_set(&self) -> ClusterResult<BitVectorSet<'_>> {
        BitVectorSet::from_slice(&self.centroids, self.dim)
    }
}
