//! Codebook persistence as `(nlist, dim / 8)` `uint8` `.npy` arrays.

use crate::error::{StorageError, StorageResult};
use bivf_core::{BitVectorSet, Codebook};
use ndarray::Array2;
use ndarray_npy::ReadNpyExt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Write a codebook as a 2-D `uint8` array, one row per centroid.
pub fn write_codebook_npy(path: &Path, codebook: &Codebook) -> StorageResult<()> {
    let arr = Array2::from_shape_vec(
        (codebook.len(), codebook.code_size()),
        codebook.centroids.clone(),
    )
    .map_err(|e| StorageError::Layout(e.to_string()))?;
    ndarray_npy::write_npy(path, &arr)?;
    tracing::info!(
        "Wrote {} centroids of {} bits to {}",
        codebook.len(),
        codebook.dim,
        path.display()
    );
    Ok(())
}

/// Read a codebook written by [`write_codebook_npy`].
pub fn read_codebook_npy(path: &Path) -> StorageResult<Codebook> {
    let reader = BufReader::new(File::open(path)?);
    let arr = Array2::<u8>::read_npy(reader)?;
    let (_, cols) = arr.dim();
    let data = if arr.is_standard_layout() {
        arr.into_raw_vec()
    } else {
        arr.iter().copied().collect()
    };
    let set = BitVectorSet::new(data, cols * 8)?;
    Ok(Codebook::from_set(set))
}
