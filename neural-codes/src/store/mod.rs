//! Append-only neural code store.
//!
//! The data file is a bare concatenation of chunks, no header, no
//! separators. Each chunk is a D x N code matrix written column by column
//! as little-endian f32, so every neural code occupies `D` contiguous values
//! and chunk boundaries leave no trace: a file written in K chunks is byte
//! for byte the file written in one. Readers need `D` from elsewhere, which
//! is what the JSON manifest sidecar is for.

pub mod manifest;

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use ndarray::{Array2, ArrayView2};
use tracing::debug;

use crate::errors::{NcError, Result};

pub use manifest::{StoreLayout, StoreManifest};

/// Writer over a raw neural code file.
#[derive(Debug)]
pub struct NeuralCodeStore {
    path: PathBuf,
    writer: BufWriter<File>,
    dim: Option<usize>,
    columns: usize,
    chunks: usize,
}

impl NeuralCodeStore {
    /// Create (or truncate) the store at `path`.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::with_file(path, file))
    }

    /// Open `path` for appending codes of length `dim`, creating it if
    /// needed.
    ///
    /// The raw file carries no header, so `dim` must come from the caller
    /// (usually the manifest). An existing file whose length is not a whole
    /// number of `dim`-value codes is a `Store` error.
    pub fn open_append(path: &Path, dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(NcError::invalid("code length must be positive"));
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        let code_bytes = (dim * std::mem::size_of::<f32>()) as u64;
        if len % code_bytes != 0 {
            return Err(NcError::Store(format!(
                "{} holds {} bytes, not a whole number of {}-value codes",
                path.display(),
                len,
                dim
            )));
        }
        let mut store = Self::with_file(path, file);
        store.dim = Some(dim);
        Ok(store)
    }

    fn with_file(path: &Path, file: File) -> Self {
        Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            dim: None,
            columns: 0,
            chunks: 0,
        }
    }

    /// Store location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Code length fixed by the first appended chunk.
    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    /// Codes appended through this handle.
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Chunks appended through this handle.
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// Append one D x N chunk and flush it to the file.
    ///
    /// All chunks appended through one handle must share `D`.
    pub fn append(&mut self, codes: ArrayView2<'_, f32>) -> Result<()> {
        let (dim, n) = codes.dim();
        match self.dim {
            Some(d) if d != dim => {
                return Err(NcError::invalid(format!(
                    "chunk has code length {}, store holds {}",
                    dim, d
                )));
            }
            _ => self.dim = Some(dim),
        }

        for code in codes.columns() {
            for &v in code.iter() {
                self.writer.write_f32::<LittleEndian>(v)?;
            }
        }
        self.writer.flush()?;

        self.columns += n;
        self.chunks += 1;
        debug!(
            "Appended chunk {} ({} codes) to {}",
            self.chunks,
            n,
            self.path.display()
        );
        Ok(())
    }
}

/// Read a whole store back as a D x N matrix.
pub fn read_codes(path: &Path, dim: usize) -> Result<Array2<f32>> {
    if dim == 0 {
        return Err(NcError::invalid("code length must be positive"));
    }
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;

    let code_bytes = dim * std::mem::size_of::<f32>();
    if bytes.len() % code_bytes != 0 {
        return Err(NcError::Store(format!(
            "{} holds {} bytes, not a whole number of {}-value codes",
            path.display(),
            bytes.len(),
            dim
        )));
    }

    let mut values = vec![0f32; bytes.len() / 4];
    LittleEndian::read_f32_into(&bytes, &mut values);
    let n = values.len() / dim;

    // N x D in file order, each row one code.
    let by_code = Array2::from_shape_vec((n, dim), values)?;
    Ok(by_code.reversed_axes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_patch_major_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codes.bin");
        let codes = array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]];

        let mut store = NeuralCodeStore::create(&path).unwrap();
        store.append(codes.view()).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let mut values = vec![0f32; bytes.len() / 4];
        LittleEndian::read_f32_into(&bytes, &mut values);
        // Column by column: code 0 = (1, 4), code 1 = (2, 5), code 2 = (3, 6).
        assert_eq!(values, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);

        assert_eq!(read_codes(&path, 2).unwrap(), codes);
    }

    #[test]
    fn test_chunks_concatenate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codes.bin");
        let a = array![[1.0f32], [2.0]];
        let b = array![[3.0f32, 5.0], [4.0, 6.0]];

        let mut store = NeuralCodeStore::create(&path).unwrap();
        store.append(a.view()).unwrap();
        store.append(b.view()).unwrap();
        assert_eq!((store.chunks(), store.columns()), (2, 3));

        let all = read_codes(&path, 2).unwrap();
        assert_eq!(all, array![[1.0f32, 3.0, 5.0], [2.0, 4.0, 6.0]]);
    }

    #[test]
    fn test_open_append_keeps_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codes.bin");
        NeuralCodeStore::create(&path).unwrap().append(array![[1.0f32]].view()).unwrap();
        NeuralCodeStore::open_append(&path, 1).unwrap().append(array![[2.0f32]].view()).unwrap();
        assert_eq!(read_codes(&path, 1).unwrap(), array![[1.0f32, 2.0]]);
    }

    #[test]
    fn test_open_append_enforces_existing_dim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codes.bin");
        NeuralCodeStore::create(&path).unwrap().append(array![[1.0f32], [2.0]].view()).unwrap();

        let mut store = NeuralCodeStore::open_append(&path, 2).unwrap();
        assert_eq!(store.dim(), Some(2));
        let err = store.append(array![[1.0f32], [2.0], [3.0]].view());
        assert!(matches!(err, Err(NcError::InvalidArgument(_))));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 8);

        // 8 bytes cannot hold whole 3-value codes.
        assert!(matches!(NeuralCodeStore::open_append(&path, 3), Err(NcError::Store(_))));
        assert!(matches!(NeuralCodeStore::open_append(&path, 0), Err(NcError::InvalidArgument(_))));
    }

    #[test]
    fn test_dim_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = NeuralCodeStore::create(&dir.path().join("codes.bin")).unwrap();
        store.append(array![[1.0f32], [2.0]].view()).unwrap();
        let err = store.append(array![[1.0f32], [2.0], [3.0]].view());
        assert!(matches!(err, Err(NcError::InvalidArgument(_))));
    }

    #[test]
    fn test_truncated_store_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codes.bin");
        std::fs::write(&path, [0u8; 12]).unwrap();
        assert!(matches!(read_codes(&path, 2), Err(NcError::Store(_))));
        assert_eq!(read_codes(&path, 3).unwrap().dim(), (3, 1));
    }
}
