//! Raw container file access.
//!
//! A container is one large binary instrument-output file: raw acquisition
//! payload regions followed by a trailing metadata document. This module
//! provides positioned range reads over that file without ever loading it
//! whole; payloads routinely run into the gigabytes.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bytes::Bytes;

use crate::error::ContainerError;

// =============================================================================
// RawContainer
// =============================================================================

/// An open handle to a raw container file plus its total byte size.
///
/// The handle is guarded by a mutex so that lazily-resolved pixel sources can
/// share one container through an `Arc` and read with `&self`. The container
/// owns no decoded state; it is closed explicitly (or on drop) once all reads
/// are done.
#[derive(Debug)]
pub struct RawContainer {
    file: Mutex<File>,
    path: PathBuf,
    size: u64,
}

impl RawContainer {
    /// Open a container file and record its size.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ContainerError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| ContainerError::Open {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let size = file
            .metadata()
            .map_err(|e| ContainerError::Open {
                path: path.clone(),
                message: e.to_string(),
            })?
            .len();

        Ok(RawContainer {
            file: Mutex::new(file),
            path,
            size,
        })
    }

    /// Total size of the container in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Path the container was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns `RangeOutOfBounds` if the range does not lie entirely inside
    /// the file.
    pub fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, ContainerError> {
        if offset.saturating_add(len as u64) > self.size {
            return Err(ContainerError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.size,
            });
        }

        let mut buf = vec![0u8; len];
        let mut file = self
            .file
            .lock()
            .map_err(|_| ContainerError::Io("container lock poisoned".to_string()))?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;

        Ok(Bytes::from(buf))
    }

    /// Read up to `len` bytes starting at `offset`, clamped to the file end.
    ///
    /// Used by the recovery decode path, where a declared payload range may
    /// extend past a truncated file.
    pub fn read_at_most(&self, offset: u64, len: usize) -> Result<Bytes, ContainerError> {
        if offset >= self.size {
            return Ok(Bytes::new());
        }
        let available = (self.size - offset).min(len as u64) as usize;
        self.read_exact_at(offset, available)
    }

    /// Close the container, releasing the file handle.
    pub fn close(self) {
        drop(self);
    }
}

// =============================================================================
// Tests
// =============================================================================
