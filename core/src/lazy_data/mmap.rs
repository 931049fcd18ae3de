use std::{
    fs::File,
    path::{Path, PathBuf},
};

use memmap2::{MmapMut, MmapOptions};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, instrument};

use crate::error::{Error, Result};

/// A private, copy-on-write mapping of a data file.
///
/// Writes land in memory only and are never flushed back to the file, they are
/// dropped together with the mapping.
pub struct MappedFile {
    path: PathBuf,
    map: RwLock<MmapMut>,
}

impl MappedFile {
    #[instrument]
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(Error::io(path))?;
        let len = file.metadata().map_err(Error::io(path))?.len();
        if len == 0 {
            return Err(Error::CorruptData {
                path: path.to_path_buf(),
                reason: "file is empty".into(),
            });
        }

        // SAFETY: the mapping is private, so our own writes never reach the file.
        // Concurrent truncation of the file by another process is not guarded against.
        let map = unsafe { MmapOptions::new().map_copy(&file) }.map_err(Error::io(path))?;
        debug!(path = ?path, len, "Mapped data file");

        Ok(Self {
            path: path.to_path_buf(),
            map: RwLock::new(map),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read(&self) -> RwLockReadGuard<'_, MmapMut> {
        self.map.read_recursive()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, MmapMut> {
        self.map.write()
    }

    /// Fails with [`Error::CorruptData`] unless `len` bytes are available at `offset`.
    pub fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        let available = self.len();
        match offset.checked_add(len) {
            Some(end) if end <= available => Ok(()),
            _ => Err(Error::CorruptData {
                path: self.path.clone(),
                reason: format!(
                    "expected {len} bytes at offset {offset}, file has {available} bytes"
                ),
            }),
        }
    }
}

impl std::fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedFile")
            .field("path", &self.path)
            .field("len", &self.len())
            .finish()
    }
}
