//! Random-access reader over the unit blob file.
//!
//! The blob is one append-only binary file; units are addressed purely
//! by the byte ranges in the [`UnitIndex`]. Seek+read is not atomic,
//! so the file handle lives behind a mutex held only for the duration
//! of one seek+read pair — never across decode or time-scale work.
//!
//! A fetch that cannot be satisfied (unknown name, short read, I/O
//! error) is a *miss*, not an error: the caller skips that unit and
//! the utterance continues.

use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
    sync::Mutex,
};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::inventory::UnitIndex;

/// Locked random-access store over one blob file.
pub struct AudioBlobStore {
    file: Mutex<File>,
    index: UnitIndex,
}

impl AudioBlobStore {
    /// Open the blob and validate the index against its length.
    /// Entries whose byte range falls outside the blob are dropped
    /// here, so `fetch` never reads past end of file.
    pub fn open(blob_path: &Path, mut index: UnitIndex) -> Result<Self> {
        let file = File::open(blob_path)
            .with_context(|| format!("cannot open unit blob: {}", blob_path.display()))?;
        let blob_len = file
            .metadata()
            .with_context(|| format!("cannot stat unit blob: {}", blob_path.display()))?
            .len();
        let dropped = index.retain_in_bounds(blob_len);
        if dropped > 0 {
            warn!(dropped, blob_len, "dropped index entries outside the blob");
        }
        Ok(Self { file: Mutex::new(file), index })
    }

    /// Raw encoded bytes for `name`, or `None` on any miss.
    pub fn fetch(&self, name: &str) -> Option<Vec<u8>> {
        let entry = match self.index.get(name) {
            Some(e) => e,
            None => {
                debug!(name, "unit not in index");
                return None;
            }
        };
        let mut buf = vec![0u8; entry.length as usize];
        {
            let mut file = match self.file.lock() {
                Ok(f) => f,
                Err(_) => {
                    warn!(name, "blob file lock poisoned");
                    return None;
                }
            };
            if let Err(e) = file
                .seek(SeekFrom::Start(entry.offset))
                .and_then(|_| file.read_exact(&mut buf))
            {
                warn!(name, error = %e, "unit read failed");
                return None;
            }
        }
        Some(buf)
    }

    pub fn index(&self) -> &UnitIndex {
        &self.index
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
