//! Voice packaging — a manifest that ties the data files of one voice
//! together and opens them as a ready [`SynthesisPipeline`].
//!
//! A voice directory looks like:
//!
//! ```text
//! voice/
//! ├── voice.json     manifest (this module)
//! ├── units.idx      name:offset:length index
//! ├── units.bin      concatenated audio blob
//! └── mapping.txt    span=unit mapping + reserved keys
//! ```
//!
//! Manifest problems are load errors, not synthesis errors: a voice
//! either opens completely or not at all.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::codec::StoreDecoder;
use crate::inventory::{UnitIndex, UnitInventory};
use crate::pipeline::SynthesisPipeline;
use crate::store::AudioBlobStore;

/// Manifest file name inside a voice directory.
pub const MANIFEST_FILE: &str = "voice.json";

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("voice manifest {path}: {source}")]
    ManifestIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("voice manifest {path} is malformed: {source}")]
    ManifestFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("voice asset {path}: {error:#}")]
    Asset { path: PathBuf, error: anyhow::Error },
}

/// `voice.json` contents. File fields are relative to the manifest's
/// directory.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceManifest {
    pub name: String,
    /// Sample rate of raw-PCM units in the blob.
    pub native_rate: u32,
    pub index_file: String,
    pub blob_file: String,
    pub mapping_file: String,
}

impl VoiceManifest {
    pub fn from_file(path: &Path) -> Result<Self, VoiceError> {
        let file = File::open(path).map_err(|source| VoiceError::ManifestIo {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| {
            VoiceError::ManifestFormat { path: path.to_path_buf(), source }
        })
    }
}

/// One opened voice: the manifest metadata plus its pipeline.
pub struct Voice {
    pub name: String,
    pipeline: SynthesisPipeline,
}

impl Voice {
    /// Open the voice rooted at `dir` (the directory holding
    /// `voice.json`). All data files load eagerly.
    pub fn open(dir: &Path) -> Result<Self, VoiceError> {
        let manifest = VoiceManifest::from_file(&dir.join(MANIFEST_FILE))?;
        Self::from_manifest(dir, manifest)
    }

    pub fn from_manifest(dir: &Path, manifest: VoiceManifest) -> Result<Self, VoiceError> {
        let asset = |rel: &str| dir.join(rel);

        let index_path = asset(&manifest.index_file);
        let index = UnitIndex::from_file(&index_path)
            .map_err(|error| VoiceError::Asset { path: index_path, error })?;

        let mapping_path = asset(&manifest.mapping_file);
        let inventory = UnitInventory::from_file(&mapping_path)
            .map_err(|error| VoiceError::Asset { path: mapping_path, error })?;

        let blob_path = asset(&manifest.blob_file);
        let store = AudioBlobStore::open(&blob_path, index)
            .map_err(|error| VoiceError::Asset { path: blob_path, error })?;

        info!(
            name = %manifest.name,
            units = store.index().len(),
            spans = inventory.len(),
            "voice opened"
        );

        let decoder = Box::new(StoreDecoder::new(manifest.native_rate));
        let pipeline = SynthesisPipeline::new(inventory, store, decoder);
        Ok(Self { name: manifest.name, pipeline })
    }

    pub fn pipeline(&self) -> &SynthesisPipeline {
        &self.pipeline
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
