//! The downstream audio consumer contract, plus two reference sinks.
//!
//! The pipeline stops writing the moment a sink reports [`SinkStatus::Fail`]
//! on any call, and always finishes a request with exactly one of
//! `done()` / `error()`. A sink that blocks in `audio_available` is the
//! backpressure mechanism: downstream slowness throttles the whole
//! pipeline.

use std::path::{Path, PathBuf};

use tracing::warn;

/// Result of a sink call. `Fail` aborts the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    Ok,
    Fail,
}

/// Consumer of finished PCM audio (playback device, file, buffer).
pub trait AudioSink {
    /// Announce the stream format before any audio.
    fn start(&mut self, sample_rate: u32, bit_depth: u16, channels: u16) -> SinkStatus;
    /// One chunk of 16-bit little-endian PCM bytes.
    fn audio_available(&mut self, bytes: &[u8]) -> SinkStatus;
    /// Stream ended normally (including after cancellation).
    fn done(&mut self);
    /// Stream ended because the request failed.
    fn error(&mut self);
}

// ─────────────────────────────────────────────────────────────────────────────
// MemorySink
// ─────────────────────────────────────────────────────────────────────────────

/// Collects the rendered stream in memory. Useful for offline
/// rendering and the primary sink in tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub bytes: Vec<u8>,
    pub format: Option<(u32, u16, u16)>,
    pub done_calls: u32,
    pub error_calls: u32,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The collected stream as 16-bit samples.
    pub fn samples(&self) -> Vec<i16> {
        self.bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }
}

impl AudioSink for MemorySink {
    fn start(&mut self, sample_rate: u32, bit_depth: u16, channels: u16) -> SinkStatus {
        self.format = Some((sample_rate, bit_depth, channels));
        SinkStatus::Ok
    }

    fn audio_available(&mut self, bytes: &[u8]) -> SinkStatus {
        self.bytes.extend_from_slice(bytes);
        SinkStatus::Ok
    }

    fn done(&mut self) {
        self.done_calls += 1;
    }

    fn error(&mut self) {
        self.error_calls += 1;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WavFileSink
// ─────────────────────────────────────────────────────────────────────────────

/// Streams the request into a 16-bit PCM WAV file.
///
/// 16-bit integer PCM rather than float WAV: every consumer decodes it,
/// and it matches the byte stream the pipeline already produces.
pub struct WavFileSink {
    path: PathBuf,
    writer: Option<hound::WavWriter<std::io::BufWriter<std::fs::File>>>,
}

impl WavFileSink {
    pub fn new(path: &Path) -> Self {
        Self { path: path.to_path_buf(), writer: None }
    }
}

impl AudioSink for WavFileSink {
    fn start(&mut self, sample_rate: u32, bit_depth: u16, channels: u16) -> SinkStatus {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: bit_depth,
            sample_format: hound::SampleFormat::Int,
        };
        match hound::WavWriter::create(&self.path, spec) {
            Ok(w) => {
                self.writer = Some(w);
                SinkStatus::Ok
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot create WAV sink");
                SinkStatus::Fail
            }
        }
    }

    fn audio_available(&mut self, bytes: &[u8]) -> SinkStatus {
        let Some(writer) = self.writer.as_mut() else {
            return SinkStatus::Fail;
        };
        for sample in bytes.chunks_exact(2) {
            if let Err(e) = writer.write_sample(i16::from_le_bytes([sample[0], sample[1]])) {
                warn!(error = %e, "WAV write failed");
                return SinkStatus::Fail;
            }
        }
        SinkStatus::Ok
    }

    fn done(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!(error = %e, "WAV finalise failed");
            }
        }
    }

    fn error(&mut self) {
        // dropping the writer finalises the header, so a failed
        // request still leaves a readable (truncated) file
        self.writer = None;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
