//! The synthesis pipeline — text in, PCM stream out.
//!
//! `synthesize` walks the token sequence from [`crate::segment`] and feeds
//! the sink through one [`TimeScaleStream`] session:
//!
//! 1. `sink.start(rate, bits, channels)` — a refusal fails the request
//!    before any engine state exists;
//! 2. blank input short-circuits to a fixed leading silence;
//! 3. per token: pauses become timed silence, units go
//!    fetch → decode → resample → 4096-sample sub-chunks, with a
//!    cancellation check before each sub-chunk; any fetch or decode
//!    miss skips that token and the utterance continues;
//! 4. flush (skipped once the sink has refused a chunk), release the
//!    engine, then exactly one of `done()` / `error()`.
//!
//! One pipeline instance runs one request at a time; overlapping calls
//! serialize behind an internal lock.

use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::codec::UnitDecoder;
use crate::inventory::{EngineDefaults, UnitInventory};
use crate::resample::resample;
use crate::segment::{segment_with_limit, PauseKind, PlayableToken, MAX_UNIT_LEN};
use crate::session::StreamSession;
use crate::sink::{AudioSink, SinkStatus};
use crate::store::AudioBlobStore;
use crate::timescale::{
    DrainOutcome, LinearStretcher, StretchEngine, TimeScaleStream, DEFAULT_CHUNK,
};

/// Canonical output sample rate.
pub const OUTPUT_SAMPLE_RATE: u32 = 22_050;
/// Output bit depth.
pub const OUTPUT_BIT_DEPTH: u16 = 16;
/// Output channel count (mono).
pub const OUTPUT_CHANNELS: u16 = 1;

/// Silence emitted for blank input, in milliseconds.
const LEADING_SILENCE_MS: u32 = 100;

/// Pause durations per token kind, in milliseconds. The values are
/// tuning constants with no derivation; override per pipeline if a
/// voice wants different timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseTable {
    pub newline_ms: u32,
    pub sentence_ms: u32,
    pub clause_ms: u32,
    pub space_ms: u32,
}

impl Default for PauseTable {
    fn default() -> Self {
        Self { newline_ms: 300, sentence_ms: 500, clause_ms: 200, space_ms: 150 }
    }
}

impl PauseTable {
    pub fn duration_ms(&self, kind: PauseKind) -> u32 {
        match kind {
            PauseKind::Newline => self.newline_ms,
            PauseKind::Sentence => self.sentence_ms,
            PauseKind::Clause => self.clause_ms,
            PauseKind::Space => self.space_ms,
        }
    }
}

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisStatus {
    Completed,
    Cancelled,
    Failed(String),
}

type EngineFactory = Box<dyn Fn(u32, u16) -> Box<dyn StretchEngine> + Send + Sync>;

/// The assembled pipeline for one voice.
pub struct SynthesisPipeline {
    inventory: UnitInventory,
    store: AudioBlobStore,
    decoder: Box<dyn UnitDecoder + Send + Sync>,
    engine_factory: EngineFactory,
    pause_table: PauseTable,
    max_unit_len: usize,
    // one active request per pipeline instance
    active: Mutex<()>,
}

impl SynthesisPipeline {
    pub fn new(
        inventory: UnitInventory,
        store: AudioBlobStore,
        decoder: Box<dyn UnitDecoder + Send + Sync>,
    ) -> Self {
        Self {
            inventory,
            store,
            decoder,
            engine_factory: Box::new(|rate, channels| {
                Box::new(LinearStretcher::new(rate, channels))
            }),
            pause_table: PauseTable::default(),
            max_unit_len: MAX_UNIT_LEN,
            active: Mutex::new(()),
        }
    }

    /// Swap in a different time-stretch engine binding.
    pub fn with_engine_factory(mut self, factory: EngineFactory) -> Self {
        self.engine_factory = factory;
        self
    }

    pub fn with_pause_table(mut self, table: PauseTable) -> Self {
        self.pause_table = table;
        self
    }

    pub fn with_max_unit_len(mut self, max_unit_len: usize) -> Self {
        self.max_unit_len = max_unit_len;
        self
    }

    /// The voice's default engine parameters (mapping reserved keys).
    pub fn defaults(&self) -> EngineDefaults {
        self.inventory.defaults()
    }

    /// Build a session for a request, folding the voice defaults into
    /// the requested multipliers before clamping.
    pub fn new_session(&self, speed: f32, pitch: f32) -> StreamSession {
        let d = self.inventory.defaults();
        StreamSession::new(speed * d.speed, pitch * d.pitch)
    }

    /// Synthesize `text` into `sink`. Blocks until the request
    /// completes, fails, or is cancelled via the session's handle.
    pub fn synthesize(
        &self,
        text: &str,
        session: &StreamSession,
        sink: &mut dyn AudioSink,
    ) -> SynthesisStatus {
        // serialize overlapping requests; a poisoned lock just means a
        // previous request panicked, the guard itself is still valid
        let _active = match self.active.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        if sink.start(OUTPUT_SAMPLE_RATE, OUTPUT_BIT_DEPTH, OUTPUT_CHANNELS) == SinkStatus::Fail {
            warn!("sink rejected stream start");
            sink.error();
            return SynthesisStatus::Failed("sink rejected stream start".into());
        }

        if text.trim().is_empty() {
            return self.finish_blank(sink);
        }

        let tokens = segment_with_limit(text, &self.inventory, self.max_unit_len);
        debug!(tokens = tokens.len(), "segmented request");

        let engine = (self.engine_factory)(OUTPUT_SAMPLE_RATE, OUTPUT_CHANNELS);
        let mut stream = TimeScaleStream::open(engine, OUTPUT_SAMPLE_RATE, OUTPUT_CHANNELS);
        stream.set_rate(self.inventory.defaults().rate);
        stream.configure(session.speed(), session.pitch());

        let mut failure: Option<String> = None;
        for token in &tokens {
            if session.is_cancelled() {
                break;
            }
            let outcome = match token {
                PlayableToken::Pause(kind) => stream.write_silence(
                    self.pause_table.duration_ms(*kind),
                    sink,
                    session,
                ),
                PlayableToken::Unit(name) => self.play_unit(name, &mut stream, sink, session),
                PlayableToken::Literal(c) => {
                    // no unit for this character; order is preserved,
                    // nothing plays
                    debug!(char = %c, "skipping literal with no unit");
                    DrainOutcome::Ok
                }
            };
            match outcome {
                DrainOutcome::Ok => {}
                DrainOutcome::Cancelled => break,
                DrainOutcome::SinkFailed => {
                    failure = Some("sink rejected audio".into());
                    break;
                }
            }
        }

        // flush unless the sink already refused a chunk: once it has
        // reported failure it must see no further writes. flush itself
        // no-ops when cancelled. The engine is released either way.
        if failure.is_none()
            && stream.flush(sink, session) == DrainOutcome::SinkFailed
        {
            failure = Some("sink rejected audio during flush".into());
        }
        drop(stream);

        info!(
            samples_in = session.samples_in(),
            samples_out = session.samples_out(),
            "synthesis finished"
        );

        if let Some(reason) = failure {
            sink.error();
            return SynthesisStatus::Failed(reason);
        }
        sink.done();
        if session.is_cancelled() {
            SynthesisStatus::Cancelled
        } else {
            SynthesisStatus::Completed
        }
    }

    /// Degenerate path: blank input produces a fixed short silence so
    /// the host still observes a well-formed stream.
    fn finish_blank(&self, sink: &mut dyn AudioSink) -> SynthesisStatus {
        let samples = (OUTPUT_SAMPLE_RATE as u64 * LEADING_SILENCE_MS as u64 / 1000) as usize;
        let bytes = vec![0u8; samples * 2];
        if sink.audio_available(&bytes) == SinkStatus::Fail {
            sink.error();
            return SynthesisStatus::Failed("sink rejected leading silence".into());
        }
        sink.done();
        SynthesisStatus::Completed
    }

    fn play_unit(
        &self,
        name: &str,
        stream: &mut TimeScaleStream<Box<dyn StretchEngine>>,
        sink: &mut dyn AudioSink,
        session: &StreamSession,
    ) -> DrainOutcome {
        let Some(bytes) = self.store.fetch(name) else {
            debug!(name, "unit fetch miss, skipping");
            return DrainOutcome::Ok;
        };
        let Some(pcm) = self.decoder.decode(&bytes) else {
            warn!(name, len = bytes.len(), "unit decode failed, skipping");
            return DrainOutcome::Ok;
        };
        let samples = if pcm.sample_rate == OUTPUT_SAMPLE_RATE {
            pcm.samples
        } else {
            resample(&pcm.samples, pcm.sample_rate, OUTPUT_SAMPLE_RATE)
        };

        for chunk in samples.chunks(DEFAULT_CHUNK) {
            if session.is_cancelled() {
                return DrainOutcome::Cancelled;
            }
            match stream.write(chunk, sink, session) {
                DrainOutcome::Ok => {}
                other => return other,
            }
        }
        DrainOutcome::Ok
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::StoreDecoder;
    use crate::inventory::UnitIndex;
    use crate::sink::MemorySink;
    use std::collections::HashMap;
    use std::io::{Cursor, Write};

    /// Build a pipeline over a temp blob of raw-PCM units.
    /// `units` maps span → samples; the mapping is the identity
    /// (span name == unit name).
    fn pipeline_with(units: &[(&str, &[i16])]) -> (SynthesisPipeline, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let blob_path = dir.path().join("units.bin");

        let mut blob = Vec::new();
        let mut index_src = String::new();
        for (name, samples) in units {
            let offset = blob.len();
            for &s in *samples {
                blob.extend_from_slice(&s.to_le_bytes());
            }
            index_src.push_str(&format!("{}:{}:{}\n", name, offset, samples.len() * 2));
        }
        std::fs::File::create(&blob_path).unwrap().write_all(&blob).unwrap();

        let index = UnitIndex::parse(Cursor::new(index_src)).unwrap();
        let store = AudioBlobStore::open(&blob_path, index).unwrap();
        let map: HashMap<String, String> =
            units.iter().map(|(n, _)| (n.to_string(), n.to_string())).collect();
        let inventory = UnitInventory::from_map(map);
        let decoder = Box::new(StoreDecoder::new(OUTPUT_SAMPLE_RATE));
        (SynthesisPipeline::new(inventory, store, decoder), dir)
    }

    fn silence_samples(ms: u32) -> usize {
        (OUTPUT_SAMPLE_RATE as u64 * ms as u64 / 1000) as usize
    }

    #[test]
    fn test_end_to_end_longest_match() {
        let (pipeline, _dir) =
            pipeline_with(&[("a", &[10, 20]), ("ab", &[1, 2, 3])]);
        let session = pipeline.new_session(1.0, 1.0);
        let mut sink = MemorySink::new();

        let status = pipeline.synthesize("ab c", &session, &mut sink);
        assert_eq!(status, SynthesisStatus::Completed);
        assert_eq!(sink.format, Some((OUTPUT_SAMPLE_RATE, 16, 1)));
        assert_eq!(sink.done_calls, 1);
        assert_eq!(sink.error_calls, 0);

        // Unit "ab" (3 samples, longest match), one space pause,
        // literal 'c' contributes nothing.
        let samples = sink.samples();
        assert_eq!(samples.len(), 3 + silence_samples(150));
        assert_eq!(&samples[..3], &[1, 2, 3]);
        assert!(samples[3..].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_blank_input_leading_silence() {
        let (pipeline, _dir) = pipeline_with(&[("a", &[1])]);
        let session = pipeline.new_session(1.0, 1.0);
        let mut sink = MemorySink::new();

        let status = pipeline.synthesize("   ", &session, &mut sink);
        assert_eq!(status, SynthesisStatus::Completed);
        assert_eq!(sink.samples().len(), silence_samples(100));
        assert_eq!(sink.done_calls, 1);
    }

    #[test]
    fn test_pause_duration_table() {
        let (pipeline, _dir) = pipeline_with(&[("x", &[1])]);
        let session = pipeline.new_session(1.0, 1.0);
        let mut sink = MemorySink::new();

        // x . x → unit, sentence pause, unit
        let status = pipeline.synthesize("x.x", &session, &mut sink);
        assert_eq!(status, SynthesisStatus::Completed);
        assert_eq!(sink.samples().len(), 2 + silence_samples(500));
    }

    #[test]
    fn test_miss_skips_and_continues() {
        let (pipeline, _dir) = pipeline_with(&[("a", &[5, 6])]);
        // "z" segments to a literal (not in inventory); only "a" plays
        let session = pipeline.new_session(1.0, 1.0);
        let mut sink = MemorySink::new();
        let status = pipeline.synthesize("za", &session, &mut sink);
        assert_eq!(status, SynthesisStatus::Completed);
        assert_eq!(sink.samples(), vec![5, 6]);
    }

    #[test]
    fn test_index_miss_with_mapped_span() {
        // Span is in the mapping but its unit is absent from the index:
        // zero audio for the token, request still completes.
        let dir = tempfile::tempdir().unwrap();
        let blob_path = dir.path().join("units.bin");
        std::fs::File::create(&blob_path).unwrap().write_all(&1i16.to_le_bytes()).unwrap();
        let store = AudioBlobStore::open(
            &blob_path,
            UnitIndex::parse(Cursor::new("")).unwrap(),
        )
        .unwrap();
        let inventory = UnitInventory::from_map(
            [("k".to_string(), "unit_k".to_string())].into_iter().collect(),
        );
        let pipeline = SynthesisPipeline::new(
            inventory,
            store,
            Box::new(StoreDecoder::new(OUTPUT_SAMPLE_RATE)),
        );

        let session = pipeline.new_session(1.0, 1.0);
        let mut sink = MemorySink::new();
        assert_eq!(pipeline.synthesize("k", &session, &mut sink), SynthesisStatus::Completed);
        assert!(sink.bytes.is_empty());
        assert_eq!(sink.done_calls, 1);
    }

    #[test]
    fn test_unit_resampled_to_output_rate() {
        // Unit stored at half the output rate: raw fallback decodes at
        // the decoder's native rate, then upsamples 2×.
        let dir = tempfile::tempdir().unwrap();
        let blob_path = dir.path().join("units.bin");
        let samples: Vec<i16> = vec![0, 100, 200, 300];
        let mut blob = Vec::new();
        for &s in &samples {
            blob.extend_from_slice(&s.to_le_bytes());
        }
        std::fs::File::create(&blob_path).unwrap().write_all(&blob).unwrap();
        let store = AudioBlobStore::open(
            &blob_path,
            UnitIndex::parse(Cursor::new("u:0:8\n")).unwrap(),
        )
        .unwrap();
        let inventory =
            UnitInventory::from_map([("u".to_string(), "u".to_string())].into_iter().collect());
        let pipeline = SynthesisPipeline::new(
            inventory,
            store,
            Box::new(StoreDecoder::new(OUTPUT_SAMPLE_RATE / 2)),
        );

        let session = pipeline.new_session(1.0, 1.0);
        let mut sink = MemorySink::new();
        assert_eq!(pipeline.synthesize("u", &session, &mut sink), SynthesisStatus::Completed);
        assert_eq!(sink.samples().len(), 8);
        // interpolated midpoints between the original samples
        assert_eq!(&sink.samples()[..4], &[0, 50, 100, 150]);
    }

    #[test]
    fn test_sink_start_failure() {
        struct RefusingSink(MemorySink);
        impl AudioSink for RefusingSink {
            fn start(&mut self, _: u32, _: u16, _: u16) -> SinkStatus {
                SinkStatus::Fail
            }
            fn audio_available(&mut self, b: &[u8]) -> SinkStatus {
                self.0.audio_available(b)
            }
            fn done(&mut self) {
                self.0.done()
            }
            fn error(&mut self) {
                self.0.error()
            }
        }

        let (pipeline, _dir) = pipeline_with(&[("a", &[1])]);
        let session = pipeline.new_session(1.0, 1.0);
        let mut sink = RefusingSink(MemorySink::new());
        let status = pipeline.synthesize("a", &session, &mut sink);
        assert!(matches!(status, SynthesisStatus::Failed(_)));
        assert!(sink.0.bytes.is_empty());
        assert_eq!(sink.0.error_calls, 1);
        assert_eq!(sink.0.done_calls, 0);
    }

    #[test]
    fn test_sink_failure_mid_stream() {
        /// Accepts the first chunk, then refuses.
        struct FlakySink {
            inner: MemorySink,
            accepted: u32,
        }
        impl AudioSink for FlakySink {
            fn start(&mut self, r: u32, b: u16, c: u16) -> SinkStatus {
                self.inner.start(r, b, c)
            }
            fn audio_available(&mut self, bytes: &[u8]) -> SinkStatus {
                if self.accepted == 0 {
                    self.accepted += 1;
                    self.inner.audio_available(bytes)
                } else {
                    SinkStatus::Fail
                }
            }
            fn done(&mut self) {
                self.inner.done()
            }
            fn error(&mut self) {
                self.inner.error()
            }
        }

        let (pipeline, _dir) = pipeline_with(&[("a", &[1]), ("b", &[2])]);
        let session = pipeline.new_session(1.0, 1.0);
        let mut sink = FlakySink { inner: MemorySink::new(), accepted: 0 };
        let status = pipeline.synthesize("ab", &session, &mut sink);
        assert!(matches!(status, SynthesisStatus::Failed(_)));
        assert_eq!(sink.inner.error_calls, 1);
        assert_eq!(sink.inner.done_calls, 0);
    }

    #[test]
    fn test_no_writes_after_sink_failure() {
        /// Releases at most two samples per read, so output is still
        /// queued inside the engine when the sink refuses a chunk.
        struct TrickleEngine {
            queue: Vec<i16>,
        }
        impl StretchEngine for TrickleEngine {
            fn set_speed(&mut self, _: f32) {}
            fn set_pitch(&mut self, _: f32) {}
            fn set_rate(&mut self, _: f32) {}
            fn put_samples(&mut self, samples: &[i16]) {
                self.queue.extend_from_slice(samples);
            }
            fn samples_available(&self) -> usize {
                self.queue.len()
            }
            fn receive_samples(&mut self, out: &mut [i16]) -> usize {
                let n = out.len().min(self.queue.len()).min(2);
                out[..n].copy_from_slice(&self.queue[..n]);
                self.queue.drain(..n);
                n
            }
            fn flush(&mut self) {}
        }

        struct RefusingCountingSink {
            inner: MemorySink,
            audio_calls: u32,
        }
        impl AudioSink for RefusingCountingSink {
            fn start(&mut self, r: u32, b: u16, c: u16) -> SinkStatus {
                self.inner.start(r, b, c)
            }
            fn audio_available(&mut self, _: &[u8]) -> SinkStatus {
                self.audio_calls += 1;
                SinkStatus::Fail
            }
            fn done(&mut self) {
                self.inner.done()
            }
            fn error(&mut self) {
                self.inner.error()
            }
        }

        let (pipeline, _dir) = pipeline_with(&[("a", &[7; 10])]);
        let pipeline = pipeline.with_engine_factory(Box::new(|_, _| {
            Box::new(TrickleEngine { queue: Vec::new() })
        }));
        let session = pipeline.new_session(1.0, 1.0);
        let mut sink = RefusingCountingSink { inner: MemorySink::new(), audio_calls: 0 };

        let status = pipeline.synthesize("a", &session, &mut sink);
        assert!(matches!(status, SynthesisStatus::Failed(_)));
        // the refused chunk is the last the sink ever sees: the queued
        // engine output is dropped, not flushed
        assert_eq!(sink.audio_calls, 1);
        assert_eq!(sink.inner.error_calls, 1);
        assert_eq!(sink.inner.done_calls, 0);
    }

    #[test]
    fn test_cancellation_stops_stream() {
        /// Cancels the session on the first delivered chunk; counts
        /// calls after the flag was set.
        struct CancellingSink {
            inner: MemorySink,
            handle: crate::session::CancelHandle,
            calls_after_cancel: u32,
        }
        impl AudioSink for CancellingSink {
            fn start(&mut self, r: u32, b: u16, c: u16) -> SinkStatus {
                self.inner.start(r, b, c)
            }
            fn audio_available(&mut self, bytes: &[u8]) -> SinkStatus {
                if self.handle.is_cancelled() {
                    self.calls_after_cancel += 1;
                } else {
                    self.handle.cancel();
                }
                self.inner.audio_available(bytes)
            }
            fn done(&mut self) {
                self.inner.done()
            }
            fn error(&mut self) {
                self.inner.error()
            }
        }

        let (pipeline, _dir) =
            pipeline_with(&[("a", &[1; 100]), ("b", &[2; 100])]);
        let session = pipeline.new_session(1.0, 1.0);
        let mut sink = CancellingSink {
            inner: MemorySink::new(),
            handle: session.cancel_handle(),
            calls_after_cancel: 0,
        };

        let status = pipeline.synthesize("ab ab", &session, &mut sink);
        assert_eq!(status, SynthesisStatus::Cancelled);
        // the in-flight chunk completes, nothing follows it
        assert_eq!(sink.calls_after_cancel, 0);
        assert_eq!(sink.inner.samples(), vec![1; 100]);
        // stream end still reported exactly once
        assert_eq!(sink.inner.done_calls, 1);
        assert_eq!(sink.inner.error_calls, 0);
    }

    #[test]
    fn test_speed_affects_output_length() {
        let (pipeline, _dir) = pipeline_with(&[("a", &[100; 1000])]);
        let session = pipeline.new_session(2.0, 1.0);
        let mut sink = MemorySink::new();
        assert_eq!(pipeline.synthesize("a", &session, &mut sink), SynthesisStatus::Completed);
        // double speed → half as many samples out of the fallback engine
        assert_eq!(sink.samples().len(), 500);
    }

    #[test]
    fn test_defaults_fold_into_session() {
        let (pipeline, _dir) = pipeline_with(&[("a", &[1])]);
        // defaults() is identity here; a session built from explicit
        // multipliers clamps into range
        let session = pipeline.new_session(100.0, 1.0);
        assert_eq!(session.speed(), 4.0);
    }
}
