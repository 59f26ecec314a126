//! # unitspeech
//!
//! Offline concatenative speech synthesis from pre-recorded unit
//! recordings — no model inference, no network, no audio backend
//! assumptions.
//!
//! ## Quick start
//!
//! ```no_run
//! use unitspeech::{Voice, WavFileSink};
//!
//! // A voice directory holds voice.json + index + blob + mapping
//! let voice = Voice::open(std::path::Path::new("voices/shan")).unwrap();
//!
//! let pipeline = voice.pipeline();
//! let session = pipeline.new_session(1.0, 1.0);
//! let mut sink = WavFileSink::new(std::path::Path::new("output.wav"));
//! pipeline.synthesize("မႂ်ႇသုင်ၶႃႈ", &session, &mut sink);
//! ```
//!
//! Cancellation is cooperative: grab a [`session::CancelHandle`] before
//! starting and flip it from any thread; the stream stops at the next
//! buffer boundary and the sink still sees a well-formed end of stream.
//!
//! ## Pipeline
//! 1. **Segmentation** — greedy longest-match over the voice's span
//!    mapping; unmatched punctuation and whitespace become timed pauses.
//! 2. **Fetch** — each unit's bytes read from the packed audio blob.
//! 3. **Decode** — symphonia container decode with a raw 16-bit PCM
//!    fallback.
//! 4. **Resample** — linear interpolation to the 22 050 Hz output rate.
//! 5. **Time-scale** — a streaming speed/pitch stage drains processed
//!    audio to the sink chunk by chunk.

pub mod codec;
pub mod inventory;
pub mod pipeline;
pub mod resample;
pub mod segment;
pub mod session;
pub mod sink;
pub mod store;
pub mod timescale;
pub mod voice;

// ─── Re-exports for convenience ─────────────────────────────────────────────

pub use pipeline::{SynthesisPipeline, SynthesisStatus, OUTPUT_SAMPLE_RATE};
pub use session::{CancelHandle, StreamSession};
pub use sink::{AudioSink, MemorySink, SinkStatus, WavFileSink};
pub use voice::{Voice, VoiceError, VoiceManifest};
