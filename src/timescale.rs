//! Streaming time-scale session — the stage between decoded PCM and
//! the sink.
//!
//! [`TimeScaleStream`] wraps a [`StretchEngine`] (the actual
//! speed/pitch algorithm, treated as opaque) in the write-then-drain
//! discipline the pipeline needs:
//!
//! - every `write` immediately drains all output the engine has ready,
//!   handing each slice to the sink as soon as it exists;
//! - the drain buffer grows on demand and never shrinks within a
//!   session, capped at [`MAX_DRAIN_BUFFER`] samples per read;
//! - the session's cancellation flag is re-checked before every read
//!   and every sink call; a set flag exits the drain immediately and
//!   skips the end-of-input flush;
//! - dropping the stream releases the engine on every exit path.

use tracing::{debug, warn};

use crate::resample::resample_ratio;
use crate::session::StreamSession;
use crate::sink::{AudioSink, SinkStatus};

/// Initial drain-buffer size, in samples. Also the sub-chunk size the
/// pipeline writes units in.
pub const DEFAULT_CHUNK: usize = 4096;

/// Hard cap on a single drain read, in samples. An engine reporting
/// more than this per round is treated as an anomaly: the read is
/// truncated, logged, and the remainder picked up by later iterations.
pub const MAX_DRAIN_BUFFER: usize = 1 << 20;

/// The time-stretch/pitch engine behind a session.
///
/// `put_samples` / `samples_available` / `receive_samples` mirror the
/// push–pull shape of stream-oriented DSP libraries: input goes in,
/// processed output accumulates until read. `flush` signals
/// end-of-input so remaining internal state drains.
pub trait StretchEngine {
    fn set_speed(&mut self, speed: f32);
    fn set_pitch(&mut self, pitch: f32);
    /// Combined rate factor (sample-rate conversion folded into the
    /// engine), applied on top of speed/pitch.
    fn set_rate(&mut self, rate: f32);
    fn put_samples(&mut self, samples: &[i16]);
    fn samples_available(&self) -> usize;
    /// Read up to `out.len()` processed samples; returns the count.
    fn receive_samples(&mut self, out: &mut [i16]) -> usize;
    fn flush(&mut self);
}

impl<T: StretchEngine + ?Sized> StretchEngine for Box<T> {
    fn set_speed(&mut self, speed: f32) {
        (**self).set_speed(speed)
    }
    fn set_pitch(&mut self, pitch: f32) {
        (**self).set_pitch(pitch)
    }
    fn set_rate(&mut self, rate: f32) {
        (**self).set_rate(rate)
    }
    fn put_samples(&mut self, samples: &[i16]) {
        (**self).put_samples(samples)
    }
    fn samples_available(&self) -> usize {
        (**self).samples_available()
    }
    fn receive_samples(&mut self, out: &mut [i16]) -> usize {
        (**self).receive_samples(out)
    }
    fn flush(&mut self) {
        (**self).flush()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LinearStretcher — fallback engine
// ─────────────────────────────────────────────────────────────────────────────

/// Resampling-based fallback engine.
///
/// Approximates time-scale modification by plain linear resampling, so
/// speed and pitch are *not* independent: the effective playback
/// factor is `speed × pitch × rate`. Deterministic and allocation-light,
/// which makes it the default binding when no native stretch library
/// is wired in.
pub struct LinearStretcher {
    speed: f32,
    pitch: f32,
    rate: f32,
    pending: Vec<i16>,
}

impl LinearStretcher {
    pub fn new(_sample_rate: u32, _channels: u16) -> Self {
        Self { speed: 1.0, pitch: 1.0, rate: 1.0, pending: Vec::new() }
    }

    fn factor(&self) -> f64 {
        let f = (self.speed * self.pitch * self.rate) as f64;
        if f.is_finite() && f > 0.0 {
            f
        } else {
            1.0
        }
    }
}

impl StretchEngine for LinearStretcher {
    fn set_speed(&mut self, speed: f32) {
        self.speed = speed;
    }

    fn set_pitch(&mut self, pitch: f32) {
        self.pitch = pitch;
    }

    fn set_rate(&mut self, rate: f32) {
        self.rate = rate;
    }

    fn put_samples(&mut self, samples: &[i16]) {
        let factor = self.factor();
        if (factor - 1.0).abs() < f64::EPSILON {
            self.pending.extend_from_slice(samples);
        } else {
            self.pending.extend(resample_ratio(samples, factor));
        }
    }

    fn samples_available(&self) -> usize {
        self.pending.len()
    }

    fn receive_samples(&mut self, out: &mut [i16]) -> usize {
        let n = out.len().min(self.pending.len());
        out[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        n
    }

    fn flush(&mut self) {
        // input is processed eagerly on write; nothing held back
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TimeScaleStream
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a write/drain round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// All available output delivered.
    Ok,
    /// The session's stop flag was observed; drain exited early.
    Cancelled,
    /// The sink rejected a chunk; no further writes should happen.
    SinkFailed,
}

/// One streaming session around a [`StretchEngine`].
pub struct TimeScaleStream<E: StretchEngine> {
    engine: E,
    sample_rate: u32,
    out_buf: Vec<i16>,
    byte_buf: Vec<u8>,
    flushed: bool,
}

impl<E: StretchEngine> TimeScaleStream<E> {
    /// Open a session: takes ownership of the engine handle for the
    /// duration of one request. Dropping the stream releases it.
    pub fn open(engine: E, sample_rate: u32, _channels: u16) -> Self {
        Self {
            engine,
            sample_rate,
            out_buf: vec![0; DEFAULT_CHUNK],
            byte_buf: Vec::with_capacity(DEFAULT_CHUNK * 2),
            flushed: false,
        }
    }

    /// Update speed/pitch; takes effect on subsequently written audio.
    pub fn configure(&mut self, speed: f32, pitch: f32) {
        self.engine.set_speed(speed);
        self.engine.set_pitch(pitch);
    }

    pub fn set_rate(&mut self, rate: f32) {
        self.engine.set_rate(rate);
    }

    /// Push one PCM chunk into the engine and drain everything it has
    /// ready into `sink`.
    pub fn write(
        &mut self,
        chunk: &[i16],
        sink: &mut dyn AudioSink,
        session: &StreamSession,
    ) -> DrainOutcome {
        if self.flushed {
            warn!("write after flush ignored");
            return DrainOutcome::Ok;
        }
        self.engine.put_samples(chunk);
        session.add_samples_in(chunk.len());
        self.drain(sink, session)
    }

    /// Feed `duration_ms` of zero samples, exactly as `write` does.
    /// Used for pause tokens.
    pub fn write_silence(
        &mut self,
        duration_ms: u32,
        sink: &mut dyn AudioSink,
        session: &StreamSession,
    ) -> DrainOutcome {
        let n = (self.sample_rate as u64 * duration_ms as u64 / 1000) as usize;
        if n == 0 {
            return DrainOutcome::Ok;
        }
        let silence = vec![0i16; n];
        self.write(&silence, sink, session)
    }

    /// Signal end-of-input and drain until the engine is empty.
    /// A no-op when the session is already cancelled: partial engine
    /// state is discarded, not flushed.
    pub fn flush(
        &mut self,
        sink: &mut dyn AudioSink,
        session: &StreamSession,
    ) -> DrainOutcome {
        if session.is_cancelled() {
            return DrainOutcome::Cancelled;
        }
        if !self.flushed {
            self.engine.flush();
            self.flushed = true;
        }
        self.drain(sink, session)
    }

    fn drain(&mut self, sink: &mut dyn AudioSink, session: &StreamSession) -> DrainOutcome {
        loop {
            // checkpoint: before reading further output or touching the sink
            if session.is_cancelled() {
                return DrainOutcome::Cancelled;
            }
            let available = self.engine.samples_available();
            if available == 0 {
                return DrainOutcome::Ok;
            }
            if available > self.out_buf.len() {
                let target = available.min(MAX_DRAIN_BUFFER);
                if available > MAX_DRAIN_BUFFER {
                    warn!(available, cap = MAX_DRAIN_BUFFER, "drain read truncated to cap");
                }
                if target > self.out_buf.len() {
                    debug!(from = self.out_buf.len(), to = target, "drain buffer grown");
                    // monotonic growth: resized up, never down
                    self.out_buf.resize(target, 0);
                }
            }
            let n = self.engine.receive_samples(&mut self.out_buf);
            if n == 0 {
                return DrainOutcome::Ok;
            }
            session.add_samples_out(n);

            self.byte_buf.clear();
            for &s in &self.out_buf[..n] {
                self.byte_buf.extend_from_slice(&s.to_le_bytes());
            }
            if sink.audio_available(&self.byte_buf) == SinkStatus::Fail {
                warn!("sink rejected audio chunk");
                return DrainOutcome::SinkFailed;
            }
        }
    }

    /// Current drain-buffer capacity in samples (grows, never shrinks).
    pub fn drain_buffer_len(&self) -> usize {
        self.out_buf.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test engine
// ─────────────────────────────────────────────────────────────────────────────

/// Deterministic engine for tests: queues input verbatim and exposes
/// it in caller-controlled slices. Shared with the pipeline tests.
#[cfg(test)]
pub(crate) struct PassthroughEngine {
    queue: Vec<i16>,
}

#[cfg(test)]
impl PassthroughEngine {
    pub fn new() -> Self {
        Self { queue: Vec::new() }
    }
}

#[cfg(test)]
impl StretchEngine for PassthroughEngine {
    fn set_speed(&mut self, _speed: f32) {}
    fn set_pitch(&mut self, _pitch: f32) {}
    fn set_rate(&mut self, _rate: f32) {}

    fn put_samples(&mut self, samples: &[i16]) {
        self.queue.extend_from_slice(samples);
    }

    fn samples_available(&self) -> usize {
        self.queue.len()
    }

    fn receive_samples(&mut self, out: &mut [i16]) -> usize {
        let n = out.len().min(self.queue.len());
        out[..n].copy_from_slice(&self.queue[..n]);
        self.queue.drain(..n);
        n
    }

    fn flush(&mut self) {}
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
