//! Per-request session state: time-scale parameters, the cooperative
//! cancellation flag, and the running sample counters reported at the
//! end of a request.
//!
//! Cancellation is a plain atomic read at every buffer boundary — no
//! lock, no unwinding. The flag is monotonic: once set, the session
//! never un-cancels.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

/// Safe range for the speed multiplier.
pub const SPEED_RANGE: (f32, f32) = (0.1, 4.0);
/// Safe range for the pitch multiplier.
pub const PITCH_RANGE: (f32, f32) = (0.5, 2.0);

/// Handle for stopping a running synthesis from another thread.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Mutable state owned by one `synthesize` call.
#[derive(Debug)]
pub struct StreamSession {
    speed: f32,
    pitch: f32,
    cancel: Arc<AtomicBool>,
    samples_in: AtomicU64,
    samples_out: AtomicU64,
}

impl StreamSession {
    /// Create a session with the requested multipliers, each clamped
    /// independently to its safe range.
    pub fn new(speed: f32, pitch: f32) -> Self {
        Self {
            speed: clamp(speed, SPEED_RANGE),
            pitch: clamp(pitch, PITCH_RANGE),
            cancel: Arc::new(AtomicBool::new(false)),
            samples_in: AtomicU64::new(0),
            samples_out: AtomicU64::new(0),
        }
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    /// A handle the "stop" side can own; settable while `synthesize`
    /// runs on another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub(crate) fn add_samples_in(&self, n: usize) {
        self.samples_in.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_samples_out(&self, n: usize) {
        self.samples_out.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Samples fed into the time-scale engine so far.
    pub fn samples_in(&self) -> u64 {
        self.samples_in.load(Ordering::Relaxed)
    }

    /// Samples handed to the sink so far.
    pub fn samples_out(&self) -> u64 {
        self.samples_out.load(Ordering::Relaxed)
    }
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

fn clamp(value: f32, (lo, hi): (f32, f32)) -> f32 {
    if value.is_nan() {
        1.0
    } else {
        value.clamp(lo, hi)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
