//! Unit decoding — raw blob bytes → linear PCM.
//!
//! The blob stores each unit in whatever form the voice was packed
//! with: a compressed container (WAV or MP3 in the reference voices)
//! or headerless 16-bit little-endian PCM at the voice's native rate.
//! [`StoreDecoder`] probes with symphonia first and falls back to the
//! raw interpretation, so a voice can mix both freely.
//!
//! Decoding is a pure, possibly-failing function: a failure for one
//! unit returns `None` and the pipeline skips that token.

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

/// A decoded unit: mono 16-bit samples at a known rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pcm {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

/// Decodes one unit's stored bytes into PCM. Implementations must be
/// stateless beyond construction-time configuration.
pub trait UnitDecoder {
    fn decode(&self, bytes: &[u8]) -> Option<Pcm>;
}

/// The shipped decoder: symphonia probe with a raw-PCM fallback.
pub struct StoreDecoder {
    /// Sample rate assumed for headerless PCM units.
    native_rate: u32,
}

impl StoreDecoder {
    pub fn new(native_rate: u32) -> Self {
        Self { native_rate }
    }
}

impl UnitDecoder for StoreDecoder {
    fn decode(&self, bytes: &[u8]) -> Option<Pcm> {
        if bytes.len() < 2 {
            return None;
        }
        decode_container(bytes).or_else(|| decode_raw(bytes, self.native_rate))
    }
}

/// Probe and decode a containerised unit (WAV/MP3). Returns `None`
/// when the bytes are not a recognisable container or yield no audio.
fn decode_container(bytes: &[u8]) -> Option<Pcm> {
    let cursor = std::io::Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let probed = symphonia::default::get_probe()
        .format(&Hint::new(), mss, &FormatOptions::default(), &MetadataOptions::default())
        .ok()?;
    let mut format = probed.format;

    let track = format.default_track()?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let sample_rate = codec_params.sample_rate?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .ok()?;

    let mut samples: Vec<i16> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<i16>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                debug!(error = %e, "container read ended early");
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            // a corrupt packet is skipped, the rest of the unit still plays
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => {
                debug!(error = %e, "unit decode aborted");
                break;
            }
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let required = decoded.frames() * channels;
        if sample_buf.as_ref().map_or(true, |b| b.capacity() < required) {
            sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
        }
        let buf = sample_buf.as_mut()?;
        buf.copy_interleaved_ref(decoded);

        if channels == 1 {
            samples.extend_from_slice(buf.samples());
        } else {
            // downmix interleaved frames to mono
            samples.extend(buf.samples().chunks_exact(channels).map(|frame| {
                (frame.iter().map(|&s| s as i32).sum::<i32>() / channels as i32) as i16
            }));
        }
    }

    if samples.is_empty() {
        None
    } else {
        Some(Pcm { samples, sample_rate })
    }
}

/// Interpret bytes as headerless 16-bit little-endian PCM. A trailing
/// odd byte is ignored.
fn decode_raw(bytes: &[u8], sample_rate: u32) -> Option<Pcm> {
    if bytes.len() < 2 {
        return None;
    }
    let samples: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();
    Some(Pcm { samples, sample_rate })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
