//! Linear-interpolation sample-rate converter for 16-bit mono PCM.
//!
//! The numeric behaviour is a fixed contract, not an approximation:
//! for each output index `i` the source position is `i * ratio`
//! (`ratio = in_rate / out_rate`), the sample is linearly interpolated
//! between the two neighbouring input samples, and the result is
//! **truncated** (not rounded) back to `i16`. Positions past the last
//! input pair clamp to the final sample.

/// Convert `input` from `in_rate` Hz to `out_rate` Hz.
///
/// Equal rates return a plain copy. An empty input, a zero rate, or a
/// computed output length of zero all yield an empty vector — never an
/// error.
pub fn resample(input: &[i16], in_rate: u32, out_rate: u32) -> Vec<i16> {
    if in_rate == out_rate {
        return input.to_vec();
    }
    if in_rate == 0 || out_rate == 0 {
        return Vec::new();
    }
    resample_ratio(input, in_rate as f64 / out_rate as f64)
}

/// Resample by a raw ratio (`>1` shortens, `<1` lengthens).
///
/// Shared with the fallback time-scale engine, which expresses its
/// speed factor directly as a ratio.
pub(crate) fn resample_ratio(input: &[i16], ratio: f64) -> Vec<i16> {
    if input.is_empty() || !(ratio > 0.0) {
        return Vec::new();
    }
    let out_len = (input.len() as f64 / ratio) as usize;
    let mut out = Vec::with_capacity(out_len);
    let last = input.len() - 1;
    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let index = pos as usize;
        if index >= last {
            out.push(input[last]);
        } else {
            let frac = pos - index as f64;
            let a = input[index] as f64;
            let b = input[index + 1] as f64;
            out.push((a + frac * (b - a)) as i16);
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
