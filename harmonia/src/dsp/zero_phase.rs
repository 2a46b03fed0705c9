//! Forward-backward (zero-phase) filtering of complete buffers.
//!
//! The buffer is extended at both ends by an odd reflection about its end
//! samples, long enough for the slowest pole of the cascade to ring out.
//! Each pass starts every section from its steady state for the first padded
//! sample, runs the cascade, and the second pass does the same on the time
//! reversed result. The net response is `|H|^2` with no group delay.

use super::biquad::{Biquad, SectionState};

/// Residual amplitude at which a decaying transient counts as settled.
const SETTLE_LEVEL: f64 = 1e-4;

/// Apply `sections` forwards then backwards. Output length equals input length.
pub fn apply_zero_phase(sections: &[Biquad], buffer: &[f64]) -> Vec<f64> {
    let n = buffer.len();
    if sections.is_empty() || n < 2 {
        return buffer.to_vec();
    }
    let pad = pad_length(sections, n);
    let mut work = odd_extension(buffer, pad);

    run_cascade(sections, &mut work);
    work.reverse();
    run_cascade(sections, &mut work);
    work.reverse();

    work[pad..pad + n].to_vec()
}

/// Samples needed before the slowest section has decayed below `SETTLE_LEVEL`,
/// capped at `n - 1` (a reflection cannot be longer than the buffer).
pub fn pad_length(sections: &[Biquad], n: usize) -> usize {
    let radius = sections
        .iter()
        .map(Biquad::pole_radius)
        .fold(0.0_f64, f64::max);
    let settle = if radius <= 0.0 {
        1
    } else if radius >= 1.0 {
        usize::MAX
    } else {
        (SETTLE_LEVEL.ln() / radius.ln()).ceil().max(1.0) as usize
    };
    let minimum = 3 * (2 * sections.len() + 1);
    settle.max(minimum).min(n - 1)
}

fn odd_extension(buffer: &[f64], pad: usize) -> Vec<f64> {
    let n = buffer.len();
    let first = buffer[0];
    let last = buffer[n - 1];
    let mut out = Vec::with_capacity(n + 2 * pad);
    for i in (1..=pad).rev() {
        out.push(2.0 * first - buffer[i]);
    }
    out.extend_from_slice(buffer);
    for i in 1..=pad {
        out.push(2.0 * last - buffer[n - 1 - i]);
    }
    out
}

fn run_cascade(sections: &[Biquad], samples: &mut [f64]) {
    for section in sections {
        let mut state: SectionState = section.steady_state(samples[0]);
        section.process_inplace(&mut state, samples);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::butterworth::butterworth_low_pass;
    use std::f64::consts::PI;

    fn tone(freq: f64, sr: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / sr).sin())
            .collect()
    }

    #[test]
    fn extension_reflects_about_end_points() {
        let ext = odd_extension(&[1.0, 2.0, 4.0, 7.0], 2);
        assert_eq!(ext, vec![-2.0, 0.0, 1.0, 2.0, 4.0, 7.0, 10.0, 12.0]);
    }

    #[test]
    fn preserves_length_for_tiny_buffers() {
        let sections = vec![Biquad::notch(1000.0, 120.0, 30.0)];
        for n in 2..12 {
            let input: Vec<f64> = (0..n).map(|i| i as f64).collect();
            assert_eq!(apply_zero_phase(&sections, &input).len(), n);
        }
    }

    #[test]
    fn constant_passes_through_low_pass() {
        let sections = butterworth_low_pass(4, 50.0, 1000.0);
        let out = apply_zero_phase(&sections, &vec![0.25; 300]);
        for v in out {
            assert!((v - 0.25).abs() < 1e-9);
        }
    }

    #[test]
    fn in_band_tone_is_not_delayed() {
        let sections = butterworth_low_pass(4, 120.0, 1000.0);
        let input = tone(20.0, 1000.0, 1000);
        let out = apply_zero_phase(&sections, &input);
        // Compare in the middle where edge effects are gone.
        for i in 300..700 {
            assert!((out[i] - input[i]).abs() < 0.01, "sample {i}");
        }
    }

    #[test]
    fn notch_removes_target_tone() {
        let sections = vec![Biquad::notch(1000.0, 120.0, 30.0)];
        let input: Vec<f64> = tone(60.0, 1000.0, 1000)
            .iter()
            .zip(tone(120.0, 1000.0, 1000))
            .map(|(a, b)| a + 0.5 * b)
            .collect();
        let out = apply_zero_phase(&sections, &input);
        let fundamental = tone(60.0, 1000.0, 1000);
        for i in 350..650 {
            assert!((out[i] - fundamental[i]).abs() < 0.02, "sample {i}");
        }
    }
}
