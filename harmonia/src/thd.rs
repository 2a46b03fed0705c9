//! Total harmonic distortion of a signal buffer.
//!
//! The dominant bin of the non-negative half of the spectrum stands in for the
//! fundamental. Harmonic energy is every bin from `2 * f` up to (not
//! including) `(H + 1) * f`, clamped to the non-negative half of the
//! spectrum so mirrored bins are never counted. The result is a
//! fraction, not a percentage, and is not clamped to `[0, 1]`.

use crate::dsp::spectrum::magnitude_spectrum;
use crate::error::{BalanceError, Result};
use crate::signal::validate;

/// Magnitudes at or below this are treated as no fundamental at all.
const MIN_FUNDAMENTAL_MAGNITUDE: f64 = 1e-12;

/// THD of `signal` counting `num_harmonics` harmonic multiples.
pub fn calculate_thd(signal: &[f64], sample_rate: f64, num_harmonics: usize) -> Result<f64> {
    validate(signal, sample_rate)?;
    let spectrum = magnitude_spectrum(signal)?;
    thd_from_magnitudes(&spectrum, num_harmonics)
}

/// THD from a precomputed full magnitude spectrum.
pub fn thd_from_magnitudes(spectrum: &[f64], num_harmonics: usize) -> Result<f64> {
    let half = (spectrum.len() / 2).max(1);
    let (f_idx, fundamental) = spectrum[..half.min(spectrum.len())]
        .iter()
        .copied()
        .enumerate()
        .fold((0usize, f64::NEG_INFINITY), |best, (i, m)| {
            if m > best.1 {
                (i, m)
            } else {
                best
            }
        });
    if f_idx == 0 || !(fundamental > MIN_FUNDAMENTAL_MAGNITUDE) {
        return Err(BalanceError::DegenerateSpectrum {
            bin: f_idx,
            magnitude: fundamental.max(0.0),
        });
    }
    let available = spectrum.len() / 2 + 1;
    let start = (2 * f_idx).min(available);
    let end = ((num_harmonics + 1) * f_idx).min(available);
    let energy: f64 = spectrum[start..end.max(start)].iter().map(|m| m * m).sum();
    Ok(energy.sqrt() / fundamental)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::harmonic_signal;

    #[test]
    fn pure_tone_has_negligible_thd() {
        let s = harmonic_signal(1.0, 1000.0, 60.0, &[1.0]);
        let thd = calculate_thd(&s, 1000.0, 5).unwrap();
        assert!(thd >= 0.0);
        assert!(thd < 1e-9);
    }

    #[test]
    fn single_harmonic_ratio() {
        let s = harmonic_signal(1.0, 1000.0, 60.0, &[1.0, 0.1]);
        let thd = calculate_thd(&s, 1000.0, 5).unwrap();
        assert!((thd - 0.1).abs() < 1e-9);
    }

    #[test]
    fn combined_harmonics() {
        let s = harmonic_signal(1.0, 1000.0, 60.0, &[1.0, 0.5, 0.3]);
        let thd = calculate_thd(&s, 1000.0, 5).unwrap();
        let expected = (0.5f64 * 0.5 + 0.3 * 0.3).sqrt();
        assert!((thd - expected).abs() < 1e-9);
    }

    #[test]
    fn harmonic_range_is_clamped() {
        // 200 Hz fundamental on a 1000-sample, 1 kHz buffer: (H + 1) * f runs
        // past the end of the spectrum.
        let s = harmonic_signal(1.0, 1000.0, 200.0, &[1.0, 0.2]);
        let thd = calculate_thd(&s, 1000.0, 10).unwrap();
        assert!((thd - 0.2).abs() < 1e-9);
    }

    #[test]
    fn zero_and_constant_signals_are_degenerate() {
        assert!(matches!(
            calculate_thd(&vec![0.0; 256], 1000.0, 5),
            Err(BalanceError::DegenerateSpectrum { .. })
        ));
        assert!(matches!(
            calculate_thd(&vec![0.5; 256], 1000.0, 5),
            Err(BalanceError::DegenerateSpectrum { bin: 0, .. })
        ));
    }

    #[test]
    fn thd_can_exceed_one() {
        let s = harmonic_signal(1.0, 1000.0, 50.0, &[1.0, 0.9, 0.9, 0.9]);
        let thd = calculate_thd(&s, 1000.0, 5).unwrap();
        assert!(thd > 1.0);
    }

    #[test]
    fn rejects_invalid_input() {
        assert!(matches!(
            calculate_thd(&[1.0], 1000.0, 5),
            Err(BalanceError::InvalidSignal { .. })
        ));
    }
}
