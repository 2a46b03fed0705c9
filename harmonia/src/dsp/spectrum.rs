//! Forward/inverse frequency transforms for whole signal buffers.
//!
//! The balancer works on complete in-memory buffers, so every transform here
//! is planned for the exact buffer length. Real-to-complex FFTs only produce
//! the non-negative half of the spectrum; `forward_transform` mirrors the
//! conjugate half back in so callers can index bins the same way as
//! `frequency_bins`.

use realfft::num_complex::Complex64;
use realfft::RealFftPlanner;

use crate::error::Result;

/// Full complex spectrum of a real buffer, same length as the input.
pub fn forward_transform(buffer: &[f64]) -> Result<Vec<Complex64>> {
    let n = buffer.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let mut planner = RealFftPlanner::<f64>::new();
    let r2c = planner.plan_fft_forward(n);
    let mut input = r2c.make_input_vec();
    input.copy_from_slice(buffer);
    let mut half = r2c.make_output_vec();
    let mut scratch = r2c.make_scratch_vec();
    r2c.process_with_scratch(&mut input, &mut half, &mut scratch)?;

    let mut full = Vec::with_capacity(n);
    full.extend_from_slice(&half);
    for k in half.len()..n {
        full.push(half[n - k].conj());
    }
    Ok(full)
}

/// Real buffer from a full (conjugate-symmetric) spectrum. Only the
/// non-negative half is read; the result is normalised by `1/N`.
pub fn inverse_transform(spectrum: &[Complex64]) -> Result<Vec<f64>> {
    let n = spectrum.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let mut planner = RealFftPlanner::<f64>::new();
    let c2r = planner.plan_fft_inverse(n);
    let mut half = c2r.make_input_vec();
    let bins = half.len();
    half.copy_from_slice(&spectrum[..bins]);
    // DC and (for even N) Nyquist must be purely real for a c2r transform.
    half[0].im = 0.0;
    if n % 2 == 0 {
        half[bins - 1].im = 0.0;
    }
    let mut output = c2r.make_output_vec();
    let mut scratch = c2r.make_scratch_vec();
    c2r.process_with_scratch(&mut half, &mut output, &mut scratch)?;
    let norm = 1.0 / n as f64;
    for v in output.iter_mut() {
        *v *= norm;
    }
    Ok(output)
}

/// Bin centre frequencies, index-aligned with `forward_transform`.
/// Bin `k` and bin `n - k` are the positive/negative mirror pair.
pub fn frequency_bins(n: usize, sample_rate: f64) -> Vec<f64> {
    let step = sample_rate / n.max(1) as f64;
    let positive = (n.saturating_sub(1)) / 2;
    (0..n)
        .map(|k| {
            if k <= positive {
                k as f64 * step
            } else {
                (k as f64 - n as f64) * step
            }
        })
        .collect()
}

/// Magnitude of every bin of the full spectrum.
pub fn magnitude_spectrum(buffer: &[f64]) -> Result<Vec<f64>> {
    Ok(forward_transform(buffer)?.iter().map(|c| c.norm()).collect())
}

/// Phase (radians) of every bin of the full spectrum.
pub fn phase_spectrum(buffer: &[f64]) -> Result<Vec<f64>> {
    Ok(forward_transform(buffer)?.iter().map(|c| c.arg()).collect())
}

/// Index of the bin nearest to `frequency` in a spectrum of length `n`.
pub fn bin_for_frequency(frequency: f64, n: usize, sample_rate: f64) -> usize {
    let idx = (frequency * n as f64 / sample_rate).round();
    if idx <= 0.0 {
        0
    } else {
        (idx as usize).min(n.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn tone(freq: f64, sr: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / sr).sin())
            .collect()
    }

    #[test]
    fn bins_follow_fftfreq_layout() {
        let bins = frequency_bins(8, 8.0);
        assert_eq!(bins, vec![0.0, 1.0, 2.0, 3.0, -4.0, -3.0, -2.0, -1.0]);
        let odd = frequency_bins(5, 5.0);
        assert_eq!(odd, vec![0.0, 1.0, 2.0, -2.0, -1.0]);
    }

    #[test]
    fn spectrum_is_conjugate_symmetric() {
        let signal = tone(50.0, 1000.0, 999);
        let spec = forward_transform(&signal).unwrap();
        assert_eq!(spec.len(), signal.len());
        for k in 1..spec.len() {
            let mirror = spec[spec.len() - k].conj();
            assert!((spec[k] - mirror).norm() < 1e-9);
        }
    }

    #[test]
    fn inverse_recovers_signal() {
        let signal: Vec<f64> = tone(60.0, 1000.0, 1000)
            .iter()
            .zip(tone(180.0, 1000.0, 1000))
            .map(|(a, b)| a + 0.3 * b)
            .collect();
        let back = inverse_transform(&forward_transform(&signal).unwrap()).unwrap();
        assert_eq!(back.len(), signal.len());
        for (a, b) in signal.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn tone_peaks_at_its_bin() {
        let mags = magnitude_spectrum(&tone(60.0, 1000.0, 1000)).unwrap();
        let peak = mags[..500]
            .iter()
            .enumerate()
            .fold((0, 0.0), |acc, (i, &m)| if m > acc.1 { (i, m) } else { acc });
        assert_eq!(peak.0, 60);
        assert!((peak.1 - 500.0).abs() < 1e-6);
        assert_eq!(bin_for_frequency(60.0, 1000, 1000.0), 60);
    }

    #[test]
    fn phase_of_shifted_cosine() {
        let signal: Vec<f64> = (0..1000)
            .map(|i| (2.0 * PI * 60.0 * i as f64 / 1000.0 + 0.3).cos())
            .collect();
        let phases = phase_spectrum(&signal).unwrap();
        assert_eq!(phases.len(), signal.len());
        assert!((phases[60] - 0.3).abs() < 1e-9);
        assert!((phases[940] + 0.3).abs() < 1e-9);
    }
}
