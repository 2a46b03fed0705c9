//! Spectral-mask balancing, the lower-cost alternative to the phase search.
//!
//! Bins within a small window of a ladder frequency are multiplied by
//! `exp(i * phase)`. Both mirror bins get the same factor, and only the real
//! part of the inverse transform is kept, so a rotated component ends up
//! scaled by `cos(phase)`.
//!
//! * `Power`: even ladder indices only (the odd harmonics), window ±1 Hz.
//! * `Vibration`: every index, window ±2 Hz, extra damping `1 / (i + 1)`.

use realfft::num_complex::Complex64;

use crate::dsp::spectrum::{forward_transform, frequency_bins, inverse_transform};
use crate::error::Result;
use crate::policy::Application;

const POWER_WINDOW_HZ: f64 = 1.0;
const VIBRATION_WINDOW_HZ: f64 = 2.0;

/// Masked copy of `signal`.
pub fn spectral_mask(
    signal: &[f64],
    sample_rate: f64,
    ladder: &[f64],
    phases: &[f64],
    application: Application,
) -> Result<Vec<f64>> {
    let n = signal.len();
    let mut spectrum = forward_transform(signal)?;
    let freqs = frequency_bins(n, sample_rate);

    for (i, (&freq, &phase)) in ladder.iter().zip(phases).enumerate() {
        let (window, gain) = match application {
            Application::Power if i % 2 == 0 => (POWER_WINDOW_HZ, 1.0),
            Application::Power => continue,
            Application::Vibration => (VIBRATION_WINDOW_HZ, 1.0 / (i + 1) as f64),
        };
        let factor = Complex64::from_polar(gain, phase);
        for (bin, f) in spectrum.iter_mut().zip(&freqs) {
            let f = f.abs();
            if f >= freq - window && f <= freq + window {
                *bin *= factor;
            }
        }
    }

    inverse_transform(&hermitian_part(&spectrum))
}

/// Spectrum of the real part of `ifft(spectrum)`:
/// `(X[k] + conj(X[N - k])) / 2`.
fn hermitian_part(spectrum: &[Complex64]) -> Vec<Complex64> {
    let n = spectrum.len();
    (0..n)
        .map(|k| (spectrum[k] + spectrum[(n - k) % n].conj()) * 0.5)
        .collect()
}
