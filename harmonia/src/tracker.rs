//! Fundamental-frequency tracking and the harmonic ladder.
//!
//! The tracker only follows drift it can see inside a band around the
//! current estimate. Peaks outside `±band` are ignored, so a single call can
//! never move the estimate by more than that fraction; a signal dominated by
//! its second harmonic does not drag the fundamental up to it.

use serde::{Deserialize, Serialize};

use crate::dsp::spectrum::magnitude_spectrum;
use crate::error::{BalanceError, Result};

/// Integer multiples of the base frequency, `ladder[i] = base * (i + 1)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HarmonicLadder {
    base_frequency: f64,
    frequencies: Vec<f64>,
}

impl HarmonicLadder {
    pub fn new(base_frequency: f64, num_harmonics: usize) -> Result<Self> {
        if !(base_frequency.is_finite() && base_frequency > 0.0) {
            return Err(BalanceError::Configuration(format!(
                "base frequency must be positive, got {base_frequency}"
            )));
        }
        if num_harmonics == 0 {
            return Err(BalanceError::Configuration(
                "at least one harmonic is required".into(),
            ));
        }
        Ok(Self {
            base_frequency,
            frequencies: build(base_frequency, num_harmonics),
        })
    }

    /// Move the ladder to a new base frequency, regenerating every rung.
    pub fn retune(&mut self, base_frequency: f64) {
        self.base_frequency = base_frequency;
        self.frequencies = build(base_frequency, self.frequencies.len());
    }

    pub fn base_frequency(&self) -> f64 {
        self.base_frequency
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }
}

fn build(base: f64, count: usize) -> Vec<f64> {
    (0..count).map(|i| base * (i + 1) as f64).collect()
}

/// Result of one tracking step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackOutcome {
    /// Base frequency before the step.
    pub previous: f64,
    /// Strongest in-band peak, or `previous` when none qualified.
    pub detected: f64,
    /// True when the ladder was retuned to `detected`.
    pub drift_confirmed: bool,
}

impl TrackOutcome {
    pub fn drift(&self) -> f64 {
        self.detected - self.previous
    }
}

/// Spectral-peak fundamental tracker.
#[derive(Clone, Debug)]
pub struct FrequencyTracker {
    /// Accepted band half-width as a fraction of the current estimate.
    band: f64,
    /// Minimum change (Hz) before an in-band peak is treated as drift.
    tolerance_hz: f64,
    /// Peaks must exceed this fraction of the spectrum maximum.
    threshold_ratio: f64,
    /// Number of strongest peaks considered.
    candidates: usize,
}

impl Default for FrequencyTracker {
    fn default() -> Self {
        Self {
            band: 0.2,
            tolerance_hz: 0.1,
            threshold_ratio: 0.1,
            candidates: 3,
        }
    }
}

impl FrequencyTracker {
    pub fn new(band: f64, tolerance_hz: f64, threshold_ratio: f64) -> Self {
        Self {
            band,
            tolerance_hz,
            threshold_ratio,
            ..Self::default()
        }
    }

    /// Strongest in-band peak frequency, or `None` when no peak qualifies.
    pub fn in_band_peak(
        &self,
        signal: &[f64],
        sample_rate: f64,
        current_estimate: f64,
    ) -> Result<Option<f64>> {
        let spectrum = magnitude_spectrum(signal)?;
        let half = &spectrum[..(spectrum.len() / 2 + 1).min(spectrum.len())];
        let max = half.iter().copied().fold(0.0_f64, f64::max);
        if !(max > 0.0) {
            return Ok(None);
        }
        let threshold = max * self.threshold_ratio;
        let mut peaks: Vec<usize> = (1..half.len().saturating_sub(1))
            .filter(|&k| half[k] > threshold && half[k] > half[k - 1] && half[k] >= half[k + 1])
            .collect();
        peaks.sort_by(|&a, &b| half[b].total_cmp(&half[a]));
        peaks.truncate(self.candidates);

        let bin_hz = sample_rate / signal.len() as f64;
        let low = current_estimate * (1.0 - self.band);
        let high = current_estimate * (1.0 + self.band);
        Ok(peaks
            .into_iter()
            .map(|k| (k as f64 + parabolic_offset(half, k)) * bin_hz)
            .find(|f| (low..=high).contains(f)))
    }

    /// Fundamental estimate for `signal`: the strongest in-band peak when it
    /// differs from `current_estimate` by more than the tolerance, otherwise
    /// `current_estimate` unchanged.
    pub fn detect_fundamental(
        &self,
        signal: &[f64],
        sample_rate: f64,
        current_estimate: f64,
    ) -> Result<f64> {
        Ok(match self.in_band_peak(signal, sample_rate, current_estimate)? {
            Some(f) if (f - current_estimate).abs() > self.tolerance_hz => f,
            _ => current_estimate,
        })
    }

    /// Tracking step: retunes `ladder` when drift is confirmed.
    pub fn track(
        &self,
        signal: &[f64],
        sample_rate: f64,
        ladder: &mut HarmonicLadder,
    ) -> Result<TrackOutcome> {
        let previous = ladder.base_frequency();
        let detected = self
            .in_band_peak(signal, sample_rate, previous)?
            .unwrap_or(previous);
        let drift_confirmed = (detected - previous).abs() > self.tolerance_hz;
        if drift_confirmed {
            ladder.retune(detected);
        }
        Ok(TrackOutcome {
            previous,
            detected,
            drift_confirmed,
        })
    }
}

/// Sub-bin peak offset from a parabola through the bins around `k`.
fn parabolic_offset(spectrum: &[f64], k: usize) -> f64 {
    let (a, b, c) = (spectrum[k - 1], spectrum[k], spectrum[k + 1]);
    let denom = a - 2.0 * b + c;
    if denom.abs() < f64::EPSILON * b.max(1.0) {
        return 0.0;
    }
    (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
}
