//! Before/after diagnostics for one balancing pass.
//!
//! This is the data a presentation layer needs to chart a run: THD on both
//! sides, the level and phase of every ladder harmonic and the one-sided
//! spectra. Magnitudes are single-sided amplitudes (`2|X| / N`); phases are
//! in radians relative to a cosine at the start of the buffer.

use serde::Serialize;

use crate::balancer::HarmonicBalancer;
use crate::dsp::spectrum::{bin_for_frequency, magnitude_spectrum, phase_spectrum};
use crate::error::{BalanceError, Result};
use crate::policy::Application;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Spectrum {
    pub frequencies: Vec<f64>,
    pub magnitudes: Vec<f64>,
    pub phases: Vec<f64>,
}

impl Spectrum {
    /// Non-negative half of the spectrum of `signal`.
    pub fn of(signal: &[f64], sample_rate: f64) -> Result<Self> {
        let n = signal.len();
        let full = magnitude_spectrum(signal)?;
        let mut phases = phase_spectrum(signal)?;
        let bins = n / 2 + 1;
        phases.truncate(bins);
        let scale = 2.0 / n.max(1) as f64;
        Ok(Self {
            frequencies: (0..bins).map(|k| k as f64 * sample_rate / n as f64).collect(),
            magnitudes: full.iter().take(bins).map(|m| m * scale).collect(),
            phases,
        })
    }

    /// Magnitude of the bin nearest `frequency`.
    pub fn level_at(&self, frequency: f64, sample_rate: f64, n: usize) -> f64 {
        let k = bin_for_frequency(frequency, n, sample_rate);
        self.magnitudes.get(k).copied().unwrap_or(0.0)
    }

    /// Phase of the bin nearest `frequency`.
    pub fn phase_at(&self, frequency: f64, sample_rate: f64, n: usize) -> f64 {
        let k = bin_for_frequency(frequency, n, sample_rate);
        self.phases.get(k).copied().unwrap_or(0.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct HarmonicLevel {
    pub order: usize,
    pub frequency: f64,
    pub before: f64,
    pub after: f64,
    pub phase_before: f64,
    pub phase_after: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BalanceReport {
    pub application: Application,
    pub sample_rate: f64,
    pub samples: usize,
    /// Base frequency after tracking.
    pub base_frequency: f64,
    pub thd_before: Option<f64>,
    pub thd_after: Option<f64>,
    /// `(before - after) / before`; `None` when either side is undefined.
    pub improvement: Option<f64>,
    pub harmonics: Vec<HarmonicLevel>,
    pub spectrum_before: Spectrum,
    pub spectrum_after: Spectrum,
}

impl BalanceReport {
    /// Balance `signal` with `balancer` and describe the result. Returns the
    /// balanced buffer alongside the report.
    pub fn evaluate(
        balancer: &mut HarmonicBalancer,
        signal: &[f64],
        sample_rate: f64,
    ) -> Result<(Vec<f64>, Self)> {
        let thd_before = defined(balancer.calculate_thd(signal, sample_rate))?;
        let output = balancer.balance_signal(signal, sample_rate)?;
        let thd_after = defined(balancer.calculate_thd(&output, sample_rate))?;

        let spectrum_before = Spectrum::of(signal, sample_rate)?;
        let spectrum_after = Spectrum::of(&output, sample_rate)?;
        let n = signal.len();
        let harmonics = balancer
            .ladder()
            .frequencies()
            .iter()
            .enumerate()
            .map(|(i, &frequency)| HarmonicLevel {
                order: i + 1,
                frequency,
                before: spectrum_before.level_at(frequency, sample_rate, n),
                after: spectrum_after.level_at(frequency, sample_rate, n),
                phase_before: spectrum_before.phase_at(frequency, sample_rate, n),
                phase_after: spectrum_after.phase_at(frequency, sample_rate, n),
            })
            .collect();

        let improvement = match (thd_before, thd_after) {
            (Some(before), Some(after)) if before > 0.0 => Some((before - after) / before),
            _ => None,
        };

        let report = Self {
            application: balancer.application(),
            sample_rate,
            samples: n,
            base_frequency: balancer.base_frequency(),
            thd_before,
            thd_after,
            improvement,
            harmonics,
            spectrum_before,
            spectrum_after,
        };
        Ok((output, report))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| BalanceError::Configuration(e.to_string()))
    }
}

/// THD with a degenerate spectrum mapped to `None`.
fn defined(thd: Result<f64>) -> Result<Option<f64>> {
    match thd {
        Ok(v) => Ok(Some(v)),
        Err(BalanceError::DegenerateSpectrum { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}
