//! Cancellation-waveform synthesis.
//!
//! Each harmonic contributes a sinusoid at its ladder frequency with the
//! phase from the phase vector. Its amplitude comes from a driven, damped
//! oscillator evaluated at that frequency:
//! `F0 / sqrt((k - m ω²)² + (b ω)²)` with `ω = 2π f`.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::{BalanceError, Result};

/// Reference constants of the oscillator amplitude model.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResonanceModel {
    pub drive: f64,
    pub stiffness: f64,
    pub mass: f64,
    pub damping: f64,
}

impl Default for ResonanceModel {
    fn default() -> Self {
        Self {
            drive: 1.0,
            stiffness: 1.0,
            mass: 1.0,
            damping: 0.1,
        }
    }
}

impl ResonanceModel {
    /// Steady-state amplitude at `frequency` Hz.
    pub fn amplitude(&self, frequency: f64) -> f64 {
        let omega = 2.0 * PI * frequency;
        let elastic = self.stiffness - self.mass * omega * omega;
        let viscous = self.damping * omega;
        self.drive / (elastic * elastic + viscous * viscous).sqrt()
    }
}

/// Builds correction waveforms from a ladder and a phase vector.
#[derive(Clone, Copy, Debug, Default)]
pub struct CorrectionSynthesizer {
    model: ResonanceModel,
}

impl CorrectionSynthesizer {
    pub fn new(model: ResonanceModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &ResonanceModel {
        &self.model
    }

    /// Correction waveform of `len` samples.
    pub fn synthesize(
        &self,
        len: usize,
        sample_rate: f64,
        ladder: &[f64],
        phases: &[f64],
    ) -> Result<Vec<f64>> {
        if ladder.len() != phases.len() {
            return Err(BalanceError::invalid(format!(
                "{} ladder frequencies but {} phases",
                ladder.len(),
                phases.len()
            )));
        }
        let mut correction = vec![0.0; len];
        for (&freq, &phase) in ladder.iter().zip(phases) {
            let amplitude = self.model.amplitude(freq);
            let step = 2.0 * PI * freq / sample_rate;
            for (n, v) in correction.iter_mut().enumerate() {
                *v += amplitude * (step * n as f64 + phase).sin();
            }
        }
        Ok(correction)
    }

    /// `signal - correction(phases)` as a fresh buffer.
    pub fn balance(
        &self,
        signal: &[f64],
        sample_rate: f64,
        ladder: &[f64],
        phases: &[f64],
    ) -> Result<Vec<f64>> {
        let correction = self.synthesize(signal.len(), sample_rate, ladder, phases)?;
        Ok(apply_correction(signal, &correction))
    }
}

/// Destructive superposition: `signal - correction`.
pub fn apply_correction(signal: &[f64], correction: &[f64]) -> Vec<f64> {
    signal
        .iter()
        .zip(correction)
        .map(|(s, c)| s - c)
        .collect()
}
