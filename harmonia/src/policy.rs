//! Application-specific post-filtering.
//!
//! * `Power`: zero-phase notches at harmonics 2..=H of the base frequency,
//!   then a coupling-influence gain.
//! * `Vibration`: zero-phase Butterworth low-pass at a multiple of the base
//!   frequency (second harmonic by default).
//!
//! The variant is fixed when the policy is built.

use std::fmt;
use std::str::FromStr;

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::dsp::{apply_zero_phase, design_low_pass, design_notch};
use crate::error::BalanceError;

/// Use case the balancer is tuned for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Application {
    /// Electrical power waveforms.
    Power,
    /// Mechanical vibration traces.
    Vibration,
}

impl Application {
    pub const fn all() -> [Self; 2] {
        [Self::Power, Self::Vibration]
    }

    pub const fn name(self) -> &'static str {
        match self {
            Application::Power => "power",
            Application::Vibration => "vibration",
        }
    }
}

impl fmt::Display for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Application {
    type Err = BalanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "power" => Ok(Application::Power),
            "vibration" => Ok(Application::Vibration),
            other => Err(BalanceError::Configuration(format!(
                "unsupported application '{other}', expected 'power' or 'vibration'"
            ))),
        }
    }
}

/// Cross-harmonic coupling gain applied after the power notches:
/// `output[n] *= 1 + 0.1 * influence[n]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CouplingInfluence {
    /// The same influence for every sample and every call.
    Fixed { gain: f64 },
    /// Per-sample influence `amplitude * U[0, 1)` from a stream seeded once
    /// when the policy is built, so a sequence of calls is reproducible.
    Seeded { seed: u64, amplitude: f64 },
}

impl Default for CouplingInfluence {
    fn default() -> Self {
        CouplingInfluence::Fixed { gain: 0.0 }
    }
}

/// Filter parameters shared by both variants.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PolicySettings {
    pub notch_q: f64,
    pub low_pass_order: usize,
    /// Low-pass cutoff as a multiple of the base frequency.
    pub low_pass_cutoff_ratio: f64,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            notch_q: 30.0,
            low_pass_order: 4,
            low_pass_cutoff_ratio: 2.0,
        }
    }
}

enum InfluenceSource {
    Fixed(f64),
    Seeded { rng: StdRng, amplitude: f64 },
}

/// Output of one policy application.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterOutcome {
    pub output: Vec<f64>,
    /// Notch centres skipped because they sit at or above Nyquist.
    pub skipped_notches: Vec<f64>,
}

pub struct ApplicationPolicy {
    application: Application,
    settings: PolicySettings,
    influence: InfluenceSource,
}

impl ApplicationPolicy {
    pub fn new(
        application: Application,
        settings: PolicySettings,
        influence: &CouplingInfluence,
    ) -> Self {
        let influence = match *influence {
            CouplingInfluence::Fixed { gain } => InfluenceSource::Fixed(gain),
            CouplingInfluence::Seeded { seed, amplitude } => InfluenceSource::Seeded {
                rng: StdRng::seed_from_u64(seed),
                amplitude,
            },
        };
        Self {
            application,
            settings,
            influence,
        }
    }

    pub fn application(&self) -> Application {
        self.application
    }

    /// Filter `signal` for this policy's application.
    pub fn apply(
        &mut self,
        signal: &[f64],
        sample_rate: f64,
        base_frequency: f64,
        num_harmonics: usize,
    ) -> FilterOutcome {
        match self.application {
            Application::Power => self.apply_power(signal, sample_rate, base_frequency, num_harmonics),
            Application::Vibration => FilterOutcome {
                output: self.apply_vibration(signal, sample_rate, base_frequency),
                skipped_notches: Vec::new(),
            },
        }
    }

    fn apply_power(
        &mut self,
        signal: &[f64],
        sample_rate: f64,
        base_frequency: f64,
        num_harmonics: usize,
    ) -> FilterOutcome {
        let nyquist = sample_rate * 0.5;
        let mut output = signal.to_vec();
        let mut skipped_notches = Vec::new();
        for h in 2..=num_harmonics {
            let centre = h as f64 * base_frequency;
            if centre >= nyquist {
                skipped_notches.push(centre);
                continue;
            }
            let notch = design_notch(centre, sample_rate, self.settings.notch_q);
            output = apply_zero_phase(&notch, &output);
        }
        match &mut self.influence {
            InfluenceSource::Fixed(gain) => {
                let scale = 1.0 + 0.1 * *gain;
                for v in output.iter_mut() {
                    *v *= scale;
                }
            }
            InfluenceSource::Seeded { rng, amplitude } => {
                for v in output.iter_mut() {
                    let influence = *amplitude * rng.gen::<f64>();
                    *v *= 1.0 + 0.1 * influence;
                }
            }
        }
        FilterOutcome {
            output,
            skipped_notches,
        }
    }

    fn apply_vibration(&self, signal: &[f64], sample_rate: f64, base_frequency: f64) -> Vec<f64> {
        let requested = self.settings.low_pass_cutoff_ratio * base_frequency;
        let cutoff = requested.min(sample_rate * 0.49);
        if cutoff < requested {
            debug!("low-pass cutoff {requested:.2} Hz clamped to {cutoff:.2} Hz");
        }
        let low_pass = design_low_pass(cutoff, sample_rate, self.settings.low_pass_order);
        apply_zero_phase(&low_pass, signal)
    }
}
