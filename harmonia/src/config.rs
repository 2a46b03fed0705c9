//! Balancer configuration.
//!
//! Every field has a default, so a JSON file only needs the values it wants
//! to change:
//!
//! ```json
//! { "application": "vibration", "base_frequency": 50.0, "history_capacity": 64 }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BalanceError, Result};
use crate::optimizer::{OptimizerConfig, GOLDEN_RATIO};
use crate::policy::{Application, CouplingInfluence, PolicySettings};
use crate::synth::ResonanceModel;

/// Which balancing algorithm `balance_signal` runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceMode {
    /// Phase search, correction and application filtering.
    #[default]
    Optimized,
    /// Per-harmonic phase rotation of spectral bins, no search.
    SpectralMask,
}

/// Starting phase vector of a new balancer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InitialPhase {
    #[default]
    Zeros,
    /// Uniform in `[0, 2π)` from a seeded stream.
    Seeded { seed: u64 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    pub base_frequency: f64,
    pub num_harmonics: usize,
    pub application: Application,
    pub mode: BalanceMode,
    /// Retained history records, `0` keeps every record.
    pub history_capacity: usize,
    pub drift_tolerance_hz: f64,
    /// Tracking band half-width as a fraction of the current estimate.
    pub tracking_band: f64,
    pub peak_threshold_ratio: f64,
    pub notch_q: f64,
    pub low_pass_order: usize,
    pub low_pass_cutoff_ratio: f64,
    pub influence: CouplingInfluence,
    /// Amplitude model of the correction waveform.
    pub resonance: ResonanceModel,
    pub optimizer: OptimizerConfig,
    pub golden_target: f64,
    pub initial_phase: InitialPhase,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            base_frequency: 60.0,
            num_harmonics: 5,
            application: Application::Power,
            mode: BalanceMode::Optimized,
            history_capacity: 1024,
            drift_tolerance_hz: 0.1,
            tracking_band: 0.2,
            peak_threshold_ratio: 0.1,
            notch_q: 30.0,
            low_pass_order: 4,
            low_pass_cutoff_ratio: 2.0,
            influence: CouplingInfluence::default(),
            resonance: ResonanceModel::default(),
            optimizer: OptimizerConfig::default(),
            golden_target: GOLDEN_RATIO,
            initial_phase: InitialPhase::Zeros,
        }
    }
}

impl BalancerConfig {
    /// Starting point for `application`. Both share the tracker and ladder
    /// defaults; only the post-filter differs.
    pub fn preset(application: Application) -> Self {
        Self {
            application,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BalanceError::Configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|e| {
            BalanceError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&data)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| BalanceError::Configuration(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, value: f64) -> Result<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(BalanceError::Configuration(format!(
                    "{name} must be positive, got {value}"
                )))
            }
        }

        positive("base_frequency", self.base_frequency)?;
        if self.num_harmonics == 0 {
            return Err(BalanceError::Configuration(
                "num_harmonics must be at least 1".into(),
            ));
        }
        if !(self.drift_tolerance_hz.is_finite() && self.drift_tolerance_hz >= 0.0) {
            return Err(BalanceError::Configuration(format!(
                "drift_tolerance_hz must be non-negative, got {}",
                self.drift_tolerance_hz
            )));
        }
        if !(self.tracking_band > 0.0 && self.tracking_band < 1.0) {
            return Err(BalanceError::Configuration(format!(
                "tracking_band must be in (0, 1), got {}",
                self.tracking_band
            )));
        }
        if !(self.peak_threshold_ratio >= 0.0 && self.peak_threshold_ratio < 1.0) {
            return Err(BalanceError::Configuration(format!(
                "peak_threshold_ratio must be in [0, 1), got {}",
                self.peak_threshold_ratio
            )));
        }
        positive("notch_q", self.notch_q)?;
        if self.low_pass_order == 0 {
            return Err(BalanceError::Configuration(
                "low_pass_order must be at least 1".into(),
            ));
        }
        positive("low_pass_cutoff_ratio", self.low_pass_cutoff_ratio)?;
        if !self.golden_target.is_finite() {
            return Err(BalanceError::Configuration(
                "golden_target must be finite".into(),
            ));
        }
        positive("optimizer.step", self.optimizer.step)?;
        let r = &self.resonance;
        if ![r.drive, r.stiffness, r.mass, r.damping].iter().all(|v| v.is_finite()) {
            return Err(BalanceError::Configuration(
                "resonance constants must be finite".into(),
            ));
        }
        match self.influence {
            CouplingInfluence::Fixed { gain } if !gain.is_finite() => Err(
                BalanceError::Configuration("influence gain must be finite".into()),
            ),
            CouplingInfluence::Seeded { amplitude, .. } if !amplitude.is_finite() => Err(
                BalanceError::Configuration("influence amplitude must be finite".into()),
            ),
            _ => Ok(()),
        }
    }

    pub(crate) fn policy_settings(&self) -> PolicySettings {
        PolicySettings {
            notch_q: self.notch_q,
            low_pass_order: self.low_pass_order,
            low_pass_cutoff_ratio: self.low_pass_cutoff_ratio,
        }
    }
}
