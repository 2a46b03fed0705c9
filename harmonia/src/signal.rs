//! Input validation and synthetic harmonic signals.

use std::f64::consts::PI;

use crate::error::{BalanceError, Result};

/// Reject buffers the pipeline cannot process: fewer than two samples,
/// non-finite samples, or a non-positive sample rate.
pub fn validate(signal: &[f64], sample_rate: f64) -> Result<()> {
    if !(sample_rate.is_finite() && sample_rate > 0.0) {
        return Err(BalanceError::invalid(format!(
            "sample rate must be positive, got {sample_rate}"
        )));
    }
    if signal.len() < 2 {
        return Err(BalanceError::invalid(format!(
            "need at least 2 samples, got {}",
            signal.len()
        )));
    }
    if let Some(idx) = signal.iter().position(|v| !v.is_finite()) {
        return Err(BalanceError::invalid(format!(
            "non-finite sample at index {idx}"
        )));
    }
    Ok(())
}

/// Sample times `n / sample_rate` for a buffer of `len` samples.
pub fn time_axis(len: usize, sample_rate: f64) -> Vec<f64> {
    (0..len).map(|n| n as f64 / sample_rate).collect()
}

/// `sum_i amplitudes[i] * sin(2π fundamental (i + 1) t)` over
/// `round(duration * sample_rate)` samples.
pub fn harmonic_signal(
    duration: f64,
    sample_rate: f64,
    fundamental: f64,
    amplitudes: &[f64],
) -> Vec<f64> {
    let len = (duration * sample_rate).round().max(0.0) as usize;
    time_axis(len, sample_rate)
        .into_iter()
        .map(|t| {
            amplitudes
                .iter()
                .enumerate()
                .map(|(i, a)| a * (2.0 * PI * fundamental * (i + 1) as f64 * t).sin())
                .sum()
        })
        .collect()
}

/// Mean of `|x|`.
pub fn mean_abs(signal: &[f64]) -> f64 {
    if signal.is_empty() {
        return 0.0;
    }
    signal.iter().map(|v| v.abs()).sum::<f64>() / signal.len() as f64
}
