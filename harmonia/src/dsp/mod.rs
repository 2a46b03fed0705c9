//! Numerical primitives used by the balancer: spectra and zero-phase IIR filters.

pub mod biquad;
pub mod butterworth;
pub mod spectrum;
pub mod zero_phase;

use biquad::Biquad;

/// A designed filter: a cascade of sections applied in order.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterCoefficients {
    pub sections: Vec<Biquad>,
}

/// Band-reject filter centred at `center_freq` with the given quality factor.
pub fn design_notch(center_freq: f64, sample_rate: f64, quality_factor: f64) -> FilterCoefficients {
    FilterCoefficients {
        sections: vec![Biquad::notch(sample_rate, center_freq, quality_factor)],
    }
}

/// Butterworth low-pass of the given order.
pub fn design_low_pass(cutoff_freq: f64, sample_rate: f64, order: usize) -> FilterCoefficients {
    FilterCoefficients {
        sections: butterworth::butterworth_low_pass(order, cutoff_freq, sample_rate),
    }
}

/// Forward-backward filtering; the output has the input's length.
pub fn apply_zero_phase(coefficients: &FilterCoefficients, buffer: &[f64]) -> Vec<f64> {
    zero_phase::apply_zero_phase(&coefficients.sections, buffer)
}
