//! Second-order filter sections.
//!
//! Every filter the balancer applies is a cascade of these sections. The
//! coefficients follow the RBJ cookbook forms (notch and low-pass), plus a
//! bilinear first-order low-pass used for odd Butterworth orders. A section
//! is described by its normalised coefficients; running state lives in
//! `SectionState` so the same coefficients can be run forwards and backwards.

use std::f64::consts::PI;

/// Normalised coefficients of one section (`a0 == 1`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Biquad {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Biquad {
    /// Notch centred at `frequency` with quality factor `q`. Any centre
    /// below Nyquist is honoured.
    pub fn notch(sample_rate: f64, frequency: f64, q: f64) -> Self {
        let (sin_w0, cos_w0) = angular(sample_rate, notch_frequency(frequency, sample_rate));
        let alpha = sin_w0 / (2.0 * sanitize_q(q));
        Self::normalize(1.0, -2.0 * cos_w0, 1.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
    }

    /// Second-order low-pass with cutoff `frequency` and pole quality `q`.
    pub fn low_pass(sample_rate: f64, frequency: f64, q: f64) -> Self {
        let (sin_w0, cos_w0) = angular(sample_rate, sanitize_frequency(frequency, sample_rate));
        let alpha = sin_w0 / (2.0 * sanitize_q(q));
        let b1 = 1.0 - cos_w0;
        Self::normalize(
            b1 * 0.5,
            b1,
            b1 * 0.5,
            1.0 + alpha,
            -2.0 * cos_w0,
            1.0 - alpha,
        )
    }

    /// First-order low-pass from the bilinear transform of `1 / (s + 1)`.
    pub fn first_order_low_pass(sample_rate: f64, frequency: f64) -> Self {
        let frequency = sanitize_frequency(frequency, sample_rate);
        let k = (PI * frequency / sample_rate).tan();
        Self::normalize(k, k, 0.0, 1.0 + k, k - 1.0, 0.0)
    }

    /// Gain for a constant input, `H(z = 1)`.
    pub fn dc_gain(&self) -> f64 {
        let den = 1.0 + self.a1 + self.a2;
        if den.abs() < 1e-15 {
            return 0.0;
        }
        (self.b0 + self.b1 + self.b2) / den
    }

    /// Largest pole radius. Values close to 1 mean a long-ringing section.
    pub fn pole_radius(&self) -> f64 {
        let disc = self.a1 * self.a1 - 4.0 * self.a2;
        if disc < 0.0 {
            self.a2.abs().sqrt()
        } else {
            let root = disc.sqrt();
            ((-self.a1 + root) * 0.5)
                .abs()
                .max(((-self.a1 - root) * 0.5).abs())
        }
    }

    /// Delay-line contents after a long run of constant input `x`, so a
    /// filter started in this state produces no step transient.
    pub fn steady_state(&self, x: f64) -> SectionState {
        let y = self.dc_gain() * x;
        let z2 = self.b2 * x - self.a2 * y;
        let z1 = self.b1 * x - self.a1 * y + z2;
        SectionState { z1, z2 }
    }

    /// Process one sample (transposed direct form II).
    #[inline]
    pub fn process(&self, state: &mut SectionState, input: f64) -> f64 {
        let out = self.b0 * input + state.z1;
        state.z1 = self.b1 * input + state.z2 - self.a1 * out;
        state.z2 = self.b2 * input - self.a2 * out;
        out
    }

    /// Run the section over `samples` in place starting from `state`.
    pub fn process_inplace(&self, state: &mut SectionState, samples: &mut [f64]) {
        for v in samples.iter_mut() {
            *v = self.process(state, *v);
        }
    }

    /// Magnitude response at `frequency`.
    pub fn magnitude_at(&self, sample_rate: f64, frequency: f64) -> f64 {
        let w = 2.0 * PI * frequency / sample_rate;
        let (c1, s1) = (w.cos(), -w.sin());
        let (c2, s2) = ((2.0 * w).cos(), -(2.0 * w).sin());
        let num_re = self.b0 + self.b1 * c1 + self.b2 * c2;
        let num_im = self.b1 * s1 + self.b2 * s2;
        let den_re = 1.0 + self.a1 * c1 + self.a2 * c2;
        let den_im = self.a1 * s1 + self.a2 * s2;
        ((num_re * num_re + num_im * num_im) / (den_re * den_re + den_im * den_im).max(1e-300))
            .sqrt()
    }

    /// Normalize the filter coefficients by dividing by a0.
    fn normalize(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        let a0 = if a0.abs() < 1e-12 { 1.0 } else { a0 };
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Delay elements of a running section.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SectionState {
    pub z1: f64,
    pub z2: f64,
}

fn angular(sample_rate: f64, frequency: f64) -> (f64, f64) {
    let omega = 2.0 * PI * frequency / sample_rate.max(f64::MIN_POSITIVE);
    (omega.sin(), omega.cos())
}

/// Clamp a cutoff to `[fs * 1e-6, 0.49 fs]`, away from the bilinear warp
/// singularity at Nyquist.
fn sanitize_frequency(freq: f64, sample_rate: f64) -> f64 {
    let nyquist = sample_rate * 0.49;
    let floor = sample_rate * 1e-6;
    freq.clamp(floor, nyquist.max(floor))
}

/// Clamp a notch centre strictly inside (0, Nyquist).
fn notch_frequency(freq: f64, sample_rate: f64) -> f64 {
    let floor = sample_rate * 1e-6;
    let ceiling = sample_rate * 0.5 - floor;
    freq.clamp(floor, ceiling.max(floor))
}

fn sanitize_q(q: f64) -> f64 {
    q.clamp(0.1, 500.0)
}
