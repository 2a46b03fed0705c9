//! Closed-form Butterworth low-pass design.
//!
//! An order-`n` Butterworth low-pass is a cascade of `n / 2` second-order
//! sections whose pole pairs sit on the Butterworth circle, plus one
//! first-order section when `n` is odd. Pair `k` sits at angle
//! `π (n - 1 - 2k) / (2n)` from the negative real axis and gets the quality
//! factor `1 / (2 cos(angle))`; combined with the prewarped RBJ low-pass this
//! is exactly the bilinear transform of the analogue prototype.

use std::f64::consts::PI;

use super::biquad::Biquad;

/// Sections of an order-`order` Butterworth low-pass at `cutoff` Hz.
pub fn butterworth_low_pass(order: usize, cutoff: f64, sample_rate: f64) -> Vec<Biquad> {
    let mut sections = Vec::with_capacity(order / 2 + order % 2);
    for k in 0..order / 2 {
        sections.push(Biquad::low_pass(sample_rate, cutoff, section_q(order, k)));
    }
    if order % 2 == 1 {
        sections.push(Biquad::first_order_low_pass(sample_rate, cutoff));
    }
    sections
}

/// Quality factor of the `k`-th pole pair of an order-`order` prototype.
fn section_q(order: usize, k: usize) -> f64 {
    let theta = PI * (order - 1 - 2 * k) as f64 / (2 * order) as f64;
    1.0 / (2.0 * theta.cos())
}
