//! Per-balancer event sink.
//!
//! Each balancer owns its observer, so two balancers never share logging
//! state. `LogObserver` forwards to the `log` facade and is the default.

use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::optimizer::StopReason;

/// Something worth reporting that happened inside `balance_signal`.
#[derive(Clone, Debug, PartialEq)]
pub enum BalanceEvent {
    /// The tracker moved the base frequency.
    DriftConfirmed { previous: f64, detected: f64 },
    /// The phase search finished normally.
    PhaseSearchFinished {
        iterations: usize,
        evaluations: usize,
        objective: f64,
        stop: StopReason,
    },
    /// The phase search failed; the previous phase vector was kept.
    OptimizerFallback { reason: String },
    /// A power notch would have been at or above Nyquist.
    NotchSkipped { frequency: f64, nyquist: f64 },
    /// One call finished and its history record was appended.
    CallCompleted {
        thd: Option<f64>,
        base_frequency: f64,
        frequency_drift: f64,
    },
}

pub trait BalanceObserver: Send {
    fn on_event(&mut self, event: &BalanceEvent);
}

/// Forwards events to the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogObserver;

impl BalanceObserver for LogObserver {
    fn on_event(&mut self, event: &BalanceEvent) {
        match event {
            BalanceEvent::DriftConfirmed { previous, detected } => {
                info!(
                    "Frequency drift detected: {:.2} Hz ({previous:.2} -> {detected:.2})",
                    detected - previous
                );
            }
            BalanceEvent::PhaseSearchFinished {
                iterations,
                evaluations,
                objective,
                stop,
            } => {
                debug!("phase search {stop:?}: {iterations} iterations, {evaluations} evaluations, cost {objective:.6}");
            }
            BalanceEvent::OptimizerFallback { reason } => {
                warn!("phase search failed, keeping previous phases: {reason}");
            }
            BalanceEvent::NotchSkipped { frequency, nyquist } => {
                warn!("notch at {frequency:.1} Hz skipped (Nyquist {nyquist:.1} Hz)");
            }
            BalanceEvent::CallCompleted {
                thd,
                base_frequency,
                frequency_drift,
            } => match thd {
                Some(thd) => debug!(
                    "balanced: THD {:.3}% at {base_frequency:.2} Hz (drift {frequency_drift:+.3} Hz)",
                    thd * 100.0
                ),
                None => debug!("balanced: THD undefined at {base_frequency:.2} Hz"),
            },
        }
    }
}

/// Drops every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullObserver;

impl BalanceObserver for NullObserver {
    fn on_event(&mut self, _event: &BalanceEvent) {}
}

/// Keeps every event. Clones share the same buffer, so a handle kept by the
/// caller sees what the balancer's copy recorded.
#[derive(Clone, Debug, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<BalanceEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BalanceEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl BalanceObserver for RecordingObserver {
    fn on_event(&mut self, event: &BalanceEvent) {
        let mut events = match self.events.lock() {
            Ok(events) => events,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.push(event.clone());
    }
}
