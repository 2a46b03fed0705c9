//! The harmonic balancer: owns the tracked state and runs one balancing pass
//! per call.
//!
//! A call tracks the fundamental on the raw input, searches the phase vector
//! (warm-started from the previous call), subtracts the synthesised
//! correction and hands the result to the application policy. The output THD
//! and the state after the call are appended to the history.

use std::f64::consts::TAU;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{BalanceMode, BalancerConfig, InitialPhase};
use crate::error::{BalanceError, Result};
use crate::history::{HistoryLog, HistoryRecord};
use crate::mask::spectral_mask;
use crate::observer::{BalanceEvent, BalanceObserver, LogObserver};
use crate::optimizer::{HarmonyObjective, PhaseOptimizer};
use crate::policy::{Application, ApplicationPolicy};
use crate::signal::validate;
use crate::synth::CorrectionSynthesizer;
use crate::thd;
use crate::tracker::{FrequencyTracker, HarmonicLadder};

/// Adaptive harmonic balancer.
///
/// Not meant to be shared between threads without a lock: every call mutates
/// the base frequency, phase vector and history.
pub struct HarmonicBalancer {
    config: BalancerConfig,
    ladder: HarmonicLadder,
    phases: Vec<f64>,
    history: HistoryLog,
    tracker: FrequencyTracker,
    synth: CorrectionSynthesizer,
    optimizer: PhaseOptimizer,
    policy: ApplicationPolicy,
    observer: Box<dyn BalanceObserver>,
}

impl HarmonicBalancer {
    /// Balancer with the preset for `application`.
    pub fn new(base_frequency: f64, num_harmonics: usize, application: Application) -> Result<Self> {
        Self::from_config(BalancerConfig {
            base_frequency,
            num_harmonics,
            ..BalancerConfig::preset(application)
        })
    }

    pub fn from_config(config: BalancerConfig) -> Result<Self> {
        config.validate()?;
        let ladder = HarmonicLadder::new(config.base_frequency, config.num_harmonics)?;
        let phases = match config.initial_phase {
            InitialPhase::Zeros => vec![0.0; config.num_harmonics],
            InitialPhase::Seeded { seed } => {
                let mut rng = StdRng::seed_from_u64(seed);
                (0..config.num_harmonics)
                    .map(|_| rng.gen_range(0.0..TAU))
                    .collect()
            }
        };
        Ok(Self {
            ladder,
            phases,
            history: HistoryLog::with_capacity(config.history_capacity),
            tracker: FrequencyTracker::new(
                config.tracking_band,
                config.drift_tolerance_hz,
                config.peak_threshold_ratio,
            ),
            synth: CorrectionSynthesizer::new(config.resonance),
            optimizer: PhaseOptimizer::new(config.optimizer.clone()),
            policy: ApplicationPolicy::new(
                config.application,
                config.policy_settings(),
                &config.influence,
            ),
            observer: Box::new(LogObserver),
            config,
        })
    }

    /// Replace the event sink.
    pub fn with_observer(mut self, observer: impl BalanceObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    pub fn application(&self) -> Application {
        self.policy.application()
    }

    pub fn mode(&self) -> BalanceMode {
        self.config.mode
    }

    pub fn base_frequency(&self) -> f64 {
        self.ladder.base_frequency()
    }

    pub fn num_harmonics(&self) -> usize {
        self.ladder.len()
    }

    pub fn ladder(&self) -> &HarmonicLadder {
        &self.ladder
    }

    pub fn phases(&self) -> &[f64] {
        &self.phases
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// THD of `signal` over this balancer's harmonic count. Does not touch
    /// any state.
    pub fn calculate_thd(&self, signal: &[f64], sample_rate: f64) -> Result<f64> {
        thd::calculate_thd(signal, sample_rate, self.ladder.len())
    }

    /// Balance `signal` and return a fresh buffer of the same length.
    pub fn balance_signal(&mut self, signal: &[f64], sample_rate: f64) -> Result<Vec<f64>> {
        validate(signal, sample_rate)?;

        let track = self.tracker.track(signal, sample_rate, &mut self.ladder)?;
        if track.drift_confirmed {
            self.observer.on_event(&BalanceEvent::DriftConfirmed {
                previous: track.previous,
                detected: track.detected,
            });
        }

        let (output, objective) = match self.config.mode {
            BalanceMode::Optimized => self.correct_and_filter(signal, sample_rate)?,
            BalanceMode::SpectralMask => {
                let output = spectral_mask(
                    signal,
                    sample_rate,
                    self.ladder.frequencies(),
                    &self.phases,
                    self.policy.application(),
                )?;
                (output, None)
            }
        };

        let thd = match self.calculate_thd(&output, sample_rate) {
            Ok(thd) => Some(thd),
            Err(BalanceError::DegenerateSpectrum { .. }) => None,
            Err(err) => return Err(err),
        };
        self.history.push(HistoryRecord {
            thd,
            phases: self.phases.clone(),
            frequency_drift: track.drift(),
            base_frequency: self.ladder.base_frequency(),
            objective,
        });
        self.observer.on_event(&BalanceEvent::CallCompleted {
            thd,
            base_frequency: self.ladder.base_frequency(),
            frequency_drift: track.drift(),
        });
        Ok(output)
    }

    /// Phase search, correction and policy filtering. A failed search keeps
    /// the previous phase vector.
    fn correct_and_filter(
        &mut self,
        signal: &[f64],
        sample_rate: f64,
    ) -> Result<(Vec<f64>, Option<f64>)> {
        let objective = HarmonyObjective::new(
            signal,
            sample_rate,
            &self.ladder,
            &self.synth,
            self.config.golden_target,
        );
        let cost = match self.optimizer.optimize(&objective, &self.phases) {
            Ok(outcome) => {
                self.observer.on_event(&BalanceEvent::PhaseSearchFinished {
                    iterations: outcome.iterations,
                    evaluations: outcome.evaluations,
                    objective: outcome.objective,
                    stop: outcome.stop,
                });
                self.phases = outcome.phases;
                Some(outcome.objective)
            }
            Err(err) => {
                self.observer.on_event(&BalanceEvent::OptimizerFallback {
                    reason: err.to_string(),
                });
                None
            }
        };

        let corrected =
            self.synth
                .balance(signal, sample_rate, self.ladder.frequencies(), &self.phases)?;
        let filtered = self.policy.apply(
            &corrected,
            sample_rate,
            self.ladder.base_frequency(),
            self.ladder.len(),
        );
        let nyquist = sample_rate * 0.5;
        for &frequency in &filtered.skipped_notches {
            self.observer
                .on_event(&BalanceEvent::NotchSkipped { frequency, nyquist });
        }
        Ok((filtered.output, cost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::spectrum::magnitude_spectrum;
    use crate::observer::RecordingObserver;
    use crate::signal::harmonic_signal;
    use crate::synth::ResonanceModel;

    const FS: f64 = 1000.0;

    fn reference_signal() -> Vec<f64> {
        harmonic_signal(1.0, FS, 60.0, &[1.0, 0.5, 0.3])
    }

    #[test]
    fn power_balancing_lowers_thd_and_harmonics() {
        let signal = reference_signal();
        let mut balancer = HarmonicBalancer::new(60.0, 5, Application::Power).unwrap();
        let output = balancer.balance_signal(&signal, FS).unwrap();
        assert_eq!(output.len(), signal.len());

        let before = balancer.calculate_thd(&signal, FS).unwrap();
        let after = balancer.calculate_thd(&output, FS).unwrap();
        assert!(after < before, "THD {before} -> {after}");

        let spec_in = magnitude_spectrum(&signal).unwrap();
        let spec_out = magnitude_spectrum(&output).unwrap();
        assert!(spec_out[120] < spec_in[120]);
        assert!(spec_out[180] < spec_in[180]);

        let record = balancer.history().latest().unwrap();
        assert_eq!(record.thd, Some(after));
        assert_eq!(record.phases, balancer.phases());
        assert!(record.frequency_drift.abs() < 1e-6);
        assert!(record.objective.is_some());
    }

    #[test]
    fn vibration_and_power_outputs_differ() {
        let signal = reference_signal();
        let power = HarmonicBalancer::new(60.0, 5, Application::Power)
            .unwrap()
            .balance_signal(&signal, FS)
            .unwrap();
        let vibration = HarmonicBalancer::new(60.0, 5, Application::Vibration)
            .unwrap()
            .balance_signal(&signal, FS)
            .unwrap();
        assert_eq!(power.len(), vibration.len());
        let diff: f64 = power.iter().zip(&vibration).map(|(a, b)| (a - b).abs()).sum();
        assert!(diff > 1.0);
    }

    #[test]
    fn repeated_calls_do_not_raise_thd() {
        let signal = harmonic_signal(1.0, FS, 60.0, &[1.0]);
        let mut balancer = HarmonicBalancer::new(60.0, 5, Application::Power).unwrap();
        balancer.balance_signal(&signal, FS).unwrap();
        balancer.balance_signal(&signal, FS).unwrap();
        let series = balancer.history().thd_series();
        let (first, second) = (series[0].unwrap(), series[1].unwrap());
        assert!(second <= first + 1e-6, "{first} -> {second}");
    }

    #[test]
    fn output_length_matches_input_across_durations() {
        let config = BalancerConfig {
            optimizer: crate::optimizer::OptimizerConfig {
                max_evaluations: 200,
                ..Default::default()
            },
            ..BalancerConfig::default()
        };
        for application in Application::all() {
            let mut balancer = HarmonicBalancer::from_config(BalancerConfig {
                application,
                ..config.clone()
            })
            .unwrap()
            .with_observer(crate::observer::NullObserver);
            for duration in [0.01, 0.1, 1.0, 10.0] {
                let signal = harmonic_signal(duration, FS, 60.0, &[1.0, 0.5, 0.3]);
                let output = balancer.balance_signal(&signal, FS).unwrap();
                assert_eq!(output.len(), signal.len());
                assert!(output.iter().all(|v| v.is_finite()));
            }
        }
    }

    #[test]
    fn second_harmonic_signal_does_not_move_base() {
        let signal = harmonic_signal(1.0, FS, 120.0, &[1.0]);
        let mut balancer = HarmonicBalancer::new(60.0, 5, Application::Power).unwrap();
        balancer.balance_signal(&signal, FS).unwrap();
        assert_eq!(balancer.base_frequency(), 60.0);
        assert_eq!(balancer.ladder().frequencies()[1], 120.0);
    }

    #[test]
    fn small_drift_keeps_base_for_both_applications() {
        // 10 s at 1 kHz gives 0.1 Hz bins, enough to resolve a 0.07 Hz offset.
        let signal = harmonic_signal(10.0, FS, 60.07, &[1.0]);
        for application in Application::all() {
            let events = RecordingObserver::new();
            let mut balancer = HarmonicBalancer::new(60.0, 5, application)
                .unwrap()
                .with_observer(events.clone());
            balancer.balance_signal(&signal, FS).unwrap();
            assert_eq!(balancer.base_frequency(), 60.0, "{application:?}");
            assert!(!events
                .events()
                .iter()
                .any(|e| matches!(e, BalanceEvent::DriftConfirmed { .. })));
        }
    }

    #[test]
    fn in_band_drift_retunes_and_is_reported() {
        let events = RecordingObserver::new();
        let signal = harmonic_signal(1.0, FS, 62.0, &[1.0, 0.2]);
        let mut balancer = HarmonicBalancer::new(60.0, 3, Application::Power)
            .unwrap()
            .with_observer(events.clone());
        balancer.balance_signal(&signal, FS).unwrap();

        assert!((balancer.base_frequency() - 62.0).abs() < 1e-6);
        assert!((balancer.ladder().frequencies()[2] - 186.0).abs() < 1e-5);
        let record = balancer.history().latest().unwrap();
        assert!((record.frequency_drift - 2.0).abs() < 1e-6);

        let events = events.events();
        assert!(matches!(
            events.first(),
            Some(BalanceEvent::DriftConfirmed { previous, .. }) if *previous == 60.0
        ));
        assert!(matches!(events.last(), Some(BalanceEvent::CallCompleted { .. })));
    }

    #[test]
    fn constant_input_falls_back_and_records_undefined_thd() {
        let events = RecordingObserver::new();
        let signal = vec![1.0; 1000];
        let mut balancer = HarmonicBalancer::new(60.0, 5, Application::Power)
            .unwrap()
            .with_observer(events.clone());
        assert!(matches!(
            balancer.calculate_thd(&signal, FS),
            Err(BalanceError::DegenerateSpectrum { .. })
        ));

        let output = balancer.balance_signal(&signal, FS).unwrap();
        assert_eq!(output.len(), signal.len());
        assert_eq!(balancer.phases(), &[0.0; 5]);
        let record = balancer.history().latest().unwrap();
        assert_eq!(record.thd, None);
        assert_eq!(record.objective, None);
        assert!(events
            .events()
            .iter()
            .any(|e| matches!(e, BalanceEvent::OptimizerFallback { .. })));
    }

    #[test]
    fn all_zero_input_is_balanced_but_has_no_thd() {
        let signal = vec![0.0; 500];
        let mut balancer = HarmonicBalancer::new(60.0, 5, Application::Vibration).unwrap();
        assert!(matches!(
            balancer.calculate_thd(&signal, FS),
            Err(BalanceError::DegenerateSpectrum { .. })
        ));
        let output = balancer.balance_signal(&signal, FS).unwrap();
        assert_eq!(output.len(), 500);
        assert_eq!(balancer.base_frequency(), 60.0);
        assert_eq!(balancer.history().len(), 1);
    }

    #[test]
    fn invalid_input_is_rejected_before_state_changes() {
        let mut balancer = HarmonicBalancer::new(60.0, 5, Application::Power).unwrap();
        assert!(matches!(
            balancer.balance_signal(&[1.0], FS),
            Err(BalanceError::InvalidSignal { .. })
        ));
        assert!(balancer.balance_signal(&[1.0, f64::NAN, 0.0], FS).is_err());
        assert!(balancer.balance_signal(&[1.0, 0.0], 0.0).is_err());
        assert!(balancer.history().is_empty());
    }

    #[test]
    fn skipped_notches_are_reported() {
        let events = RecordingObserver::new();
        let signal = harmonic_signal(0.5, FS, 150.0, &[1.0, 0.1]);
        let mut balancer = HarmonicBalancer::new(150.0, 5, Application::Power)
            .unwrap()
            .with_observer(events.clone());
        balancer.balance_signal(&signal, FS).unwrap();
        let skipped: Vec<f64> = events
            .events()
            .iter()
            .filter_map(|e| match e {
                BalanceEvent::NotchSkipped { frequency, .. } => Some(*frequency),
                _ => None,
            })
            .collect();
        assert_eq!(skipped, vec![600.0, 750.0]);
    }

    #[test]
    fn history_respects_capacity() {
        let signal = harmonic_signal(0.1, FS, 60.0, &[1.0, 0.2]);
        let mut balancer = HarmonicBalancer::from_config(BalancerConfig {
            history_capacity: 2,
            ..BalancerConfig::default()
        })
        .unwrap()
        .with_observer(crate::observer::NullObserver);
        for _ in 0..3 {
            balancer.balance_signal(&signal, FS).unwrap();
        }
        assert_eq!(balancer.history().len(), 2);
    }

    #[test]
    fn spectral_mask_mode_skips_search_and_filtering() {
        let signal = reference_signal();
        let mut balancer = HarmonicBalancer::from_config(BalancerConfig {
            mode: BalanceMode::SpectralMask,
            ..BalancerConfig::default()
        })
        .unwrap();
        let output = balancer.balance_signal(&signal, FS).unwrap();
        // Zero phases: the odd-harmonic rotation is the identity.
        for (a, b) in output.iter().zip(&signal) {
            assert!((a - b).abs() < 1e-9);
        }
        let record = balancer.history().latest().unwrap();
        assert_eq!(record.objective, None);
        assert!(record.thd.is_some());
    }

    #[test]
    fn seeded_initial_phases_are_reproducible() {
        let config = BalancerConfig {
            initial_phase: InitialPhase::Seeded { seed: 42 },
            ..BalancerConfig::default()
        };
        let a = HarmonicBalancer::from_config(config.clone()).unwrap();
        let b = HarmonicBalancer::from_config(config).unwrap();
        assert_eq!(a.phases(), b.phases());
        assert!(a.phases().iter().all(|p| (0.0..TAU).contains(p)));
        assert!(a.phases().iter().any(|&p| p != 0.0));
    }

    #[test]
    fn configured_resonance_drives_a_warm_started_search() {
        let events = RecordingObserver::new();
        let config = BalancerConfig {
            num_harmonics: 3,
            resonance: ResonanceModel {
                drive: 1.0,
                stiffness: 0.0,
                mass: 0.0,
                damping: 1.0 / (2.0 * std::f64::consts::PI * 6.0),
            },
            initial_phase: InitialPhase::Seeded { seed: 7 },
            ..BalancerConfig::default()
        };
        let mut balancer = HarmonicBalancer::from_config(config)
            .unwrap()
            .with_observer(events.clone());
        let initial = balancer.phases().to_vec();
        let signal = reference_signal();
        balancer.balance_signal(&signal, FS).unwrap();
        assert_ne!(balancer.phases(), initial.as_slice());
        balancer.balance_signal(&signal, FS).unwrap();

        let searches: Vec<(usize, f64)> = events
            .events()
            .iter()
            .filter_map(|e| match e {
                BalanceEvent::PhaseSearchFinished {
                    iterations,
                    objective,
                    ..
                } => Some((*iterations, *objective)),
                _ => None,
            })
            .collect();
        assert_eq!(searches.len(), 2);
        assert!(searches[0].0 > 0);
        assert!(searches[1].1 <= searches[0].1 + 1e-12);
    }

    #[test]
    fn balancers_can_move_between_threads() {
        fn assert_send<T: Send>() {}
        assert_send::<HarmonicBalancer>();

        let handles: Vec<_> = Application::all()
            .into_iter()
            .map(|application| {
                let mut balancer = HarmonicBalancer::new(60.0, 3, application)
                    .unwrap()
                    .with_observer(crate::observer::NullObserver);
                std::thread::spawn(move || {
                    let signal = harmonic_signal(0.2, FS, 60.0, &[1.0, 0.3]);
                    balancer.balance_signal(&signal, FS).unwrap();
                    balancer
                })
            })
            .collect();
        for handle in handles {
            let balancer = handle.join().unwrap();
            assert_eq!(balancer.history().len(), 1);
        }
    }

    #[test]
    fn invalid_construction_is_configuration_error() {
        assert!(matches!(
            HarmonicBalancer::new(0.0, 5, Application::Power),
            Err(BalanceError::Configuration(_))
        ));
        assert!(matches!(
            HarmonicBalancer::new(60.0, 0, Application::Vibration),
            Err(BalanceError::Configuration(_))
        ));
    }
}
