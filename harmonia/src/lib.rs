//! Library crate for the `harmonia` project: adaptive harmonic balancing of
//! power and vibration waveforms.

pub mod balancer;
pub mod config;
pub mod dsp;
pub mod error;
pub mod history;
pub mod mask;
pub mod observer;
pub mod optimizer;
pub mod policy;
pub mod report;
pub mod signal;
pub mod synth;
pub mod thd;
pub mod tracker;

pub use balancer::HarmonicBalancer;
pub use config::{BalanceMode, BalancerConfig, InitialPhase};
pub use error::{BalanceError, Result};
pub use observer::{BalanceEvent, BalanceObserver, LogObserver, NullObserver, RecordingObserver};
pub use policy::{Application, CouplingInfluence};
pub use report::BalanceReport;
pub use thd::calculate_thd;
