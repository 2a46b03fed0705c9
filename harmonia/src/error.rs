//! Error type shared by every stage of the balancing pipeline.

use thiserror::Error;

/// Failures raised by the balancing core.
#[derive(Debug, Error)]
pub enum BalanceError {
    /// The dominant bin of the spectrum is DC or has no energy, so THD has
    /// no fundamental to normalise against.
    #[error("degenerate spectrum: fundamental bin {bin} has magnitude {magnitude:e}")]
    DegenerateSpectrum { bin: usize, magnitude: f64 },
    /// Input rejected before any processing started.
    #[error("invalid signal: {reason}")]
    InvalidSignal { reason: String },
    /// The phase search produced a non-finite objective value.
    #[error("phase optimizer diverged after {evaluations} evaluations")]
    OptimizerDivergence { evaluations: usize },
    /// Unsupported or out-of-range configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("fft failed: {0}")]
    Fft(#[from] realfft::FftError),
}

impl BalanceError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        BalanceError::InvalidSignal {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BalanceError>;
