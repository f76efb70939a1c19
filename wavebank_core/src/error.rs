use thiserror::Error;

/// Errors surfaced synchronously by constructors, setters and the control handle.
///
/// The render path never produces one of these.
#[derive(Debug, Error)]
pub enum SynthError {
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    #[error("failed to parse configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("render engine is no longer receiving commands")]
    EngineDisconnected,

    #[error("command queue is full ({capacity} pending)")]
    CommandQueueFull { capacity: usize },
}

pub type Result<T> = std::result::Result<T, SynthError>;

impl SynthError {
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        SynthError::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, SynthError::InvalidArgument { .. })
    }
}

/// Reject negative or non-finite millisecond durations.
pub fn check_duration_ms(name: &'static str, value: f32) -> Result<f32> {
    if !value.is_finite() || value < 0.0 {
        return Err(SynthError::invalid(
            name,
            format!("duration must be a non-negative number of milliseconds, got {value}"),
        ));
    }
    Ok(value)
}

/// Reject sample rates that are zero, negative or non-finite.
pub fn check_sample_rate(sample_rate: f32) -> Result<f32> {
    if !sample_rate.is_finite() || sample_rate <= 0.0 {
        return Err(SynthError::invalid(
            "sample_rate",
            format!("sample rate must be positive, got {sample_rate}"),
        ));
    }
    Ok(sample_rate)
}

/// Reject levels outside the unit interval.
pub fn check_unit_level(name: &'static str, value: f32) -> Result<f32> {
    if !(0.0..=1.0).contains(&value) {
        return Err(SynthError::invalid(
            name,
            format!("level must lie in [0, 1], got {value}"),
        ));
    }
    Ok(value)
}
