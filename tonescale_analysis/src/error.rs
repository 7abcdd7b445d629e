use thiserror::Error;

/// Errors raised by the histogram, density and peak detection code.
///
/// The core fails fast: structural problems (mismatched shapes, out of range values on a
/// bounded histogram, nonsensical parameters) are reported instead of being coerced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// A value was added to a histogram that neither wraps nor ignores out of range values.
    #[error("value {value} lies outside of the histogram domain [{start}, {stop})")]
    OutOfRange { value: f64, start: f64, stop: f64 },

    /// Two operands of an elementwise operation do not share the same domain and resolution.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// The input carries no information for a statistic, e.g. zero variance.
    #[error("degenerate input: {0}")]
    DegenerateInput(&'static str),

    /// The upstream annotation source could not deliver annotations for a recording.
    #[error("annotation source failed: {0}")]
    Annotation(String),
}

impl AnalysisError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        AnalysisError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
