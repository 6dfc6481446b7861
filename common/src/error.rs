use thiserror::Error;

/// Failure of a single acquisition or boot step. Never fatal to a wake cycle:
/// callers log it and fall back to a default value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    #[error("transient I/O failure: {0}")]
    TransientIo(String),
    #[error("configuration missing: {0}")]
    ConfigurationMissing(&'static str),
    #[error("not applicable: {0}")]
    NotApplicable(&'static str),
    #[error("lookup rejected: {0}")]
    Lookup(String),
}

impl StepError {
    pub fn io(err: impl core::fmt::Display) -> Self {
        Self::TransientIo(err.to_string())
    }
}

impl From<serde_json::Error> for StepError {
    fn from(err: serde_json::Error) -> Self {
        Self::TransientIo(format!("malformed document: {err}"))
    }
}

pub type StepResult<T> = Result<T, StepError>;
