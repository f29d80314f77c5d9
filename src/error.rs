use thiserror::Error;

/// Errors raised by the prediction core.
///
/// Validation and availability failures are kept apart so the HTTP layer can
/// answer 400 and 503 respectively.
#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("invalid {field} '{value}'; valid values: {}", .valid.join(", "))]
    InvalidArgument {
        field: &'static str,
        value: String,
        valid: Vec<String>,
    },

    #[error("not ready: {0}")]
    Unavailable(String),

    #[error("oracle for {market} returned an invalid probability: {value}")]
    OracleOutput { market: String, value: f64 },

    #[error("model artifact {path}: {reason}")]
    Artifact { path: String, reason: String },

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl PredictionError {
    pub fn invalid<I, S>(field: &'static str, value: impl Into<String>, valid: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PredictionError::InvalidArgument {
            field,
            value: value.into(),
            valid: valid.into_iter().map(Into::into).collect(),
        }
    }
}

pub type PredictionResult<T> = std::result::Result<T, PredictionError>;
