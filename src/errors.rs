use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum HistBoostError {
    #[error("invalid parameter {parameter}: {reason}")]
    InvalidParameter { parameter: String, reason: String },

    #[error("column {column}: cardinality exceeds max_bins = {max_bins}")]
    CardinalityOverflow { column: usize, max_bins: usize },

    #[error("column {column}: unknown category {value}")]
    UnknownCategory { column: usize, value: i32 },

    #[error("invalid discretizer layout: {0}")]
    InvalidDiscretizer(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),
}

impl HistBoostError {
    pub fn invalid_parameter(parameter: &str, reason: impl Into<String>) -> Self {
        HistBoostError::InvalidParameter {
            parameter: parameter.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for HistBoostError {
    fn from(err: serde_json::Error) -> Self {
        HistBoostError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for HistBoostError {
    fn from(err: std::io::Error) -> Self {
        HistBoostError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HistBoostError>;
