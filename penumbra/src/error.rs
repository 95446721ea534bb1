//! Error type shared by every detection stage.

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the detection stages.
///
/// All of them are local and deterministic: the same inputs fail the same way,
/// so a caller may retry with adjusted parameters without cleanup.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Unknown mask flag '{0}'")]
    MissingFlag(String),

    #[error("Unknown catalog field '{0}'")]
    UnknownField(String),

    #[error("Insufficient calibration data: {0}")]
    InsufficientCalibrationData(String),

    #[error("Catalog schema mismatch: expected columns {expected:?}, got {actual:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("Row {row} has no sky position")]
    MissingSkyPosition { row: usize },

    #[error("Malformed value '{value}' in column '{column}' at row {row}")]
    MalformedValue {
        row: usize,
        column: String,
        value: String,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to load config: {0}")]
    Config(#[from] common::FileFormatError),
}

impl Error {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    pub(crate) fn shape(
        what: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    ) -> Self {
        Error::ShapeMismatch {
            what,
            expected,
            actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_message() {
        let err = Error::shape("mask", (10, 20), (10, 21));
        assert_eq!(
            err.to_string(),
            "Shape mismatch for mask: expected (10, 20), got (10, 21)"
        );
    }

    #[test]
    fn test_invalid_parameter_message() {
        let err = Error::invalid("box_size", "must be >= 1");
        assert_eq!(
            err.to_string(),
            "Invalid parameter 'box_size': must be >= 1"
        );
    }
}
