//! Dataset loading errors

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("I/O error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Dataset {path:?} is empty")]
    Empty { path: PathBuf },

    #[error("Parse error in {path:?}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Limit exceeded: {limit} is {limit_value}, dataset has {actual}")]
    LimitExceeded {
        limit: &'static str,
        limit_value: u64,
        actual: u64,
    },

    #[error("Invalid {record} record {id:?}: {reason}")]
    InvalidRecord {
        record: &'static str,
        id: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, ScheduleError>;

impl ScheduleError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn invalid_record(
        record: &'static str,
        id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidRecord {
            record,
            id: id.into(),
            reason: reason.into(),
        }
    }
}
