//! Controller Error Types
//!
//! | Error | Raised by | Recoverable |
//! |-------|-----------|-------------|
//! | `DatasetLoad` | `init_schedule` | No (previous schedule kept) |
//! | `UnknownModule`, `DuplicatePath`, `Configuration` | `init_modules` | No, abort startup |
//! | `NoHandler`, `AmbiguousTarget` | `call` | Yes, per call |
//! | `RemoteUnavailable`, `RemoteFailure` | `call` to a remote path | Caller's policy |
//! | `ScheduleNotLoaded`, `Handler` | handler execution | Yes, per call |

use network::TransportError;
use schedule::ScheduleError;
use thiserror::Error;
use types::{ErrorPayload, TypeMismatch};

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Dataset load failed: {0}")]
    DatasetLoad(#[from] ScheduleError),

    #[error("Unknown module: {name}")]
    UnknownModule { name: String },

    #[error("Duplicate path {path}: already registered by {existing}, rejected from {rejected}")]
    DuplicatePath {
        path: String,
        existing: String,
        rejected: String,
    },

    #[error("Configuration error in module {module}: {message}")]
    Configuration { module: String, message: String },

    #[error("No handler for {path}")]
    NoHandler { path: String },

    #[error("Ambiguous target {path}: served by remotes {remotes:?}")]
    AmbiguousTarget { path: String, remotes: Vec<String> },

    #[error("Remote {remote} unavailable: {reason}")]
    RemoteUnavailable { remote: String, reason: String },

    #[error("Remote {remote} failed ({kind}): {message}")]
    RemoteFailure {
        remote: String,
        kind: String,
        message: String,
    },

    #[error("Schedule not loaded")]
    ScheduleNotLoaded,

    #[error("Handler for {path} failed: {message}")]
    Handler { path: String, message: String },

    #[error("Runtime error: {message}")]
    Runtime { message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, ControllerError>;

impl ControllerError {
    pub fn handler(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Handler {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn configuration(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            module: module.into(),
            message: message.into(),
        }
    }

    pub fn remote_unavailable(remote: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RemoteUnavailable {
            remote: remote.into(),
            reason: reason.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// Stable identifier used when the error crosses the wire
    pub fn kind(&self) -> &'static str {
        match self {
            ControllerError::DatasetLoad(_) => "dataset_load",
            ControllerError::UnknownModule { .. } => "unknown_module",
            ControllerError::DuplicatePath { .. } => "duplicate_path",
            ControllerError::Configuration { .. } => "configuration",
            ControllerError::NoHandler { .. } => "no_handler",
            ControllerError::AmbiguousTarget { .. } => "ambiguous_target",
            ControllerError::RemoteUnavailable { .. } => "remote_unavailable",
            ControllerError::RemoteFailure { .. } => "remote_failure",
            ControllerError::ScheduleNotLoaded => "schedule_not_loaded",
            ControllerError::Handler { .. } => "handler",
            ControllerError::Runtime { .. } => "runtime",
            ControllerError::Transport(_) => "transport",
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload::new(self.kind(), self.to_string())
    }

    pub(crate) fn from_payload(remote: &str, payload: ErrorPayload) -> Self {
        Self::RemoteFailure {
            remote: remote.to_string(),
            kind: payload.kind,
            message: payload.message,
        }
    }

    /// Per-call failures the caller may act on, as opposed to wiring bugs
    pub fn is_per_call(&self) -> bool {
        !matches!(
            self,
            ControllerError::DatasetLoad(_)
                | ControllerError::UnknownModule { .. }
                | ControllerError::DuplicatePath { .. }
                | ControllerError::Configuration { .. }
        )
    }
}

impl From<TypeMismatch> for ControllerError {
    fn from(err: TypeMismatch) -> Self {
        Self::Handler {
            path: err.target.clone(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ContentType;

    #[test]
    fn test_payload_round_trip_keeps_kind() {
        let err = ControllerError::NoHandler { path: "/x".into() };
        let payload = err.to_payload();
        assert_eq!(payload.kind, "no_handler");

        match ControllerError::from_payload("peer:1", payload) {
            ControllerError::RemoteFailure { remote, kind, message } => {
                assert_eq!(remote, "peer:1");
                assert_eq!(kind, "no_handler");
                assert!(message.contains("/x"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_type_mismatch_becomes_handler_error() {
        let err: ControllerError = TypeMismatch {
            target: "/address".into(),
            expected: ContentType::AddressRequest,
            actual: ContentType::Empty,
        }
        .into();
        assert!(matches!(err, ControllerError::Handler { ref path, .. } if path == "/address"));
        assert!(err.is_per_call());
        assert!(!ControllerError::UnknownModule { name: "x".into() }.is_per_call());
    }
}
