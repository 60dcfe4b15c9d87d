//! Error types for tether-core.

use std::time::Duration;

use thiserror::Error;

use crate::directive::DirectiveKind;

/// Result type for tether-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed transport-specific cause carried by [`Error::Unreachable`].
pub type TransportCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while evaluating a cell.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad directive arguments or malformed directive line.
    #[error("{0}")]
    Usage(String),

    /// No directive registered under this name.
    #[error("{kind} directive not defined: {name}")]
    DirectiveNotFound { name: String, kind: DirectiveKind },

    /// A directive with this name is already registered for its kind.
    #[error("duplicate {kind} directive: {name}")]
    DuplicateDirective { name: String, kind: DirectiveKind },

    /// Neither a current nor a default target could be resolved.
    #[error("no device connected")]
    NoTargetAvailable,

    /// The registry has no target matching the given name, uid or url.
    #[error("no such device: {0}")]
    UnknownDevice(String),

    /// URL could not be parsed or names an unsupported scheme.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The target is already leased.
    #[error("{target} is busy")]
    Busy { target: String },

    /// The transport to the target could not be established.
    #[error("{target}: {source}")]
    Unreachable {
        target: String,
        #[source]
        source: TransportCause,
    },

    /// The session broke while in use (reset, refused, closed).
    #[error("{target}: {message}")]
    TargetUnavailable { target: String, message: String },

    /// No response within the execution timeout.
    #[error("Timeout after {}s on {target} @ {url}", .after.as_secs_f64())]
    Timeout {
        target: String,
        url: String,
        after: Duration,
    },

    /// The target accepted the code but reported a runtime failure.
    #[error("{target}: {message}")]
    RemoteFault { target: String, message: String },

    /// User interrupt.
    #[error("Interrupted")]
    Interrupted,

    /// Host-side execution failure (missing interpreter, spawn failure).
    #[error("host: {0}")]
    Host(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error for persisted state.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification used at the cell-evaluation boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    Usage,
    NotFound,
    TargetUnavailable,
    RemoteFault,
    Cancellation,
    Unclassified,
}

impl Error {
    /// Map this error onto the fault taxonomy.
    pub fn class(&self) -> FaultClass {
        match self {
            Error::Usage(_) | Error::InvalidUrl(_) | Error::UnknownDevice(_) => FaultClass::Usage,
            Error::DirectiveNotFound { .. } => FaultClass::NotFound,
            Error::Busy { .. }
            | Error::Unreachable { .. }
            | Error::TargetUnavailable { .. }
            | Error::Timeout { .. }
            | Error::NoTargetAvailable => FaultClass::TargetUnavailable,
            Error::RemoteFault { .. } => FaultClass::RemoteFault,
            Error::Interrupted => FaultClass::Cancellation,
            Error::DuplicateDirective { .. } | Error::Host(_) | Error::Io(_) | Error::Json(_) => {
                FaultClass::Unclassified
            }
        }
    }

    /// Whether this error must terminate the whole cell evaluation.
    pub fn is_interrupt(&self) -> bool {
        self.class() == FaultClass::Cancellation
    }

    /// Build an [`Error::Unreachable`] from any transport error.
    pub fn unreachable(
        target: impl Into<String>,
        source: impl Into<TransportCause>,
    ) -> Self {
        Error::Unreachable {
            target: target.into(),
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_keeps_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::unreachable("devB", io);
        assert_eq!(err.to_string(), "devB: refused");
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.class(), FaultClass::TargetUnavailable);
    }

    #[test]
    fn test_classes() {
        assert!(Error::Interrupted.is_interrupt());
        assert_eq!(
            Error::RemoteFault {
                target: "a".into(),
                message: "boom".into()
            }
            .class(),
            FaultClass::RemoteFault
        );
        assert_eq!(
            Error::DirectiveNotFound {
                name: "frob".into(),
                kind: DirectiveKind::Line
            }
            .class(),
            FaultClass::NotFound
        );
        assert_eq!(Error::Host("x".into()).class(), FaultClass::Unclassified);
    }

    #[test]
    fn test_not_found_message() {
        let err = Error::DirectiveNotFound {
            name: "frobnicate".into(),
            kind: DirectiveKind::Line,
        };
        assert_eq!(err.to_string(), "line directive not defined: frobnicate");
    }
}
