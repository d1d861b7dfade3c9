use crate::core::types::UnitState;
use thiserror::Error;

/// Phase of a unit of work an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Begin,
    Callback,
    Commit,
    Rollback,
    Exec,
    Discard,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Begin => "begin",
            Phase::Callback => "callback",
            Phase::Commit => "commit",
            Phase::Rollback => "rollback",
            Phase::Exec => "exec",
            Phase::Discard => "discard",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum UnitError {
    #[error("Backend error: {message}")]
    Backend { message: String, transient: bool },

    #[error("Context cancelled")]
    Cancelled,

    #[error("Context deadline exceeded")]
    DeadlineExceeded,

    #[error("Unit of work already finalized ({0})")]
    Finalized(UnitState),

    #[error("Failed to begin unit of work: {0}")]
    Begin(#[source] Box<UnitError>),

    #[error("Unit of work callback panicked: {0}")]
    Panic(String),

    #[error("Commit failed: {0}")]
    Commit(#[source] Box<UnitError>),

    #[error("Rollback failed: {source}{}", original_suffix(.cause))]
    Rollback {
        #[source]
        source: Box<UnitError>,
        cause: Option<Box<UnitError>>,
    },

    #[error("Pipeline exec failed: {0}")]
    Exec(#[source] Box<UnitError>),

    #[error("Pipeline discarded: {0}")]
    Discarded(#[source] Box<UnitError>),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, UnitError>;

fn original_suffix(cause: &Option<Box<UnitError>>) -> String {
    match cause {
        Some(cause) => format!(" (original error: {})", cause),
        None => String::new(),
    }
}

impl UnitError {
    /// Non-retryable driver failure.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            transient: false,
        }
    }

    /// Retryable driver failure, e.g. a write conflict.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            transient: true,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend { transient: true, .. })
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self.root_cause(), Self::Cancelled | Self::DeadlineExceeded)
    }

    /// Phase a wrapped error was raised in, `None` for unwrapped errors.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Begin(_) => Some(Phase::Begin),
            Self::Panic(_) => Some(Phase::Callback),
            Self::Commit(_) => Some(Phase::Commit),
            Self::Rollback { .. } => Some(Phase::Rollback),
            Self::Exec(_) => Some(Phase::Exec),
            Self::Discarded(_) => Some(Phase::Discard),
            _ => None,
        }
    }

    /// Follows phase wrappers down to the error that started the failure.
    ///
    /// For a failed rollback that kept the original error, the original error wins.
    pub fn root_cause(&self) -> &UnitError {
        match self {
            Self::Begin(inner)
            | Self::Commit(inner)
            | Self::Exec(inner)
            | Self::Discarded(inner) => inner.root_cause(),
            Self::Rollback {
                cause: Some(cause), ..
            } => cause.root_cause(),
            Self::Rollback { source, cause: None } => source.root_cause(),
            other => other,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for UnitError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::backend(format!("Lock poisoned: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_walks_wrappers() {
        let err = UnitError::Discarded(Box::new(UnitError::Begin(Box::new(
            UnitError::transient("conflict"),
        ))));
        assert!(err.root_cause().is_transient());
        assert_eq!(err.phase(), Some(Phase::Discard));
    }

    #[test]
    fn test_rollback_display_keeps_original() {
        let err = UnitError::Rollback {
            source: Box::new(UnitError::backend("connection reset")),
            cause: Some(Box::new(UnitError::backend("duplicate key"))),
        };
        let text = err.to_string();
        assert!(text.contains("connection reset"));
        assert!(text.contains("duplicate key"));
        assert!(matches!(err.root_cause(), UnitError::Backend { message, .. } if message == "duplicate key"));
    }

    #[test]
    fn test_cancellation_detection() {
        assert!(UnitError::Commit(Box::new(UnitError::Cancelled)).is_cancellation());
        assert!(UnitError::DeadlineExceeded.is_cancellation());
        assert!(!UnitError::backend("boom").is_cancellation());
    }

    #[test]
    fn test_anyhow_conversion() {
        let err: UnitError = anyhow::anyhow!("insufficient funds").into();
        assert_eq!(err.to_string(), "insufficient funds");
        assert_eq!(err.phase(), None);
    }
}
