//! Error types for the scheduling engine.

use thiserror::Error;

/// Engine error kinds surfaced by every public operation.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed input: bad schedule, unknown instance/provider kind, empty name.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task not found: {0}")]
    NotFound(String),

    /// Derived task ID already in use.
    #[error("Task already exists: {0}")]
    Conflict(String),

    #[error("Task is already running: {0}")]
    AlreadyRunning(String),

    /// Backend cannot be used at all (e.g. missing credentials).
    #[error("Agent backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Agent backend error: {0}")]
    Backend(String),

    /// A store read or write failed; the operation did not take effect.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Transport status code the control surface reports for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Validation(_) => 400,
            EngineError::NotFound(_) => 404,
            EngineError::Conflict(_) | EngineError::AlreadyRunning(_) => 409,
            EngineError::BackendUnavailable(_)
            | EngineError::Backend(_)
            | EngineError::Persistence(_)
            | EngineError::Config(_) => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }
}

impl From<anyhow::Error> for EngineError {
    /// Engine errors raised inside a storage closure come back out unchanged;
    /// anything else from the storage layer is a persistence failure.
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<EngineError>() {
            Ok(engine_err) => engine_err,
            Err(err) => EngineError::Persistence(format!("{err:#}")),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Persistence(format!("failed to decode stored record: {err}"))
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        assert_eq!(EngineError::NotFound("a".into()).status_code(), 404);
        assert_eq!(EngineError::Conflict("a".into()).status_code(), 409);
        assert_eq!(EngineError::AlreadyRunning("a".into()).status_code(), 409);
        assert_eq!(EngineError::Validation("a".into()).status_code(), 400);
        assert_eq!(EngineError::Persistence("a".into()).status_code(), 500);
    }

    #[test]
    fn anyhow_errors_become_persistence_errors() {
        let err: EngineError = anyhow::anyhow!("disk full").into();
        assert!(matches!(err, EngineError::Persistence(ref msg) if msg.contains("disk full")));
    }

    #[test]
    fn engine_errors_survive_anyhow_round_trip() {
        let wrapped = anyhow::Error::from(EngineError::Validation("bad cron".into()));
        let err: EngineError = wrapped.into();
        assert!(matches!(err, EngineError::Validation(ref msg) if msg == "bad cron"));
    }
}
