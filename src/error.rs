//! Error taxonomy for the query engine.
//!
//! The kinds below are the ones named in the design: invalid requests,
//! parse/translation failures, backend/cache failures, missing entities,
//! and deadline/cancellation propagation. Parse, validation, translation
//! and invalid-query errors are fatal to the current request; backend and
//! cache errors are recoverable by callers that choose to degrade instead
//! of fail (see `engine::uqe`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("parse error at {position}: unexpected {token}")]
    ParseError { token: String, position: usize },

    #[error("translation error: {0}")]
    TranslationError(String),

    #[error("backend error: {0}")]
    BackendError(String),

    #[error("cache error: {0}")]
    CacheError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("cancelled")]
    Cancelled,

    #[error("internal invariant violation: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::CacheError(format!("serialization failure: {e}"))
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(e: serde_yaml::Error) -> Self {
        EngineError::ConfigError(format!("failed to parse config file: {e}"))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::ConfigError(format!("failed to read config file: {e}"))
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(e: redis::RedisError) -> Self {
        EngineError::CacheError(format!("redis failure: {e}"))
    }
}

impl From<chrono::ParseError> for EngineError {
    fn from(e: chrono::ParseError) -> Self {
        EngineError::ParseError {
            token: e.to_string(),
            position: 0,
        }
    }
}

impl EngineError {
    /// Whether this error kind is fatal to the current request (propagated
    /// verbatim) as opposed to recoverable/degradable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidQuery(_)
                | EngineError::ParseError { .. }
                | EngineError::TranslationError(_)
                | EngineError::Internal(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
