//! Error types for the beacon agent.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("lock poisoned: {0}")]
    Lock(String),

    #[error("{0}")]
    Other(String),
}

impl AgentError {
    pub fn config(msg: impl Into<String>) -> Self {
        AgentError::Config(msg.into())
    }

    pub fn lock(msg: impl Into<String>) -> Self {
        AgentError::Lock(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        AgentError::Other(msg.into())
    }
}

impl<T> From<std::sync::PoisonError<T>> for AgentError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        AgentError::Lock(err.to_string())
    }
}
