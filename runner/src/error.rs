//! Error types for ace-runner

use thiserror::Error;

use crate::tokens::TokenError;

/// Result type alias for runner operations
pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Errors that can occur while dispatching or executing a task
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Entity store operation failed
    #[error("Store error: {0}")]
    Store(#[from] ace_core::Error),

    /// Request rejected before anything was persisted
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// No adapter factory registered for the agent's provider
    #[error("No model provider registered for {provider}/{name}")]
    ProviderNotRegistered { provider: String, name: String },

    /// The model provider adapter failed
    #[error("Model provider failed: {message}")]
    Provider { message: String },

    /// The adapter's final output does not satisfy the output contract
    #[error("Malformed model output: {message}")]
    MalformedOutput { message: String },

    /// Token counting failed
    #[error("Token accounting failed: {0}")]
    Token(#[from] TokenError),

    /// The streaming hand-off protocol was violated
    #[error("Hand-off protocol violation: {message}")]
    HandOffProtocol { message: String },

    /// The streaming worker went away without signalling completion
    #[error("Streaming worker terminated without signalling completion")]
    WorkerLost,

    /// The execution trigger no longer accepts requests
    #[error("Execution trigger closed")]
    TriggerClosed,
}

impl ExecutorError {
    /// Create an InvalidRequest error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a Provider error
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// Create a MalformedOutput error
    pub fn malformed_output(message: impl Into<String>) -> Self {
        Self::MalformedOutput {
            message: message.into(),
        }
    }

    /// Create a HandOffProtocol error
    pub fn hand_off(message: impl Into<String>) -> Self {
        Self::HandOffProtocol {
            message: message.into(),
        }
    }

    /// Render the error and its source chain, one cause per line
    pub fn diagnostic(&self) -> String {
        let mut text = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            text.push_str("\ncaused by: ");
            text.push_str(&cause.to_string());
            source = cause.source();
        }
        text
    }
}
