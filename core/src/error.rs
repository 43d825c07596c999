//! Error types for the core library

use thiserror::Error;

use crate::async_task::AsyncTaskStatus;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Agent {0} has no active version")]
    InactiveAgent(String),

    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    #[error("Run not found: {thread_uuid}/{run_uuid}")]
    RunNotFound { thread_uuid: String, run_uuid: String },

    #[error("Async task not found: {function_name}/{async_task_uuid}")]
    AsyncTaskNotFound {
        function_name: String,
        async_task_uuid: String,
    },

    #[error("Invalid async task transition: {from} -> {to}")]
    InvalidTransition {
        from: AsyncTaskStatus,
        to: AsyncTaskStatus,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
