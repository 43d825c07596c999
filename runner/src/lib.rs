//! Agent core runner - dispatches and executes tracked model invocations
//!
//! This crate turns an incoming query into an async task, assembles the
//! conversation context, calls the configured model provider (optionally
//! streaming through a background worker) and reconciles the reply, token
//! counts and task status back into the entity store.

pub mod config;
pub mod context;
pub mod dispatcher;
mod error;
pub mod executor;
pub mod provider;
pub mod publisher;
pub mod queue;
pub mod stream;
pub mod tokens;
pub mod tool_calls;

pub use config::{ConfigError, EngineConfig};
pub use context::{AssembledContext, ContextAssembler, ContextTurn};
pub use dispatcher::{
    AskArguments, AskRequest, AskResponse, ExecutionTrigger, InProcessTrigger, TaskDispatcher,
    ASK_MODEL_FUNCTION,
};
pub use error::{ExecutorError, Result};
pub use executor::{AsyncTaskExecutor, ExecuteRequest, ExecutionStage};
pub use provider::{
    AdapterContext, AdapterReply, EchoAdapter, FinalOutput, ModelAdapter, ProviderRegistry,
    ECHO_PROVIDER,
};
pub use publisher::{
    BroadcastPublisher, NullPublisher, PublishError, PublishOutcome, PublishedFrame,
    ResultPublisher,
};
pub use queue::{QueueTrigger, TaskQueue, TaskQueueWorker};
pub use stream::{StreamOutcome, StreamSink, StreamingCoordinator};
pub use tokens::{ModelFamily, TokenAccountant, TokenCounter, TokenError};
pub use tool_calls::{ToolCallRecord, ToolCallRecorder};
