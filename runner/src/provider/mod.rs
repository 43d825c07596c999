//! Model provider adapters
//!
//! Providers are looked up in a registry keyed by the agent's
//! `(llm_provider, llm_name)` pair. Each registered factory builds a fresh
//! adapter per execution from an [`AdapterContext`].

mod echo;

pub use echo::{EchoAdapter, ECHO_PROVIDER};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ace_core::agent::AgentConfig;

use crate::context::ContextTurn;
use crate::error::{ExecutorError, Result};
use crate::stream::StreamSink;
use crate::tool_calls::ToolCallRecorder;

/// Everything an adapter gets to know about the execution it serves
#[derive(Clone)]
pub struct AdapterContext {
    pub agent: AgentConfig,
    /// Deployment settings shared by all adapters
    pub settings: Arc<serde_json::Map<String, serde_json::Value>>,
    pub thread_uuid: Uuid,
    pub run_uuid: Uuid,
    pub tool_calls: ToolCallRecorder,
    /// Span scoped to the task, thread and run
    pub span: tracing::Span,
}

/// What an adapter returns once the model is done
#[derive(Debug, Clone)]
pub struct AdapterReply {
    /// Provider-side run identifier, if the provider has one
    pub run_id: Option<String>,
    /// Must satisfy the [`FinalOutput`] contract
    pub final_output: serde_json::Value,
}

/// A model provider adapter
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Send the turns to the model; `stream` is set for streaming invocations
    async fn ask_model(
        &self,
        turns: &[ContextTurn],
        stream: Option<&StreamSink>,
    ) -> Result<AdapterReply>;
}

/// Validated assistant reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalOutput {
    pub message_id: String,
    pub role: String,
    pub content: String,
}

impl FinalOutput {
    /// Validate a raw final output: an object with non-empty string
    /// `message_id`, `role` and `content`
    pub fn from_value(value: Option<&serde_json::Value>) -> Result<Self> {
        let value = value.ok_or_else(|| ExecutorError::malformed_output("no final output"))?;
        let object = value
            .as_object()
            .ok_or_else(|| ExecutorError::malformed_output("final output is not an object"))?;

        let field = |name: &str| -> Result<String> {
            match object.get(name).and_then(|v| v.as_str()) {
                Some(text) if !text.is_empty() => Ok(text.to_string()),
                Some(_) => Err(ExecutorError::malformed_output(format!(
                    "`{}` is empty",
                    name
                ))),
                None => Err(ExecutorError::malformed_output(format!(
                    "`{}` is missing or not a string",
                    name
                ))),
            }
        };

        Ok(Self {
            message_id: field("message_id")?,
            role: field("role")?,
            content: field("content")?,
        })
    }
}

type AdapterFactory = Arc<dyn Fn(AdapterContext) -> Result<Arc<dyn ModelAdapter>> + Send + Sync>;

/// Maps `(llm_provider, llm_name)` to adapter factories
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: HashMap<(String, String), AdapterFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one for the same key
    pub fn register<F>(&mut self, llm_provider: &str, llm_name: &str, factory: F)
    where
        F: Fn(AdapterContext) -> Result<Arc<dyn ModelAdapter>> + Send + Sync + 'static,
    {
        self.factories.insert(
            (llm_provider.to_string(), llm_name.to_string()),
            Arc::new(factory),
        );
    }

    pub fn with<F>(mut self, llm_provider: &str, llm_name: &str, factory: F) -> Self
    where
        F: Fn(AdapterContext) -> Result<Arc<dyn ModelAdapter>> + Send + Sync + 'static,
    {
        self.register(llm_provider, llm_name, factory);
        self
    }

    pub fn contains(&self, llm_provider: &str, llm_name: &str) -> bool {
        self.factories
            .contains_key(&(llm_provider.to_string(), llm_name.to_string()))
    }

    /// Build the adapter for the context's agent
    pub fn build(&self, context: AdapterContext) -> Result<Arc<dyn ModelAdapter>> {
        let key = (
            context.agent.llm_provider.clone(),
            context.agent.llm_name.clone(),
        );
        let factory = self
            .factories
            .get(&key)
            .ok_or_else(|| ExecutorError::ProviderNotRegistered {
                provider: key.0.clone(),
                name: key.1.clone(),
            })?;
        factory(context)
    }
}
