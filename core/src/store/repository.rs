//! Entity store trait
//!
//! Defines the narrow persistence interface the orchestration pipeline
//! is written against.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::agent::AgentConfig;
use crate::async_task::{AsyncTask, AsyncTaskUpdate};
use crate::message::{Message, NewMessage};
use crate::run::{Run, RunUpdate};
use crate::thread::Thread;
use crate::tool_call::{NewToolCall, ToolCall};
use crate::Result;

/// Durable storage for conversation state and async task records
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Resolve the active version of an agent
    async fn get_active_agent(&self, agent_uuid: &str) -> Result<AgentConfig>;

    /// Insert or replace an agent configuration
    async fn put_agent(&self, agent: AgentConfig) -> Result<AgentConfig>;

    /// Return the given thread, or create a new one when no id is supplied
    async fn create_or_get_thread(
        &self,
        agent_uuid: &str,
        thread_uuid: Option<Uuid>,
        user_id: Option<&str>,
        updated_by: &str,
    ) -> Result<Thread>;

    /// Open a new run in a thread
    async fn create_run(&self, thread_uuid: Uuid, updated_by: &str) -> Result<Run>;

    /// Batch lookup of runs; unknown ids are omitted from the result
    async fn get_runs(&self, thread_uuid: Uuid, run_uuids: &[Uuid]) -> Result<Vec<Run>>;

    /// Apply a partial update to a run
    async fn update_run(&self, thread_uuid: Uuid, run_uuid: Uuid, update: RunUpdate)
        -> Result<Run>;

    /// Append a message to a thread
    async fn append_message(&self, message: NewMessage) -> Result<Message>;

    /// Messages of a thread updated at or after `since`, oldest first
    async fn list_recent_messages(
        &self,
        thread_uuid: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>>;

    /// Tool calls of a thread updated at or after `since`, oldest first
    async fn list_recent_tool_calls(
        &self,
        thread_uuid: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<ToolCall>>;

    /// Insert a tool call, or update the one with the same provider id
    async fn upsert_tool_call(&self, tool_call: NewToolCall) -> Result<ToolCall>;

    /// Create an async task in the `initial` status
    async fn create_async_task(
        &self,
        function_name: &str,
        arguments: serde_json::Value,
        updated_by: &str,
    ) -> Result<AsyncTask>;

    /// Get an async task by its identity
    async fn get_async_task(
        &self,
        function_name: &str,
        async_task_uuid: Uuid,
    ) -> Result<Option<AsyncTask>>;

    /// Conditionally update an async task; status regressions are rejected
    async fn update_async_task(
        &self,
        function_name: &str,
        async_task_uuid: Uuid,
        update: AsyncTaskUpdate,
    ) -> Result<AsyncTask>;
}
