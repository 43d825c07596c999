//! Tool-call recording for model adapters
//!
//! Adapters that let the model invoke tools persist each invocation and
//! its output through a recorder scoped to the current thread and run.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use ace_core::store::EntityStore;
use ace_core::tool_call::{NewToolCall, ToolCall};

use crate::error::Result;

/// One tool invocation reported by an adapter
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub tool_call_id: String,
    pub tool_type: String,
    pub name: String,
    pub arguments: serde_json::Value,
    pub content: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
}

impl ToolCallRecord {
    pub fn function(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_type: "function".to_string(),
            name: name.into(),
            arguments,
            content: None,
            status: None,
            notes: None,
        }
    }

    pub fn with_output(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}

/// Upserts tool calls into the store for one thread and run
#[derive(Clone)]
pub struct ToolCallRecorder {
    store: Arc<dyn EntityStore>,
    thread_uuid: Uuid,
    run_uuid: Uuid,
    updated_by: String,
}

impl ToolCallRecorder {
    pub fn new(
        store: Arc<dyn EntityStore>,
        thread_uuid: Uuid,
        run_uuid: Uuid,
        updated_by: impl Into<String>,
    ) -> Self {
        Self {
            store,
            thread_uuid,
            run_uuid,
            updated_by: updated_by.into(),
        }
    }

    /// Insert the tool call, or update the one with the same provider id
    pub async fn record(&self, record: ToolCallRecord) -> Result<ToolCall> {
        debug!(
            "Recording tool call {} ({}) for run {}",
            record.tool_call_id, record.name, self.run_uuid
        );
        let tool_call = self
            .store
            .upsert_tool_call(NewToolCall {
                thread_uuid: self.thread_uuid,
                run_uuid: self.run_uuid,
                tool_call_id: record.tool_call_id,
                tool_type: record.tool_type,
                name: record.name,
                arguments: record.arguments,
                content: record.content,
                status: record.status,
                notes: record.notes,
                updated_by: self.updated_by.clone(),
            })
            .await?;
        Ok(tool_call)
    }
}
