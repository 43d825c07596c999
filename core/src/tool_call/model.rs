use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tool invocation made by the model during a run, with its output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub thread_uuid: Uuid,
    pub tool_call_uuid: Uuid,
    pub run_uuid: Uuid,
    /// Identifier assigned by the model provider, unique within a thread
    pub tool_call_id: String,
    pub tool_type: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    pub content: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for recording a tool call, keyed by `(thread_uuid, tool_call_id)`
#[derive(Debug, Clone)]
pub struct NewToolCall {
    pub thread_uuid: Uuid,
    pub run_uuid: Uuid,
    pub tool_call_id: String,
    pub tool_type: String,
    pub name: String,
    pub arguments: serde_json::Value,
    pub content: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
    pub updated_by: String,
}

impl NewToolCall {
    pub fn into_tool_call(self, now: DateTime<Utc>) -> ToolCall {
        ToolCall {
            thread_uuid: self.thread_uuid,
            tool_call_uuid: Uuid::new_v4(),
            run_uuid: self.run_uuid,
            tool_call_id: self.tool_call_id,
            tool_type: self.tool_type,
            name: self.name,
            arguments: self.arguments,
            content: self.content,
            status: self.status,
            notes: self.notes,
            updated_by: self.updated_by,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge into an existing record, keeping its identity and creation time
    pub fn merge_into(self, existing: &mut ToolCall, now: DateTime<Utc>) {
        existing.run_uuid = self.run_uuid;
        existing.tool_type = self.tool_type;
        existing.name = self.name;
        existing.arguments = self.arguments;
        if self.content.is_some() {
            existing.content = self.content;
        }
        if self.status.is_some() {
            existing.status = self.status;
        }
        if self.notes.is_some() {
            existing.notes = self.notes;
        }
        existing.updated_by = self.updated_by;
        existing.updated_at = now;
    }
}
