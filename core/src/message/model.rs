use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";

/// A persisted conversation turn
///
/// Roles are free-form: providers and agent configuration decide which
/// role names they use (`user`, `assistant`, `developer`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub thread_uuid: Uuid,
    pub message_uuid: Uuid,
    pub run_uuid: Uuid,
    /// Identifier assigned by the model provider
    pub message_id: Option<String>,
    pub role: String,
    pub content: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for appending a message to a thread
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub thread_uuid: Uuid,
    pub run_uuid: Uuid,
    pub role: String,
    pub content: String,
    pub message_id: Option<String>,
    pub updated_by: String,
}

impl NewMessage {
    pub fn new(
        thread_uuid: Uuid,
        run_uuid: Uuid,
        role: impl Into<String>,
        content: impl Into<String>,
        updated_by: impl Into<String>,
    ) -> Self {
        Self {
            thread_uuid,
            run_uuid,
            role: role.into(),
            content: content.into(),
            message_id: None,
            updated_by: updated_by.into(),
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn into_message(self, now: DateTime<Utc>) -> Message {
        Message {
            thread_uuid: self.thread_uuid,
            message_uuid: Uuid::new_v4(),
            run_uuid: self.run_uuid,
            message_id: self.message_id,
            role: self.role,
            content: self.content,
            updated_by: self.updated_by,
            created_at: now,
            updated_at: now,
        }
    }
}
