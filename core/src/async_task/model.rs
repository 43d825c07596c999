//! Async task model definitions

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Lifecycle status of an async task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncTaskStatus {
    Initial,
    InProgress,
    Completed,
    Failed,
}

impl Default for AsyncTaskStatus {
    fn default() -> Self {
        Self::Initial
    }
}

impl AsyncTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` keeps the status monotonic.
    ///
    /// `Initial -> Failed` is reserved for tasks the dispatcher could not
    /// hand to an executor; an executed task always passes through
    /// `InProgress`.
    pub fn can_transition_to(&self, next: AsyncTaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Initial, Self::InProgress)
                | (Self::Initial, Self::Failed)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
        )
    }
}

impl fmt::Display for AsyncTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked, polling-friendly record of one asynchronous request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncTask {
    pub function_name: String,
    pub async_task_uuid: Uuid,
    #[serde(default)]
    pub arguments: serde_json::Value,
    pub result: Option<String>,
    pub status: AsyncTaskStatus,
    pub notes: Option<String>,
    /// Milliseconds between creation and completion
    pub time_spent: Option<u64>,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AsyncTask {
    pub fn new(
        function_name: impl Into<String>,
        arguments: serde_json::Value,
        updated_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            function_name: function_name.into(),
            async_task_uuid: Uuid::new_v4(),
            arguments,
            result: None,
            status: AsyncTaskStatus::default(),
            notes: None,
            time_spent: None,
            updated_by: updated_by.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a conditional update, rejecting any status regression
    pub fn apply(&mut self, update: AsyncTaskUpdate, now: DateTime<Utc>) -> Result<()> {
        if let Some(next) = update.status {
            if !self.status.can_transition_to(next) {
                return Err(Error::InvalidTransition {
                    from: self.status,
                    to: next,
                });
            }
            self.status = next;
            if next == AsyncTaskStatus::Completed {
                let elapsed = now.signed_duration_since(self.created_at);
                self.time_spent = Some(elapsed.num_milliseconds().max(0) as u64);
            }
        }
        if let Some(result) = update.result {
            self.result = Some(result);
        }
        if let Some(notes) = update.notes {
            self.notes = Some(notes);
        }
        if let Some(updated_by) = update.updated_by {
            self.updated_by = updated_by;
        }
        self.updated_at = now;
        Ok(())
    }
}

/// Partial update for an async task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AsyncTaskUpdate {
    pub status: Option<AsyncTaskStatus>,
    pub result: Option<String>,
    pub notes: Option<String>,
    pub updated_by: Option<String>,
}

impl AsyncTaskUpdate {
    pub fn in_progress() -> Self {
        Self {
            status: Some(AsyncTaskStatus::InProgress),
            ..Self::default()
        }
    }

    pub fn completed(result: impl Into<String>) -> Self {
        Self {
            status: Some(AsyncTaskStatus::Completed),
            result: Some(result.into()),
            ..Self::default()
        }
    }

    pub fn failed(notes: impl Into<String>) -> Self {
        Self {
            status: Some(AsyncTaskStatus::Failed),
            notes: Some(notes.into()),
            ..Self::default()
        }
    }

    /// Set the actor recorded on the task
    pub fn by(mut self, updated_by: impl Into<String>) -> Self {
        self.updated_by = Some(updated_by.into());
        self
    }
}
