use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One request/response cycle within a thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub thread_uuid: Uuid,
    pub run_uuid: Uuid,
    /// Identifier assigned by the model provider
    pub run_id: Option<String>,
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Unset until the assistant turn has been accounted for
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: u64,
    /// Milliseconds between creation and the completion update
    pub time_spent: Option<u64>,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(thread_uuid: Uuid, updated_by: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            thread_uuid,
            run_uuid: Uuid::new_v4(),
            run_id: None,
            prompt_tokens: 0,
            completion_tokens: None,
            total_tokens: 0,
            time_spent: None,
            updated_by: updated_by.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update.
    ///
    /// Setting `completion_tokens` derives `total_tokens` and `time_spent`.
    pub fn apply(&mut self, update: RunUpdate, now: DateTime<Utc>) {
        if let Some(run_id) = update.run_id {
            self.run_id = Some(run_id);
        }
        if let Some(prompt_tokens) = update.prompt_tokens {
            self.prompt_tokens = prompt_tokens;
        }
        if let Some(completion_tokens) = update.completion_tokens {
            self.completion_tokens = Some(completion_tokens);
            self.total_tokens = self.prompt_tokens + completion_tokens;
            let elapsed = now.signed_duration_since(self.created_at);
            self.time_spent = Some(elapsed.num_milliseconds().max(0) as u64);
        }
        if let Some(updated_by) = update.updated_by {
            self.updated_by = updated_by;
        }
        self.updated_at = now;
    }

    pub fn tokens(&self) -> RunTokens {
        RunTokens {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens.unwrap_or(0),
            total_tokens: self.total_tokens,
        }
    }
}

/// Partial update for a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunUpdate {
    pub run_id: Option<String>,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub updated_by: Option<String>,
}

impl RunUpdate {
    pub fn prompt_tokens(tokens: u64) -> Self {
        Self {
            prompt_tokens: Some(tokens),
            ..Self::default()
        }
    }

    pub fn completion(tokens: u64, run_id: Option<String>) -> Self {
        Self {
            completion_tokens: Some(tokens),
            run_id,
            ..Self::default()
        }
    }

    pub fn by(mut self, updated_by: impl Into<String>) -> Self {
        self.updated_by = Some(updated_by.into());
        self
    }
}

/// Token totals of a run, zeroed when the run is unknown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTokens {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}
