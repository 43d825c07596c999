use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A conversation thread owned by an endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub endpoint_id: String,
    pub thread_uuid: Uuid,
    pub agent_uuid: String,
    pub user_id: Option<String>,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    pub fn new(
        endpoint_id: impl Into<String>,
        agent_uuid: impl Into<String>,
        updated_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            endpoint_id: endpoint_id.into(),
            thread_uuid: Uuid::new_v4(),
            agent_uuid: agent_uuid.into(),
            user_id: None,
            updated_by: updated_by.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}
