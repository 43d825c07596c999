//! Context assembly
//!
//! Builds the ordered list of turns sent to a model provider from the
//! recent messages and tool calls of a thread, followed by the new query.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use ace_core::message::ROLE_USER;
use ace_core::run::RunTokens;
use ace_core::store::EntityStore;

use crate::error::Result;

/// Default recency bound for history sent to the model
pub const DEFAULT_LOOKBACK_HOURS: i64 = 24;

/// One {role, content} unit sent to a model provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextTurn {
    pub role: String,
    /// Plain text, or structured JSON for queries that parse as JSON
    pub content: serde_json::Value,
}

impl ContextTurn {
    pub fn text(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: serde_json::Value::String(content.into()),
        }
    }

    /// User turn for a raw query; JSON objects and arrays are parsed
    pub fn user_query(query: &str) -> Self {
        Self {
            role: ROLE_USER.to_string(),
            content: parse_query_content(query),
        }
    }

    /// Content as text: strings verbatim, structured content as JSON
    pub fn content_text(&self) -> String {
        match &self.content {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

fn parse_query_content(query: &str) -> serde_json::Value {
    let trimmed = query.trim();
    let looks_like_json = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    if looks_like_json {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
            return value;
        }
        debug!("Query looks like JSON but does not parse, sending raw text");
    }
    serde_json::Value::String(query.to_string())
}

/// Where a history turn came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnSource {
    Message { message_uuid: Uuid, run_uuid: Uuid },
    ToolCall { tool_call_id: String, run_uuid: Uuid },
}

/// A prior turn retained in the context, with bookkeeping
#[derive(Debug, Clone)]
pub struct HistoryTurn {
    pub turn: ContextTurn,
    pub created_at: DateTime<Utc>,
    pub source: TurnSource,
    /// Token totals of the owning run; zero when the run was not found
    pub run_tokens: RunTokens,
}

/// Output of one assembly
#[derive(Debug, Clone)]
pub struct AssembledContext {
    /// Retained prior turns, oldest first
    pub history: Vec<HistoryTurn>,
    /// History turns followed by the new user turn
    pub turns: Vec<ContextTurn>,
}

impl AssembledContext {
    /// Turn contents joined by newlines, as used for prompt accounting
    pub fn prompt_text(&self) -> String {
        self.turns
            .iter()
            .map(ContextTurn::content_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Assembles model context from thread history
#[derive(Clone)]
pub struct ContextAssembler {
    store: Arc<dyn EntityStore>,
    lookback: Duration,
}

impl ContextAssembler {
    pub fn new(store: Arc<dyn EntityStore>, lookback: Duration) -> Self {
        Self { store, lookback }
    }

    /// Assemble context for a new query, relative to the current time
    pub async fn assemble(
        &self,
        thread_uuid: Uuid,
        max_turns: usize,
        tool_call_role: &str,
        query: &str,
    ) -> Result<AssembledContext> {
        self.assemble_at(Utc::now(), thread_uuid, max_turns, tool_call_role, query)
            .await
    }

    /// Assemble context for a new query, relative to `now`
    pub async fn assemble_at(
        &self,
        now: DateTime<Utc>,
        thread_uuid: Uuid,
        max_turns: usize,
        tool_call_role: &str,
        query: &str,
    ) -> Result<AssembledContext> {
        let since = now
            .checked_sub_signed(self.lookback)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let messages = self.store.list_recent_messages(thread_uuid, since).await?;
        let tool_calls = self.store.list_recent_tool_calls(thread_uuid, since).await?;

        // One lookup for every run referenced by the history
        let mut run_uuids: Vec<Uuid> = messages
            .iter()
            .map(|m| m.run_uuid)
            .chain(tool_calls.iter().map(|t| t.run_uuid))
            .collect();
        run_uuids.sort();
        run_uuids.dedup();
        let run_tokens: HashMap<Uuid, RunTokens> = if run_uuids.is_empty() {
            HashMap::new()
        } else {
            self.store
                .get_runs(thread_uuid, &run_uuids)
                .await?
                .into_iter()
                .map(|run| (run.run_uuid, run.tokens()))
                .collect()
        };
        let tokens_of = |run_uuid: &Uuid| run_tokens.get(run_uuid).copied().unwrap_or_default();

        // Dedup key per turn: message text, or the raw tool output
        let mut candidates: Vec<(String, HistoryTurn)> =
            Vec::with_capacity(messages.len() + tool_calls.len());

        for message in messages {
            candidates.push((
                message.content.clone(),
                HistoryTurn {
                    run_tokens: tokens_of(&message.run_uuid),
                    created_at: message.created_at,
                    source: TurnSource::Message {
                        message_uuid: message.message_uuid,
                        run_uuid: message.run_uuid,
                    },
                    turn: ContextTurn::text(message.role, message.content),
                },
            ));
        }

        for tool_call in tool_calls {
            let output = tool_call.content.clone().unwrap_or_default();
            let envelope = serde_json::json!({
                "tool": {
                    "tool_type": tool_call.tool_type,
                    "name": tool_call.name,
                    "arguments": tool_call.arguments,
                },
                "output": tool_call.content,
            });
            candidates.push((
                output,
                HistoryTurn {
                    run_tokens: tokens_of(&tool_call.run_uuid),
                    created_at: tool_call.created_at,
                    source: TurnSource::ToolCall {
                        tool_call_id: tool_call.tool_call_id,
                        run_uuid: tool_call.run_uuid,
                    },
                    turn: ContextTurn::text(tool_call_role, envelope.to_string()),
                },
            ));
        }

        // Stable sort keeps message-before-tool-call order on equal timestamps
        candidates.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at));
        let mut seen: HashSet<String> = HashSet::new();
        let history: Vec<HistoryTurn> = candidates
            .into_iter()
            .filter(|(key, _)| seen.insert(key.clone()))
            .map(|(_, turn)| turn)
            .collect();

        let skip = history.len().saturating_sub(max_turns);
        let history: Vec<HistoryTurn> = history.into_iter().skip(skip).collect();

        let mut turns: Vec<ContextTurn> = history.iter().map(|h| h.turn.clone()).collect();
        turns.push(ContextTurn::user_query(query));

        debug!(
            "Assembled {} history turns for thread {} (window {}h, limit {})",
            history.len(),
            thread_uuid,
            self.lookback.num_hours(),
            max_turns
        );

        Ok(AssembledContext { history, turns })
    }
}
