//! Echo adapter for local development
//!
//! Answers every query with the query itself. When streaming, it hands off
//! a run id first and publishes the answer word by word.

use async_trait::async_trait;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use ace_core::message::ROLE_ASSISTANT;

use super::{AdapterContext, AdapterReply, ModelAdapter};
use crate::context::ContextTurn;
use crate::error::{ExecutorError, Result};
use crate::publisher::PublishOutcome;
use crate::stream::StreamSink;

/// Provider name the echo adapter is usually registered under
pub const ECHO_PROVIDER: &str = "echo";

pub struct EchoAdapter {
    context: AdapterContext,
}

impl EchoAdapter {
    pub fn new(context: AdapterContext) -> Self {
        Self { context }
    }

    fn answer(&self, turns: &[ContextTurn]) -> Result<String> {
        let last = turns
            .last()
            .ok_or_else(|| ExecutorError::provider("no turns to answer"))?;
        let prefix = self
            .context
            .settings
            .get("echo_prefix")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        Ok(format!("{}{}", prefix, last.content_text()))
    }

    async fn respond(
        &self,
        turns: &[ContextTurn],
        stream: Option<&StreamSink>,
    ) -> Result<AdapterReply> {
        let run_id = format!("echo-run-{}", Uuid::new_v4());
        let answer = self.answer(turns)?;
        debug!(
            "Echo adapter answering {} turns for agent {}",
            turns.len(),
            self.context.agent.agent_uuid
        );

        if let Some(sink) = stream {
            sink.hand_off_run_id(run_id.clone()).await?;
            self.stream_answer(sink, &answer).await;
        }

        Ok(AdapterReply {
            run_id: Some(run_id),
            final_output: serde_json::json!({
                "message_id": format!("echo-msg-{}", Uuid::new_v4()),
                "role": ROLE_ASSISTANT,
                "content": answer,
            }),
        })
    }

    async fn stream_answer(&self, sink: &StreamSink, answer: &str) {
        for word in answer.split_inclusive(' ') {
            if sink.is_cancelled() {
                debug!("Echo stream cancelled");
                break;
            }
            let chunk = serde_json::json!({
                "run_uuid": self.context.run_uuid,
                "chunk": word,
            });
            if let PublishOutcome::Failed(e) = sink.publish(&chunk).await {
                warn!("Failed to publish echo chunk: {}", e);
            }
        }
    }
}

#[async_trait]
impl ModelAdapter for EchoAdapter {
    async fn ask_model(
        &self,
        turns: &[ContextTurn],
        stream: Option<&StreamSink>,
    ) -> Result<AdapterReply> {
        let span = self.context.span.clone();
        self.respond(turns, stream).instrument(span).await
    }
}
