//! Result publishing
//!
//! Pushes streamed chunks to a client connection. Delivery is best
//! effort: a failed push is reported to the caller and never aborts the
//! model call that produced it.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors raised while pushing a payload to a connection
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Connection {0} is gone")]
    ConnectionGone(String),
}

/// Outcome of one publish attempt
#[derive(Debug)]
pub enum PublishOutcome {
    Delivered,
    /// No connection to publish to
    Skipped,
    Failed(PublishError),
}

/// Pushes payloads to a client connection
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn push(&self, connection_id: &str, payload: &serde_json::Value)
        -> Result<(), PublishError>;
}

/// Publisher that drops every payload
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPublisher;

#[async_trait]
impl ResultPublisher for NullPublisher {
    async fn push(
        &self,
        _connection_id: &str,
        _payload: &serde_json::Value,
    ) -> Result<(), PublishError> {
        Ok(())
    }
}

/// A payload addressed to one connection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedFrame {
    pub connection_id: String,
    pub payload: serde_json::Value,
}

/// In-process publisher fanning frames out to broadcast subscribers
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<PublishedFrame>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedFrame> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl ResultPublisher for BroadcastPublisher {
    async fn push(
        &self,
        connection_id: &str,
        payload: &serde_json::Value,
    ) -> Result<(), PublishError> {
        self.sender
            .send(PublishedFrame {
                connection_id: connection_id.to_string(),
                payload: payload.clone(),
            })
            .map(|_| ())
            .map_err(|_| PublishError::ConnectionGone(connection_id.to_string()))
    }
}
