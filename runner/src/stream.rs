//! Streaming coordination
//!
//! A streaming invocation runs the model adapter on a background task.
//! The adapter hands the provider's run id back to the caller as early as
//! possible through a single-slot channel, pushes chunks to the client
//! while the model is still answering, and finally stores its output in a
//! slot the coordinator collects once the worker signals completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use crate::context::ContextTurn;
use crate::error::{ExecutorError, Result};
use crate::provider::ModelAdapter;
use crate::publisher::{PublishOutcome, ResultPublisher};

/// Name of the only hand-off message the coordinator accepts
pub const RUN_ID_HANDOFF: &str = "run_id";

/// Default bound on the wait for the worker's completion signal
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(120);

/// Early identifier passed from the worker to the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandOff {
    pub name: String,
    pub value: String,
}

impl HandOff {
    pub fn run_id(value: impl Into<String>) -> Self {
        Self {
            name: RUN_ID_HANDOFF.to_string(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Default)]
struct SlotState {
    value: Option<serde_json::Value>,
    sealed: bool,
}

/// Holds the worker's final output until the coordinator takes it
#[derive(Debug, Default)]
pub struct FinalOutputSlot {
    state: Mutex<SlotState>,
}

impl FinalOutputSlot {
    /// Store the output; returns false once the slot has been sealed
    pub fn set(&self, value: serde_json::Value) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if state.sealed {
            return false;
        }
        state.value = Some(value);
        true
    }

    /// Take the current output and reject every later write
    pub fn take_and_seal(&self) -> Option<serde_json::Value> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.sealed = true;
        state.value.take()
    }
}

/// Worker-side handle of a streaming invocation
pub struct StreamSink {
    hand_off: mpsc::Sender<HandOff>,
    handed_off: AtomicBool,
    final_output: Arc<FinalOutputSlot>,
    cancel: CancellationToken,
    publisher: Arc<dyn ResultPublisher>,
    connection_id: Option<String>,
}

impl StreamSink {
    /// Send the single hand-off message; a second attempt is rejected
    pub async fn hand_off(&self, message: HandOff) -> Result<()> {
        if self.handed_off.swap(true, Ordering::SeqCst) {
            return Err(ExecutorError::hand_off(format!(
                "hand-off {:?} rejected, the channel already carried one message",
                message.name
            )));
        }
        debug!("Handing off {} = {}", message.name, message.value);
        self.hand_off
            .send(message)
            .await
            .map_err(|_| ExecutorError::hand_off("coordinator stopped listening for the hand-off"))
    }

    pub async fn hand_off_run_id(&self, run_id: impl Into<String>) -> Result<()> {
        self.hand_off(HandOff::run_id(run_id)).await
    }

    pub fn has_handed_off(&self) -> bool {
        self.handed_off.load(Ordering::SeqCst)
    }

    /// Push a payload to the live connection, if there is one
    pub async fn publish(&self, payload: &serde_json::Value) -> PublishOutcome {
        let Some(connection_id) = self.connection_id.as_deref() else {
            return PublishOutcome::Skipped;
        };
        match self.publisher.push(connection_id, payload).await {
            Ok(()) => PublishOutcome::Delivered,
            Err(e) => PublishOutcome::Failed(e),
        }
    }

    /// Store the final output; returns false if the coordinator already collected it
    pub fn set_final_output(&self, value: serde_json::Value) -> bool {
        self.final_output.set(value)
    }

    /// Token cancelled when the coordinator stops waiting
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Result of a streaming invocation
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub run_id: String,
    /// False when the completion wait timed out
    pub is_final: bool,
    pub final_output: Option<serde_json::Value>,
}

/// Runs an adapter on a background worker and collects its results
#[derive(Debug, Clone)]
pub struct StreamingCoordinator {
    completion_timeout: Duration,
}

impl Default for StreamingCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_COMPLETION_TIMEOUT)
    }
}

impl StreamingCoordinator {
    pub fn new(completion_timeout: Duration) -> Self {
        Self { completion_timeout }
    }

    pub async fn run(
        &self,
        adapter: Arc<dyn ModelAdapter>,
        turns: Vec<ContextTurn>,
        publisher: Arc<dyn ResultPublisher>,
        connection_id: Option<String>,
    ) -> Result<StreamOutcome> {
        let (hand_off_tx, mut hand_off_rx) = mpsc::channel::<HandOff>(1);
        let (done_tx, done_rx) = oneshot::channel::<Result<()>>();
        let slot = Arc::new(FinalOutputSlot::default());
        let cancel = CancellationToken::new();

        // The worker owns the only sender, so the hand-off read ends when it exits
        let sink = StreamSink {
            hand_off: hand_off_tx,
            handed_off: AtomicBool::new(false),
            final_output: Arc::clone(&slot),
            cancel: cancel.clone(),
            publisher,
            connection_id,
        };

        tokio::spawn(
            async move {
                let result = match adapter.ask_model(&turns, Some(&sink)).await {
                    Ok(reply) => {
                        sink.set_final_output(reply.final_output);
                        match reply.run_id {
                            Some(run_id) if !sink.has_handed_off() => {
                                sink.hand_off_run_id(run_id).await
                            }
                            _ => Ok(()),
                        }
                    }
                    Err(e) => Err(e),
                };
                drop(sink);
                // The coordinator may have stopped waiting
                let _ = done_tx.send(result);
            }
            .instrument(tracing::Span::current()),
        );

        let hand_off = match hand_off_rx.recv().await {
            Some(hand_off) => hand_off,
            None => {
                // Prefer the worker's own error over the bare protocol failure
                return match timeout(self.completion_timeout, done_rx).await {
                    Ok(Ok(Err(e))) => Err(e),
                    Ok(Err(_)) => Err(ExecutorError::WorkerLost),
                    _ => Err(ExecutorError::hand_off(
                        "worker finished without handing off a run id",
                    )),
                };
            }
        };

        if hand_off.name != RUN_ID_HANDOFF {
            cancel.cancel();
            return Err(ExecutorError::hand_off(format!(
                "expected {:?} hand-off, got {:?}",
                RUN_ID_HANDOFF, hand_off.name
            )));
        }
        debug!("Received run id {} from streaming worker", hand_off.value);

        let is_final = match timeout(self.completion_timeout, done_rx).await {
            Ok(Ok(Ok(()))) => true,
            Ok(Ok(Err(e))) => return Err(e),
            Ok(Err(_)) => return Err(ExecutorError::WorkerLost),
            Err(_) => {
                warn!(
                    "Streaming worker for run {} did not complete within {:?}, cancelling",
                    hand_off.value, self.completion_timeout
                );
                false
            }
        };

        // Seal before cancelling so a woken worker cannot replace the output
        let final_output = slot.take_and_seal();
        if !is_final {
            cancel.cancel();
        }

        Ok(StreamOutcome {
            run_id: hand_off.value,
            is_final,
            final_output,
        })
    }
}
