//! Engine wiring for the worker binary
//!
//! Builds the store, registry, executor and dispatcher from an
//! `EngineConfig`, and answers one JSON command per input line. Tasks go
//! through the bounded queue, or straight to a spawned execution in test
//! mode.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use ace_core::agent::AgentConfig;
use ace_core::store::{EntityStore, FileEntityStore};
use ace_runner::{
    AskRequest, AsyncTaskExecutor, BroadcastPublisher, EchoAdapter, EngineConfig,
    ExecutionTrigger, InProcessTrigger, ModelAdapter, ModelFamily, ProviderRegistry,
    PublishedFrame, TaskDispatcher, TaskQueue, TokenAccountant, ASK_MODEL_FUNCTION, ECHO_PROVIDER,
};

/// Capacity of the in-process frame broadcast
const FRAME_BUFFER: usize = 256;

/// One input line
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Ask(AskRequest),
    Poll {
        #[serde(default)]
        function_name: Option<String>,
        async_task_uuid: Uuid,
    },
}

pub struct Engine {
    dispatcher: TaskDispatcher,
    publisher: BroadcastPublisher,
    /// Queue worker, absent in test mode
    worker: Option<JoinHandle<usize>>,
}

impl Engine {
    /// Open the store, seed agents and start the queue worker unless in test mode
    pub async fn start(config: EngineConfig, agents: Vec<AgentConfig>) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {:?}", config.data_dir))?;
        let store_path = config.data_dir.join("entities.json");
        let store = Arc::new(
            FileEntityStore::new(config.endpoint_id.clone(), store_path)
                .await
                .context("Failed to open entity store")?,
        );

        for agent in agents {
            info!("Seeding agent {} ({}/{})", agent.agent_uuid, agent.llm_provider, agent.llm_name);
            store.put_agent(agent).await?;
        }

        let registry = Arc::new(default_registry());
        let publisher = BroadcastPublisher::new(FRAME_BUFFER);
        let executor = Arc::new(AsyncTaskExecutor::new(
            store.clone(),
            registry,
            Arc::new(TokenAccountant::new()),
            Arc::new(publisher.clone()),
            &config,
        ));

        let (trigger, worker) = if config.test_mode {
            let trigger = Arc::new(InProcessTrigger::new(executor)) as Arc<dyn ExecutionTrigger>;
            (trigger, None)
        } else {
            let (trigger, worker) = TaskQueue::new(config.queue_capacity);
            let trigger = Arc::new(trigger) as Arc<dyn ExecutionTrigger>;
            (trigger, Some(tokio::spawn(worker.run(executor))))
        };
        let dispatcher = TaskDispatcher::new(store, trigger);

        info!(
            "Engine started for endpoint {} ({})",
            config.endpoint_id,
            if config.test_mode { "in-process" } else { "queued" }
        );
        Ok(Self {
            dispatcher,
            publisher,
            worker,
        })
    }

    pub fn publisher(&self) -> &BroadcastPublisher {
        &self.publisher
    }

    /// Answer one input line with one JSON output line
    pub async fn handle_line(&self, line: &str) -> serde_json::Value {
        match self.handle_command(line).await {
            Ok(value) => value,
            Err(e) => serde_json::json!({ "error": format!("{:#}", e) }),
        }
    }

    async fn handle_command(&self, line: &str) -> Result<serde_json::Value> {
        let command: Command = serde_json::from_str(line).context("Invalid command")?;
        let value = match command {
            Command::Ask(request) => serde_json::to_value(self.dispatcher.ask_model(request).await?)?,
            Command::Poll {
                function_name,
                async_task_uuid,
            } => {
                let function_name = function_name.as_deref().unwrap_or(ASK_MODEL_FUNCTION);
                serde_json::to_value(self.dispatcher.poll(function_name, async_task_uuid).await?)?
            }
        };
        Ok(value)
    }

    /// Stop accepting work and wait for queued executions to finish
    ///
    /// Returns the number of queued executions; in-process executions are
    /// not counted and keep running until they finish on their own.
    pub async fn shutdown(self) -> Result<usize> {
        drop(self.dispatcher);
        let Some(worker) = self.worker else {
            info!("Engine stopped");
            return Ok(0);
        };
        let executed = worker.await.context("Queue worker panicked")?;
        info!("Engine stopped after {} executions", executed);
        Ok(executed)
    }
}

/// Write each published frame as one JSON line until every publisher is dropped
///
/// Frames still buffered in the channel are written before this returns.
/// Returns the number of frames written.
pub async fn print_frames(
    mut frames: broadcast::Receiver<PublishedFrame>,
    mut out: impl Write,
) -> usize {
    let mut printed = 0;
    loop {
        match frames.recv().await {
            Ok(frame) => {
                let written = serde_json::to_string(&frame)
                    .map_err(std::io::Error::from)
                    .and_then(|line| writeln!(out, "{}", line));
                match written {
                    Ok(()) => printed += 1,
                    Err(e) => warn!("Failed to print frame for {}: {}", frame.connection_id, e),
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Frame printer lagged, skipped {} frames", skipped)
            }
            Err(RecvError::Closed) => break,
        }
    }
    printed
}

/// Registry with the echo adapter for the families that can be counted locally
pub fn default_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for family in [ModelFamily::OpenAi, ModelFamily::Other("mistral".to_string())] {
        registry.register(ECHO_PROVIDER, family.as_str(), |ctx| {
            Ok(Arc::new(EchoAdapter::new(ctx)) as Arc<dyn ModelAdapter>)
        });
    }
    registry
}
