//! Bounded in-process task queue
//!
//! The queued trigger decouples dispatch from execution: dispatchers push
//! requests into a bounded channel and a single consumer loop starts one
//! execution per request.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, error, info};

use ace_core::async_task::AsyncTask;

use crate::dispatcher::ExecutionTrigger;
use crate::error::{ExecutorError, Result};
use crate::executor::{AsyncTaskExecutor, ExecuteRequest};

/// Constructor for a connected trigger/worker pair
pub struct TaskQueue;

impl TaskQueue {
    pub fn new(capacity: usize) -> (QueueTrigger, TaskQueueWorker) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (QueueTrigger { sender }, TaskQueueWorker { receiver })
    }
}

/// Producer side; waits for queue space when the queue is full
#[derive(Clone)]
pub struct QueueTrigger {
    sender: mpsc::Sender<ExecuteRequest>,
}

#[async_trait]
impl ExecutionTrigger for QueueTrigger {
    async fn trigger(&self, request: ExecuteRequest) -> Result<()> {
        self.sender
            .send(request)
            .await
            .map_err(|_| ExecutorError::TriggerClosed)
    }
}

/// Consumer side of the queue
pub struct TaskQueueWorker {
    receiver: mpsc::Receiver<ExecuteRequest>,
}

impl TaskQueueWorker {
    /// Execute queued requests until every trigger is dropped, then wait
    /// for in-flight executions. Returns the number of executions started.
    pub async fn run(mut self, executor: Arc<AsyncTaskExecutor>) -> usize {
        let mut in_flight = FuturesUnordered::new();
        let mut started = 0usize;

        loop {
            tokio::select! {
                request = self.receiver.recv() => match request {
                    Some(request) => {
                        debug!("Dequeued task {}", request.async_task_uuid);
                        let executor = Arc::clone(&executor);
                        in_flight.push(tokio::spawn(async move { executor.execute(request).await }));
                        started += 1;
                    }
                    None => break,
                },
                Some(joined) = in_flight.next(), if !in_flight.is_empty() => report(joined),
            }
        }

        info!(
            "Task queue closed, waiting for {} in-flight executions",
            in_flight.len()
        );
        while let Some(joined) = in_flight.next().await {
            report(joined);
        }
        started
    }
}

fn report(joined: std::result::Result<Result<AsyncTask>, JoinError>) {
    match joined {
        Ok(Ok(task)) => debug!("Task {} finished as {}", task.async_task_uuid, task.status),
        // Already recorded on the task by the executor
        Ok(Err(e)) => debug!("Queued execution failed: {}", e),
        Err(e) => error!("Queued execution panicked: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::dispatcher::{AskRequest, TaskDispatcher, ASK_MODEL_FUNCTION};
    use crate::provider::{EchoAdapter, ModelAdapter, ProviderRegistry, ECHO_PROVIDER};
    use crate::publisher::NullPublisher;
    use crate::tokens::TokenAccountant;
    use ace_core::agent::AgentConfig;
    use ace_core::async_task::AsyncTaskStatus;
    use ace_core::store::{EntityStore, FileEntityStore};

    #[tokio::test]
    async fn test_queue_drains_before_worker_returns() {
        let store = Arc::new(FileEntityStore::in_memory("test"));
        store
            .put_agent(AgentConfig::new("agent-1", ECHO_PROVIDER, "mistral"))
            .await
            .unwrap();
        let registry = ProviderRegistry::new().with(ECHO_PROVIDER, "mistral", |ctx| {
            Ok(Arc::new(EchoAdapter::new(ctx)) as Arc<dyn ModelAdapter>)
        });
        let executor = Arc::new(AsyncTaskExecutor::new(
            store.clone(),
            Arc::new(registry),
            Arc::new(TokenAccountant::new()),
            Arc::new(NullPublisher),
            &EngineConfig::default(),
        ));

        let (trigger, worker) = TaskQueue::new(2);
        let worker = tokio::spawn(worker.run(executor));
        let dispatcher = TaskDispatcher::new(store.clone(), Arc::new(trigger));

        let mut task_uuids = Vec::new();
        for i in 0..5 {
            let response = dispatcher
                .ask_model(AskRequest {
                    agent_uuid: "agent-1".into(),
                    thread_uuid: None,
                    user_id: None,
                    user_query: format!("query {}", i),
                    stream: false,
                    updated_by: "tester".into(),
                    connection_id: None,
                })
                .await
                .unwrap();
            task_uuids.push(response.async_task_uuid);
        }
        drop(dispatcher);

        assert_eq!(worker.await.unwrap(), 5);
        for (i, uuid) in task_uuids.into_iter().enumerate() {
            let task = store
                .get_async_task(ASK_MODEL_FUNCTION, uuid)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(task.status, AsyncTaskStatus::Completed);
            assert_eq!(task.result, Some(format!("query {}", i)));
        }
    }

    #[tokio::test]
    async fn test_closed_queue_refuses_triggers() {
        let (trigger, worker) = TaskQueue::new(1);
        drop(worker);

        let err = trigger
            .trigger(ExecuteRequest {
                function_name: ASK_MODEL_FUNCTION.into(),
                async_task_uuid: uuid::Uuid::new_v4(),
                arguments: crate::dispatcher::AskArguments {
                    agent_uuid: "agent-1".into(),
                    thread_uuid: uuid::Uuid::new_v4(),
                    run_uuid: uuid::Uuid::new_v4(),
                    user_query: "hi".into(),
                    stream: false,
                    updated_by: "tester".into(),
                },
                connection_id: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::TriggerClosed));
    }
}
