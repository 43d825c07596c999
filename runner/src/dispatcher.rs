//! Task dispatcher - turns an incoming query into a tracked async task

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use ace_core::async_task::{AsyncTask, AsyncTaskUpdate};
use ace_core::store::EntityStore;

use crate::error::{ExecutorError, Result};
use crate::executor::{AsyncTaskExecutor, ExecuteRequest};

/// Function name under which model invocations are tracked
pub const ASK_MODEL_FUNCTION: &str = "async_execute_ask_model";

/// Incoming request to ask an agent's model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub agent_uuid: String,
    #[serde(default)]
    pub thread_uuid: Option<Uuid>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub user_query: String,
    #[serde(default)]
    pub stream: bool,
    pub updated_by: String,
    /// Live client connection to stream chunks to
    #[serde(default)]
    pub connection_id: Option<String>,
}

/// Identifiers returned to the caller for polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskResponse {
    pub agent_uuid: String,
    pub thread_uuid: Uuid,
    pub user_query: String,
    pub function_name: String,
    pub async_task_uuid: Uuid,
    pub run_uuid: Uuid,
}

/// Arguments stored on the async task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskArguments {
    pub agent_uuid: String,
    pub thread_uuid: Uuid,
    pub run_uuid: Uuid,
    pub user_query: String,
    pub stream: bool,
    pub updated_by: String,
}

/// Hands dispatched tasks to an executor
#[async_trait]
pub trait ExecutionTrigger: Send + Sync {
    /// Start execution without waiting for it to finish
    async fn trigger(&self, request: ExecuteRequest) -> Result<()>;
}

/// Spawns one tokio task per execution
pub struct InProcessTrigger {
    executor: Arc<AsyncTaskExecutor>,
}

impl InProcessTrigger {
    pub fn new(executor: Arc<AsyncTaskExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ExecutionTrigger for InProcessTrigger {
    async fn trigger(&self, request: ExecuteRequest) -> Result<()> {
        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            // Failures are already recorded on the task
            let _ = executor.execute(request).await;
        });
        Ok(())
    }
}

/// Creates conversation state and async tasks, then triggers execution
pub struct TaskDispatcher {
    store: Arc<dyn EntityStore>,
    trigger: Arc<dyn ExecutionTrigger>,
}

impl TaskDispatcher {
    pub fn new(store: Arc<dyn EntityStore>, trigger: Arc<dyn ExecutionTrigger>) -> Self {
        Self { store, trigger }
    }

    /// Dispatch a query; returns as soon as execution has been triggered
    pub async fn ask_model(&self, request: AskRequest) -> Result<AskResponse> {
        validate(&request)?;

        let thread = self
            .store
            .create_or_get_thread(
                &request.agent_uuid,
                request.thread_uuid,
                request.user_id.as_deref(),
                &request.updated_by,
            )
            .await?;
        let run = self
            .store
            .create_run(thread.thread_uuid, &request.updated_by)
            .await?;

        let arguments = AskArguments {
            agent_uuid: request.agent_uuid.clone(),
            thread_uuid: thread.thread_uuid,
            run_uuid: run.run_uuid,
            user_query: request.user_query.clone(),
            stream: request.stream,
            updated_by: request.updated_by.clone(),
        };
        let task = self
            .store
            .create_async_task(
                ASK_MODEL_FUNCTION,
                serde_json::to_value(&arguments).map_err(ace_core::Error::from)?,
                &request.updated_by,
            )
            .await?;

        info!(
            "Dispatching {} task {} for thread {} run {}",
            ASK_MODEL_FUNCTION, task.async_task_uuid, thread.thread_uuid, run.run_uuid
        );

        let execute = ExecuteRequest {
            function_name: ASK_MODEL_FUNCTION.to_string(),
            async_task_uuid: task.async_task_uuid,
            arguments,
            connection_id: request.connection_id.clone(),
        };
        if let Err(e) = self.trigger.trigger(execute).await {
            error!("Failed to trigger task {}: {}", task.async_task_uuid, e);
            if let Err(record_err) = self
                .store
                .update_async_task(
                    ASK_MODEL_FUNCTION,
                    task.async_task_uuid,
                    AsyncTaskUpdate::failed(format!("trigger failed: {}", e.diagnostic()))
                        .by(&request.updated_by),
                )
                .await
            {
                error!(
                    "Failed to record trigger failure of task {}: {}",
                    task.async_task_uuid, record_err
                );
            }
            return Err(e);
        }

        Ok(AskResponse {
            agent_uuid: request.agent_uuid,
            thread_uuid: thread.thread_uuid,
            user_query: request.user_query,
            function_name: ASK_MODEL_FUNCTION.to_string(),
            async_task_uuid: task.async_task_uuid,
            run_uuid: run.run_uuid,
        })
    }

    /// Current record of a dispatched task
    pub async fn poll(&self, function_name: &str, async_task_uuid: Uuid) -> Result<AsyncTask> {
        self.store
            .get_async_task(function_name, async_task_uuid)
            .await?
            .ok_or_else(|| {
                ExecutorError::Store(ace_core::Error::AsyncTaskNotFound {
                    function_name: function_name.to_string(),
                    async_task_uuid: async_task_uuid.to_string(),
                })
            })
    }
}

fn validate(request: &AskRequest) -> Result<()> {
    if request.agent_uuid.trim().is_empty() {
        return Err(ExecutorError::invalid_request("agent_uuid is required"));
    }
    if request.user_query.trim().is_empty() {
        return Err(ExecutorError::invalid_request("user_query is required"));
    }
    if request.updated_by.trim().is_empty() {
        return Err(ExecutorError::invalid_request("updated_by is required"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::provider::{EchoAdapter, ModelAdapter, ProviderRegistry, ECHO_PROVIDER};
    use crate::publisher::NullPublisher;
    use crate::tokens::TokenAccountant;
    use ace_core::agent::AgentConfig;
    use ace_core::async_task::AsyncTaskStatus;
    use ace_core::store::FileEntityStore;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records requests instead of executing them
    #[derive(Default)]
    struct RecordingTrigger {
        requests: Mutex<Vec<ExecuteRequest>>,
        refuse: bool,
    }

    #[async_trait]
    impl ExecutionTrigger for RecordingTrigger {
        async fn trigger(&self, request: ExecuteRequest) -> Result<()> {
            self.requests.lock().unwrap().push(request);
            if self.refuse {
                return Err(ExecutorError::TriggerClosed);
            }
            Ok(())
        }
    }

    fn ask(query: &str) -> AskRequest {
        AskRequest {
            agent_uuid: "agent-1".into(),
            thread_uuid: None,
            user_id: Some("user-1".into()),
            user_query: query.into(),
            stream: false,
            updated_by: "tester".into(),
            connection_id: None,
        }
    }

    #[tokio::test]
    async fn test_dispatch_creates_thread_run_and_initial_task() {
        let store = Arc::new(FileEntityStore::in_memory("test"));
        let trigger = Arc::new(RecordingTrigger::default());
        let dispatcher = TaskDispatcher::new(store.clone(), trigger.clone());

        let response = dispatcher.ask_model(ask("hello")).await.unwrap();

        assert_eq!(response.function_name, "async_execute_ask_model");
        assert_eq!(response.user_query, "hello");
        let task = dispatcher
            .poll(&response.function_name, response.async_task_uuid)
            .await
            .unwrap();
        assert_eq!(task.status, AsyncTaskStatus::Initial);
        let arguments: AskArguments = serde_json::from_value(task.arguments).unwrap();
        assert_eq!(arguments.thread_uuid, response.thread_uuid);
        assert_eq!(arguments.run_uuid, response.run_uuid);

        let runs = store
            .get_runs(response.thread_uuid, &[response.run_uuid])
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);

        let requests = trigger.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].async_task_uuid, response.async_task_uuid);
    }

    #[tokio::test]
    async fn test_blank_fields_are_rejected_before_persisting() {
        let store = Arc::new(FileEntityStore::in_memory("test"));
        let trigger = Arc::new(RecordingTrigger::default());
        let dispatcher = TaskDispatcher::new(store, trigger.clone());

        let err = dispatcher.ask_model(ask("   ")).await.unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidRequest { .. }));

        let mut no_actor = ask("hi");
        no_actor.updated_by = String::new();
        assert!(dispatcher.ask_model(no_actor).await.is_err());
        assert!(trigger.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_thread_propagates_without_task() {
        let store = Arc::new(FileEntityStore::in_memory("test"));
        let trigger = Arc::new(RecordingTrigger::default());
        let dispatcher = TaskDispatcher::new(store, trigger.clone());

        let mut request = ask("hi");
        request.thread_uuid = Some(Uuid::new_v4());
        let err = dispatcher.ask_model(request).await.unwrap_err();

        assert!(matches!(
            err,
            ExecutorError::Store(ace_core::Error::ThreadNotFound(_))
        ));
        assert!(trigger.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_existing_thread_is_reused() {
        let store = Arc::new(FileEntityStore::in_memory("test"));
        let dispatcher = TaskDispatcher::new(store, Arc::new(RecordingTrigger::default()));

        let first = dispatcher.ask_model(ask("one")).await.unwrap();
        let mut follow_up = ask("two");
        follow_up.thread_uuid = Some(first.thread_uuid);
        let second = dispatcher.ask_model(follow_up).await.unwrap();

        assert_eq!(first.thread_uuid, second.thread_uuid);
        assert_ne!(first.run_uuid, second.run_uuid);
    }

    #[tokio::test]
    async fn test_refused_trigger_marks_task_failed() {
        let store = Arc::new(FileEntityStore::in_memory("test"));
        let trigger = Arc::new(RecordingTrigger {
            refuse: true,
            ..Default::default()
        });
        let dispatcher = TaskDispatcher::new(store, trigger.clone());

        let err = dispatcher.ask_model(ask("hi")).await.unwrap_err();
        assert!(matches!(err, ExecutorError::TriggerClosed));

        let task_uuid = trigger.requests.lock().unwrap()[0].async_task_uuid;
        let task = dispatcher.poll(ASK_MODEL_FUNCTION, task_uuid).await.unwrap();
        assert_eq!(task.status, AsyncTaskStatus::Failed);
        assert!(task.notes.unwrap().contains("trigger failed"));
    }

    #[tokio::test]
    async fn test_in_process_trigger_runs_to_completion() {
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
        let dispatcher =
            TaskDispatcher::new(store.clone(), Arc::new(InProcessTrigger::new(executor)));

        let response = dispatcher.ask_model(ask("ping")).await.unwrap();

        let mut task = None;
        for _ in 0..100 {
            let polled = dispatcher
                .poll(ASK_MODEL_FUNCTION, response.async_task_uuid)
                .await
                .unwrap();
            if polled.status.is_terminal() {
                task = Some(polled);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let task = task.unwrap();
        assert_eq!(task.status, AsyncTaskStatus::Completed);
        assert_eq!(task.result.as_deref(), Some("ping"));
    }

    #[tokio::test]
    async fn test_completed_task_survives_store_reload() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("entities.json");
        let store = Arc::new(FileEntityStore::new("test", &path).await.unwrap());
        store
            .put_agent(AgentConfig::new("agent-1", ECHO_PROVIDER, "mistral"))
            .await
            .unwrap();
        let registry = ProviderRegistry::new().with(ECHO_PROVIDER, "mistral", |ctx| {
            Ok(Arc::new(EchoAdapter::new(ctx)) as Arc<dyn ModelAdapter>)
        });
        let executor = AsyncTaskExecutor::new(
            store.clone(),
            Arc::new(registry),
            Arc::new(TokenAccountant::new()),
            Arc::new(NullPublisher),
            &EngineConfig::default(),
        );
        let trigger = Arc::new(RecordingTrigger::default());
        let dispatcher = TaskDispatcher::new(store.clone(), trigger.clone());

        let response = dispatcher.ask_model(ask("persist me")).await.unwrap();
        let request = trigger.requests.lock().unwrap().remove(0);
        executor.execute(request).await.unwrap();

        let reloaded = FileEntityStore::new("test", &path).await.unwrap();
        let task = reloaded
            .get_async_task(ASK_MODEL_FUNCTION, response.async_task_uuid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.status, AsyncTaskStatus::Completed);
        let runs = reloaded
            .get_runs(response.thread_uuid, &[response.run_uuid])
            .await
            .unwrap();
        assert!(runs[0].completion_tokens.is_some());
    }

    #[tokio::test]
    async fn test_poll_unknown_task() {
        let store = Arc::new(FileEntityStore::in_memory("test"));
        let dispatcher = TaskDispatcher::new(store, Arc::new(RecordingTrigger::default()));

        let err = dispatcher
            .poll(ASK_MODEL_FUNCTION, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutorError::Store(ace_core::Error::AsyncTaskNotFound { .. })
        ));
    }
}
