//! File-based entity store implementation
//!
//! Keeps every table in memory and, when backed by a path, rewrites a
//! single JSON document on disk for each mutation. A mutation is applied
//! to a copy of the tables and only becomes visible once that copy has
//! been written.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::repository::EntityStore;
use crate::agent::AgentConfig;
use crate::async_task::{AsyncTask, AsyncTaskUpdate};
use crate::message::{Message, NewMessage};
use crate::run::{Run, RunUpdate};
use crate::thread::Thread;
use crate::tool_call::{NewToolCall, ToolCall};
use crate::{Error, Result};

/// On-disk layout of the store
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    agents: Vec<AgentConfig>,
    #[serde(default)]
    threads: Vec<Thread>,
    #[serde(default)]
    runs: Vec<Run>,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
    #[serde(default)]
    async_tasks: Vec<AsyncTask>,
}

/// In-memory tables keyed the way the entities are addressed
#[derive(Clone, Default)]
struct Tables {
    agents: HashMap<String, AgentConfig>,
    threads: HashMap<Uuid, Thread>,
    runs: HashMap<(Uuid, Uuid), Run>,
    messages: HashMap<Uuid, Vec<Message>>,
    tool_calls: HashMap<Uuid, Vec<ToolCall>>,
    async_tasks: HashMap<(String, Uuid), AsyncTask>,
}

impl From<Snapshot> for Tables {
    fn from(snapshot: Snapshot) -> Self {
        let mut tables = Tables::default();
        for agent in snapshot.agents {
            tables.agents.insert(agent.agent_uuid.clone(), agent);
        }
        for thread in snapshot.threads {
            tables.threads.insert(thread.thread_uuid, thread);
        }
        for run in snapshot.runs {
            tables.runs.insert((run.thread_uuid, run.run_uuid), run);
        }
        for message in snapshot.messages {
            tables
                .messages
                .entry(message.thread_uuid)
                .or_default()
                .push(message);
        }
        for tool_call in snapshot.tool_calls {
            tables
                .tool_calls
                .entry(tool_call.thread_uuid)
                .or_default()
                .push(tool_call);
        }
        for task in snapshot.async_tasks {
            tables
                .async_tasks
                .insert((task.function_name.clone(), task.async_task_uuid), task);
        }
        tables
    }
}

impl Tables {
    fn snapshot(&self) -> Snapshot {
        let mut threads: Vec<Thread> = self.threads.values().cloned().collect();
        threads.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let mut runs: Vec<Run> = self.runs.values().cloned().collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let mut async_tasks: Vec<AsyncTask> = self.async_tasks.values().cloned().collect();
        async_tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Snapshot {
            agents: self.agents.values().cloned().collect(),
            threads,
            runs,
            messages: self.messages.values().flatten().cloned().collect(),
            tool_calls: self.tool_calls.values().flatten().cloned().collect(),
            async_tasks,
        }
    }
}

/// File-based entity store using JSON
pub struct FileEntityStore {
    /// Endpoint that owns every thread created through this store
    endpoint_id: String,
    /// Path to the JSON file, `None` for a purely in-memory store
    path: Option<PathBuf>,
    tables: RwLock<Tables>,
}

impl FileEntityStore {
    /// Create a store backed by the JSON file at `path`
    ///
    /// If the file doesn't exist, it will be created on first write.
    pub async fn new(endpoint_id: impl Into<String>, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tables = if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            let snapshot: Snapshot = serde_json::from_str(&content)?;
            Tables::from(snapshot)
        } else {
            Tables::default()
        };

        Ok(Self {
            endpoint_id: endpoint_id.into(),
            path: Some(path),
            tables: RwLock::new(tables),
        })
    }

    /// Create a store that never touches the disk
    pub fn in_memory(endpoint_id: impl Into<String>) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            path: None,
            tables: RwLock::new(Tables::default()),
        }
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    /// Apply `change` to a copy of the tables and swap it in once the copy is on disk
    ///
    /// The write lock is held across the disk write so snapshots land in
    /// the order their mutations were applied.
    async fn commit<T>(&self, change: impl FnOnce(&mut Tables) -> Result<T>) -> Result<T> {
        let mut tables = self.tables.write().await;
        if self.path.is_none() {
            return change(&mut *tables);
        }

        let mut next = tables.clone();
        let value = change(&mut next)?;
        self.persist(&next).await?;
        *tables = next;
        Ok(value)
    }

    /// Persist the tables to disk
    async fn persist(&self, tables: &Tables) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let content = serde_json::to_string_pretty(&tables.snapshot())?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(path, content).await?;
        debug!("Persisted entity store to {}", path.display());
        Ok(())
    }

    fn thread_in_endpoint<'a>(&self, tables: &'a Tables, thread_uuid: Uuid) -> Result<&'a Thread> {
        tables
            .threads
            .get(&thread_uuid)
            .filter(|thread| thread.endpoint_id == self.endpoint_id)
            .ok_or_else(|| Error::ThreadNotFound(thread_uuid.to_string()))
    }
}

#[async_trait]
impl EntityStore for FileEntityStore {
    async fn get_active_agent(&self, agent_uuid: &str) -> Result<AgentConfig> {
        let tables = self.tables.read().await;
        let agent = tables
            .agents
            .get(agent_uuid)
            .ok_or_else(|| Error::AgentNotFound(agent_uuid.to_string()))?;
        if !agent.is_active() {
            return Err(Error::InactiveAgent(agent_uuid.to_string()));
        }
        Ok(agent.clone())
    }

    async fn put_agent(&self, agent: AgentConfig) -> Result<AgentConfig> {
        if agent.agent_uuid.trim().is_empty() {
            return Err(Error::InvalidInput("agent_uuid must not be empty".into()));
        }
        self.commit(|tables| {
            tables.agents.insert(agent.agent_uuid.clone(), agent.clone());
            Ok(())
        })
        .await?;
        Ok(agent)
    }

    async fn create_or_get_thread(
        &self,
        agent_uuid: &str,
        thread_uuid: Option<Uuid>,
        user_id: Option<&str>,
        updated_by: &str,
    ) -> Result<Thread> {
        if let Some(thread_uuid) = thread_uuid {
            let tables = self.tables.read().await;
            return self.thread_in_endpoint(&tables, thread_uuid).cloned();
        }

        let mut thread = Thread::new(self.endpoint_id.clone(), agent_uuid, updated_by);
        if let Some(user_id) = user_id {
            thread = thread.with_user_id(user_id);
        }
        self.commit(|tables| {
            tables.threads.insert(thread.thread_uuid, thread.clone());
            Ok(())
        })
        .await?;
        Ok(thread)
    }

    async fn create_run(&self, thread_uuid: Uuid, updated_by: &str) -> Result<Run> {
        let run = Run::new(thread_uuid, updated_by);
        self.commit(|tables| {
            self.thread_in_endpoint(tables, thread_uuid)?;
            tables
                .runs
                .insert((run.thread_uuid, run.run_uuid), run.clone());
            Ok(())
        })
        .await?;
        Ok(run)
    }

    async fn get_runs(&self, thread_uuid: Uuid, run_uuids: &[Uuid]) -> Result<Vec<Run>> {
        let tables = self.tables.read().await;
        Ok(run_uuids
            .iter()
            .filter_map(|run_uuid| tables.runs.get(&(thread_uuid, *run_uuid)).cloned())
            .collect())
    }

    async fn update_run(
        &self,
        thread_uuid: Uuid,
        run_uuid: Uuid,
        update: RunUpdate,
    ) -> Result<Run> {
        self.commit(|tables| {
            let run = tables
                .runs
                .get_mut(&(thread_uuid, run_uuid))
                .ok_or_else(|| Error::RunNotFound {
                    thread_uuid: thread_uuid.to_string(),
                    run_uuid: run_uuid.to_string(),
                })?;
            run.apply(update, Utc::now());
            Ok(run.clone())
        })
        .await
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message> {
        let message = message.into_message(Utc::now());
        self.commit(|tables| {
            self.thread_in_endpoint(tables, message.thread_uuid)?;
            tables
                .messages
                .entry(message.thread_uuid)
                .or_default()
                .push(message.clone());
            Ok(())
        })
        .await?;
        Ok(message)
    }

    async fn list_recent_messages(
        &self,
        thread_uuid: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        let tables = self.tables.read().await;
        let mut messages: Vec<Message> = tables
            .messages
            .get(&thread_uuid)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| m.updated_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    async fn list_recent_tool_calls(
        &self,
        thread_uuid: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<ToolCall>> {
        let tables = self.tables.read().await;
        let mut tool_calls: Vec<ToolCall> = tables
            .tool_calls
            .get(&thread_uuid)
            .map(|tool_calls| {
                tool_calls
                    .iter()
                    .filter(|t| t.updated_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        tool_calls.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tool_calls)
    }

    async fn upsert_tool_call(&self, tool_call: NewToolCall) -> Result<ToolCall> {
        if tool_call.tool_call_id.trim().is_empty() {
            return Err(Error::InvalidInput("tool_call_id must not be empty".into()));
        }
        let now = Utc::now();
        self.commit(|tables| {
            self.thread_in_endpoint(tables, tool_call.thread_uuid)?;
            let calls = tables.tool_calls.entry(tool_call.thread_uuid).or_default();
            let stored = match calls
                .iter_mut()
                .find(|existing| existing.tool_call_id == tool_call.tool_call_id)
            {
                Some(existing) => {
                    tool_call.merge_into(existing, now);
                    existing.clone()
                }
                None => {
                    let created = tool_call.into_tool_call(now);
                    calls.push(created.clone());
                    created
                }
            };
            Ok(stored)
        })
        .await
    }

    async fn create_async_task(
        &self,
        function_name: &str,
        arguments: serde_json::Value,
        updated_by: &str,
    ) -> Result<AsyncTask> {
        let task = AsyncTask::new(function_name, arguments, updated_by);
        self.commit(|tables| {
            tables.async_tasks.insert(
                (task.function_name.clone(), task.async_task_uuid),
                task.clone(),
            );
            Ok(())
        })
        .await?;
        Ok(task)
    }

    async fn get_async_task(
        &self,
        function_name: &str,
        async_task_uuid: Uuid,
    ) -> Result<Option<AsyncTask>> {
        let tables = self.tables.read().await;
        Ok(tables
            .async_tasks
            .get(&(function_name.to_string(), async_task_uuid))
            .cloned())
    }

    async fn update_async_task(
        &self,
        function_name: &str,
        async_task_uuid: Uuid,
        update: AsyncTaskUpdate,
    ) -> Result<AsyncTask> {
        self.commit(|tables| {
            let task = tables
                .async_tasks
                .get_mut(&(function_name.to_string(), async_task_uuid))
                .ok_or_else(|| Error::AsyncTaskNotFound {
                    function_name: function_name.to_string(),
                    async_task_uuid: async_task_uuid.to_string(),
                })?;
            task.apply(update, Utc::now())?;
            Ok(task.clone())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::async_task::AsyncTaskStatus;
    use chrono::Duration;
    use tempfile::TempDir;

    async fn create_test_store() -> (FileEntityStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("entities.json");
        let store = FileEntityStore::new("test-endpoint", &path).await.unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_create_thread_when_no_id_supplied() {
        let (store, _temp) = create_test_store().await;

        let thread = store
            .create_or_get_thread("agent-1", None, Some("user-7"), "tester")
            .await
            .unwrap();

        assert_eq!(thread.endpoint_id, "test-endpoint");
        assert_eq!(thread.agent_uuid, "agent-1");
        assert_eq!(thread.user_id.as_deref(), Some("user-7"));

        let again = store
            .create_or_get_thread("agent-1", Some(thread.thread_uuid), None, "tester")
            .await
            .unwrap();
        assert_eq!(again.thread_uuid, thread.thread_uuid);
    }

    #[tokio::test]
    async fn test_unknown_thread_id_is_an_error() {
        let (store, _temp) = create_test_store().await;

        let result = store
            .create_or_get_thread("agent-1", Some(Uuid::new_v4()), None, "tester")
            .await;
        match result.unwrap_err() {
            Error::ThreadNotFound(_) => {}
            e => panic!("Expected ThreadNotFound error, got: {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_run_requires_existing_thread() {
        let (store, _temp) = create_test_store().await;

        let result = store.create_run(Uuid::new_v4(), "tester").await;
        assert!(matches!(result, Err(Error::ThreadNotFound(_))));
    }

    #[tokio::test]
    async fn test_get_runs_skips_unknown_ids() {
        let (store, _temp) = create_test_store().await;
        let thread = store
            .create_or_get_thread("agent-1", None, None, "tester")
            .await
            .unwrap();
        let run = store.create_run(thread.thread_uuid, "tester").await.unwrap();

        let runs = store
            .get_runs(thread.thread_uuid, &[run.run_uuid, Uuid::new_v4()])
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_uuid, run.run_uuid);
    }

    #[tokio::test]
    async fn test_update_run_tokens() {
        let (store, _temp) = create_test_store().await;
        let thread = store
            .create_or_get_thread("agent-1", None, None, "tester")
            .await
            .unwrap();
        let run = store.create_run(thread.thread_uuid, "tester").await.unwrap();

        store
            .update_run(thread.thread_uuid, run.run_uuid, RunUpdate::prompt_tokens(10))
            .await
            .unwrap();
        let updated = store
            .update_run(
                thread.thread_uuid,
                run.run_uuid,
                RunUpdate::completion(5, Some("run_1".into())),
            )
            .await
            .unwrap();

        assert_eq!(updated.total_tokens, 15);
        assert_eq!(updated.run_id.as_deref(), Some("run_1"));
        assert!(updated.time_spent.is_some());
    }

    #[tokio::test]
    async fn test_recent_messages_respect_since() {
        let (store, _temp) = create_test_store().await;
        let thread = store
            .create_or_get_thread("agent-1", None, None, "tester")
            .await
            .unwrap();
        let run = store.create_run(thread.thread_uuid, "tester").await.unwrap();

        store
            .append_message(NewMessage::new(
                thread.thread_uuid,
                run.run_uuid,
                "user",
                "first",
                "tester",
            ))
            .await
            .unwrap();
        store
            .append_message(NewMessage::new(
                thread.thread_uuid,
                run.run_uuid,
                "assistant",
                "second",
                "tester",
            ))
            .await
            .unwrap();

        let past = Utc::now() - Duration::hours(1);
        let messages = store
            .list_recent_messages(thread.thread_uuid, past)
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[1].content, "second");

        let future = Utc::now() + Duration::hours(1);
        let none = store
            .list_recent_messages(thread.thread_uuid, future)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_tool_call_by_provider_id() {
        let (store, _temp) = create_test_store().await;
        let thread = store
            .create_or_get_thread("agent-1", None, None, "tester")
            .await
            .unwrap();
        let run = store.create_run(thread.thread_uuid, "tester").await.unwrap();

        let call = NewToolCall {
            thread_uuid: thread.thread_uuid,
            run_uuid: run.run_uuid,
            tool_call_id: "call_1".into(),
            tool_type: "function".into(),
            name: "lookup".into(),
            arguments: serde_json::json!({"q": "rust"}),
            content: None,
            status: Some("in_progress".into()),
            notes: None,
            updated_by: "tester".into(),
        };
        let created = store.upsert_tool_call(call.clone()).await.unwrap();

        let finished = NewToolCall {
            content: Some("42".into()),
            status: Some("completed".into()),
            ..call
        };
        let updated = store.upsert_tool_call(finished).await.unwrap();

        assert_eq!(created.tool_call_uuid, updated.tool_call_uuid);
        assert_eq!(updated.content.as_deref(), Some("42"));
        assert_eq!(updated.status.as_deref(), Some("completed"));

        let past = Utc::now() - Duration::hours(1);
        let calls = store
            .list_recent_tool_calls(thread.thread_uuid, past)
            .await
            .unwrap();
        assert_eq!(calls.len(), 1);
    }

    #[tokio::test]
    async fn test_async_task_lifecycle() {
        let (store, _temp) = create_test_store().await;

        let task = store
            .create_async_task("fn", serde_json::json!({"a": 1}), "tester")
            .await
            .unwrap();
        assert_eq!(task.status, AsyncTaskStatus::Initial);

        store
            .update_async_task("fn", task.async_task_uuid, AsyncTaskUpdate::in_progress())
            .await
            .unwrap();
        let done = store
            .update_async_task(
                "fn",
                task.async_task_uuid,
                AsyncTaskUpdate::completed("answer"),
            )
            .await
            .unwrap();
        assert_eq!(done.status, AsyncTaskStatus::Completed);
        assert!(done.time_spent.is_some());

        let regress = store
            .update_async_task("fn", task.async_task_uuid, AsyncTaskUpdate::failed("late"))
            .await;
        assert!(matches!(regress, Err(Error::InvalidTransition { .. })));

        let polled = store
            .get_async_task("fn", task.async_task_uuid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(polled.status, AsyncTaskStatus::Completed);
        assert_eq!(polled.result.as_deref(), Some("answer"));
    }

    #[tokio::test]
    async fn test_inactive_agent_is_not_resolved() {
        let (store, _temp) = create_test_store().await;

        let mut agent = AgentConfig::new("agent-1", "echo", "echo");
        agent.status = crate::agent::AgentStatus::Inactive;
        store.put_agent(agent).await.unwrap();

        let result = store.get_active_agent("agent-1").await;
        assert!(matches!(result, Err(Error::InactiveAgent(_))));

        let missing = store.get_active_agent("agent-2").await;
        assert!(matches!(missing, Err(Error::AgentNotFound(_))));
    }

    #[tokio::test]
    async fn test_persistence_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("entities.json");

        let (thread_uuid, task_uuid);

        {
            let store = FileEntityStore::new("ep", &path).await.unwrap();
            store
                .put_agent(AgentConfig::new("agent-1", "echo", "echo"))
                .await
                .unwrap();
            let thread = store
                .create_or_get_thread("agent-1", None, None, "tester")
                .await
                .unwrap();
            let run = store.create_run(thread.thread_uuid, "tester").await.unwrap();
            store
                .append_message(NewMessage::new(
                    thread.thread_uuid,
                    run.run_uuid,
                    "user",
                    "hello",
                    "tester",
                ))
                .await
                .unwrap();
            let task = store
                .create_async_task("fn", serde_json::Value::Null, "tester")
                .await
                .unwrap();
            thread_uuid = thread.thread_uuid;
            task_uuid = task.async_task_uuid;
        }

        {
            let store = FileEntityStore::new("ep", &path).await.unwrap();
            assert!(store.get_active_agent("agent-1").await.is_ok());
            let messages = store
                .list_recent_messages(thread_uuid, Utc::now() - Duration::hours(1))
                .await
                .unwrap();
            assert_eq!(messages.len(), 1);
            assert!(store.get_async_task("fn", task_uuid).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_in_memory_store_does_not_write() {
        let store = FileEntityStore::in_memory("ep");
        let thread = store
            .create_or_get_thread("agent-1", None, None, "tester")
            .await
            .unwrap();
        assert_eq!(store.endpoint_id(), "ep");
        assert_eq!(thread.endpoint_id, "ep");
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path().join("data");
        let store = FileEntityStore::new("ep", data_dir.join("entities.json"))
            .await
            .unwrap();
        let task = store
            .create_async_task("fn", serde_json::Value::Null, "tester")
            .await
            .unwrap();
        store
            .update_async_task("fn", task.async_task_uuid, AsyncTaskUpdate::in_progress())
            .await
            .unwrap();

        // Replace the data directory with a plain file so every write fails
        tokio::fs::remove_dir_all(&data_dir).await.unwrap();
        tokio::fs::write(&data_dir, "not a directory").await.unwrap();

        let completed = store
            .update_async_task(
                "fn",
                task.async_task_uuid,
                AsyncTaskUpdate::completed("answer"),
            )
            .await;
        assert!(matches!(completed, Err(Error::Io(_))));

        let current = store
            .get_async_task("fn", task.async_task_uuid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.status, AsyncTaskStatus::InProgress);
        assert!(current.result.is_none());

        let thread_result = store
            .create_or_get_thread("agent-1", None, None, "tester")
            .await;
        assert!(thread_result.is_err());

        // Once the disk is writable again the failure can still be recorded
        tokio::fs::remove_file(&data_dir).await.unwrap();
        let failed = store
            .update_async_task("fn", task.async_task_uuid, AsyncTaskUpdate::failed("disk full"))
            .await
            .unwrap();
        assert_eq!(failed.status, AsyncTaskStatus::Failed);

        let reopened = FileEntityStore::new("ep", data_dir.join("entities.json"))
            .await
            .unwrap();
        let persisted = reopened
            .get_async_task("fn", task.async_task_uuid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(persisted.status, AsyncTaskStatus::Failed);
    }
}
