//! Async task executor - runs one dispatched model invocation to a terminal status

use std::fmt;
use std::sync::Arc;

use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use ace_core::async_task::{AsyncTask, AsyncTaskUpdate};
use ace_core::message::{NewMessage, ROLE_USER};
use ace_core::run::RunUpdate;
use ace_core::store::EntityStore;

use crate::config::EngineConfig;
use crate::context::ContextAssembler;
use crate::dispatcher::AskArguments;
use crate::error::Result;
use crate::provider::{AdapterContext, FinalOutput, ProviderRegistry};
use crate::publisher::ResultPublisher;
use crate::stream::StreamingCoordinator;
use crate::tokens::{ModelFamily, TokenAccountant};
use crate::tool_calls::ToolCallRecorder;

/// Request to execute a dispatched task
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub function_name: String,
    pub async_task_uuid: Uuid,
    pub arguments: AskArguments,
    /// Live client connection to stream chunks to
    pub connection_id: Option<String>,
}

/// Step of an execution, recorded in failure notes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStage {
    ResolveAgent,
    AssembleContext,
    RecordQuery,
    CountPromptTokens,
    BuildAdapter,
    InvokeModel,
    ValidateOutput,
    RecordReply,
    CountCompletionTokens,
    CompleteTask,
}

impl ExecutionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResolveAgent => "resolve_agent",
            Self::AssembleContext => "assemble_context",
            Self::RecordQuery => "record_query",
            Self::CountPromptTokens => "count_prompt_tokens",
            Self::BuildAdapter => "build_adapter",
            Self::InvokeModel => "invoke_model",
            Self::ValidateOutput => "validate_output",
            Self::RecordReply => "record_reply",
            Self::CountCompletionTokens => "count_completion_tokens",
            Self::CompleteTask => "complete_task",
        }
    }
}

impl fmt::Display for ExecutionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives async tasks from `in_progress` to `completed` or `failed`
///
/// The executor is the only writer of the store records of a task while
/// it runs; streaming workers hand their results back in memory.
pub struct AsyncTaskExecutor {
    store: Arc<dyn EntityStore>,
    registry: Arc<ProviderRegistry>,
    tokens: Arc<TokenAccountant>,
    assembler: ContextAssembler,
    coordinator: StreamingCoordinator,
    publisher: Arc<dyn ResultPublisher>,
    settings: Arc<serde_json::Map<String, serde_json::Value>>,
}

impl AsyncTaskExecutor {
    pub fn new(
        store: Arc<dyn EntityStore>,
        registry: Arc<ProviderRegistry>,
        tokens: Arc<TokenAccountant>,
        publisher: Arc<dyn ResultPublisher>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            assembler: ContextAssembler::new(Arc::clone(&store), config.lookback),
            coordinator: StreamingCoordinator::new(config.stream_completion_timeout),
            settings: Arc::new(config.settings.clone()),
            store,
            registry,
            tokens,
            publisher,
        }
    }

    /// Execute a task
    ///
    /// Returns the completed task. Errors after the task entered
    /// `in_progress` are recorded on the task as `failed` before they are
    /// returned.
    pub async fn execute(&self, request: ExecuteRequest) -> Result<AsyncTask> {
        let span = info_span!(
            "async_task",
            task = %request.async_task_uuid,
            thread = %request.arguments.thread_uuid,
            run = %request.arguments.run_uuid,
        );
        self.execute_in_span(request).instrument(span).await
    }

    async fn execute_in_span(&self, request: ExecuteRequest) -> Result<AsyncTask> {
        let updated_by = request.arguments.updated_by.clone();
        self.store
            .update_async_task(
                &request.function_name,
                request.async_task_uuid,
                AsyncTaskUpdate::in_progress().by(&updated_by),
            )
            .await?;
        info!("Executing {} task {}", request.function_name, request.async_task_uuid);

        let mut stage = ExecutionStage::ResolveAgent;
        match self.run_stages(&request, &mut stage).await {
            Ok(task) => {
                info!("Task {} completed", request.async_task_uuid);
                Ok(task)
            }
            Err(e) => {
                let diagnostic = e.diagnostic();
                error!(
                    "Task {} failed at {}: {}",
                    request.async_task_uuid, stage, diagnostic
                );
                let notes = format!("stage: {}\n{}", stage, diagnostic);
                if let Err(record_err) = self
                    .store
                    .update_async_task(
                        &request.function_name,
                        request.async_task_uuid,
                        AsyncTaskUpdate::failed(notes).by(&updated_by),
                    )
                    .await
                {
                    error!(
                        "Failed to record failure of task {}: {}",
                        request.async_task_uuid, record_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        request: &ExecuteRequest,
        stage: &mut ExecutionStage,
    ) -> Result<AsyncTask> {
        let args = &request.arguments;
        let by = args.updated_by.as_str();

        *stage = ExecutionStage::ResolveAgent;
        let agent = self.store.get_active_agent(&args.agent_uuid).await?;
        let family = ModelFamily::from_llm_name(&agent.llm_name);

        *stage = ExecutionStage::AssembleContext;
        let context = self
            .assembler
            .assemble(
                args.thread_uuid,
                agent.num_of_messages,
                &agent.tool_call_role,
                &args.user_query,
            )
            .await?;

        *stage = ExecutionStage::RecordQuery;
        self.store
            .append_message(NewMessage::new(
                args.thread_uuid,
                args.run_uuid,
                ROLE_USER,
                args.user_query.clone(),
                by,
            ))
            .await?;

        *stage = ExecutionStage::CountPromptTokens;
        let prompt_tokens = self
            .tokens
            .count(&family, agent.model(), &context.prompt_text())
            .await?;
        self.store
            .update_run(
                args.thread_uuid,
                args.run_uuid,
                RunUpdate::prompt_tokens(prompt_tokens).by(by),
            )
            .await?;

        *stage = ExecutionStage::BuildAdapter;
        let adapter_span = info_span!(
            "model_adapter",
            provider = %agent.llm_provider,
            model = %agent.model(),
        );
        let adapter = self.registry.build(AdapterContext {
            agent: agent.clone(),
            settings: Arc::clone(&self.settings),
            thread_uuid: args.thread_uuid,
            run_uuid: args.run_uuid,
            tool_calls: ToolCallRecorder::new(
                Arc::clone(&self.store),
                args.thread_uuid,
                args.run_uuid,
                by,
            ),
            span: adapter_span,
        })?;

        *stage = ExecutionStage::InvokeModel;
        let streaming = args.stream || request.connection_id.is_some();
        let (run_id, final_output) = if streaming {
            let outcome = self
                .coordinator
                .run(
                    adapter,
                    context.turns,
                    Arc::clone(&self.publisher),
                    request.connection_id.clone(),
                )
                .await?;
            if !outcome.is_final {
                warn!(
                    "Run {} did not finish in time, using the output available so far",
                    outcome.run_id
                );
            }
            (Some(outcome.run_id), outcome.final_output)
        } else {
            let reply = adapter.ask_model(&context.turns, None).await?;
            (reply.run_id, Some(reply.final_output))
        };

        *stage = ExecutionStage::ValidateOutput;
        let output = FinalOutput::from_value(final_output.as_ref())?;

        *stage = ExecutionStage::RecordReply;
        self.store
            .append_message(
                NewMessage::new(
                    args.thread_uuid,
                    args.run_uuid,
                    output.role.clone(),
                    output.content.clone(),
                    by,
                )
                .with_message_id(output.message_id.clone()),
            )
            .await?;

        *stage = ExecutionStage::CountCompletionTokens;
        let completion_tokens = self
            .tokens
            .count(&family, agent.model(), &output.content)
            .await?;
        let run = self
            .store
            .update_run(
                args.thread_uuid,
                args.run_uuid,
                RunUpdate::completion(completion_tokens, run_id).by(by),
            )
            .await?;
        info!(
            "Run {} used {} prompt + {} completion tokens",
            run.run_uuid, run.prompt_tokens, completion_tokens
        );

        *stage = ExecutionStage::CompleteTask;
        let task = self
            .store
            .update_async_task(
                &request.function_name,
                request.async_task_uuid,
                AsyncTaskUpdate::completed(output.content).by(by),
            )
            .await?;
        Ok(task)
    }
}
