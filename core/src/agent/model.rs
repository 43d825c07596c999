use serde::{Deserialize, Serialize};

fn default_num_of_messages() -> usize {
    10
}

fn default_tool_call_role() -> String {
    "developer".to_string()
}

/// Whether an agent version may serve requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Inactive,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Active
    }
}

/// Configuration of an AI agent as seen by the executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_uuid: String,
    #[serde(default)]
    pub agent_name: String,
    /// Registry key of the provider adapter (e.g. `openai`)
    pub llm_provider: String,
    /// Model family, also used to select a tokenizer
    pub llm_name: String,
    #[serde(default)]
    pub instructions: Option<String>,
    /// Provider parameters; `model` names the concrete model
    #[serde(default)]
    pub configuration: serde_json::Map<String, serde_json::Value>,
    /// Maximum number of prior turns sent with each request
    #[serde(default = "default_num_of_messages")]
    pub num_of_messages: usize,
    /// Role given to synthesized tool-call turns
    #[serde(default = "default_tool_call_role")]
    pub tool_call_role: String,
    #[serde(default)]
    pub status: AgentStatus,
}

impl AgentConfig {
    pub fn new(
        agent_uuid: impl Into<String>,
        llm_provider: impl Into<String>,
        llm_name: impl Into<String>,
    ) -> Self {
        Self {
            agent_uuid: agent_uuid.into(),
            agent_name: String::new(),
            llm_provider: llm_provider.into(),
            llm_name: llm_name.into(),
            instructions: None,
            configuration: serde_json::Map::new(),
            num_of_messages: default_num_of_messages(),
            tool_call_role: default_tool_call_role(),
            status: AgentStatus::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.configuration
            .insert("model".to_string(), serde_json::Value::String(model.into()));
        self
    }

    pub fn with_num_of_messages(mut self, num_of_messages: usize) -> Self {
        self.num_of_messages = num_of_messages;
        self
    }

    pub fn with_tool_call_role(mut self, role: impl Into<String>) -> Self {
        self.tool_call_role = role.into();
        self
    }

    /// Configured model name, empty when the agent does not name one
    pub fn model(&self) -> &str {
        self.configuration
            .get("model")
            .and_then(|value| value.as_str())
            .unwrap_or_default()
    }

    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }
}
