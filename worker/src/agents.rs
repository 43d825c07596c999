//! Agent seeding from a JSON file

use std::path::Path;

use anyhow::{Context, Result};

use ace_core::agent::AgentConfig;

/// Read a JSON array of agent configurations
pub async fn load_agents(path: &Path) -> Result<Vec<AgentConfig>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read agents file {:?}", path))?;
    let agents: Vec<AgentConfig> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse agents file {:?}", path))?;
    Ok(agents)
}
