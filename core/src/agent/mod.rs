//! Agent configuration
//!
//! Agents are managed elsewhere; this crate only reads the active
//! version of an agent when executing a task.

mod model;

pub use model::{AgentConfig, AgentStatus};
