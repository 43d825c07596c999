//! Core library for the agent core engine
//!
//! This crate contains the durable conversation entities and the
//! persistence contract the orchestration pipeline is written against:
//! - Threads, runs, messages and tool calls
//! - Async task records and their status state machine
//! - Agent configuration
//! - The `EntityStore` trait and a JSON file-backed implementation

pub mod agent;
pub mod async_task;
pub mod error;
pub mod message;
pub mod run;
pub mod store;
pub mod thread;
pub mod tool_call;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
