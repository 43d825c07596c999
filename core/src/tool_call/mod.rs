mod model;

pub use model::{NewToolCall, ToolCall};
