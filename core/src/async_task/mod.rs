//! Async task module
//!
//! Async tasks track one dispatched model invocation from `initial`
//! through `in_progress` to a terminal status.

mod model;

pub use model::*;
