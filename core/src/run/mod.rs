mod model;

pub use model::{Run, RunTokens, RunUpdate};
