//! Entity store module
//!
//! This module contains the persistence contract and its file-backed
//! implementation.

mod file_store;
mod repository;

pub use file_store::FileEntityStore;
pub use repository::EntityStore;
