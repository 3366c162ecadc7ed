// Common types and utilities shared across the worker

pub mod entity_ids;
pub mod error;
pub mod id;
pub mod utils;

pub use entity_ids::*;
pub use error::{ErrorClass, Result, SyncError};
pub use id::Id;
