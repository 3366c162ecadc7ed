//! Storage backends for the kernel traits.
//!
//! - [`PostgresStore`] - production
//! - [`MemoryStore`] - tests and local development

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
