pub mod content_hash;

pub use content_hash::{generate_content_hash, hash_fields};
