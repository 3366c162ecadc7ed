use sha2::{Digest, Sha256};

/// Generate a content hash for duplicate detection
///
/// Uses SHA256 of normalized text so that whitespace and casing differences do
/// not produce a different hash. Normalization rules:
/// - Convert to lowercase
/// - Collapse runs of whitespace into single spaces
/// - Trim leading/trailing whitespace
pub fn generate_content_hash(text: &str) -> String {
    let normalized = text
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hash several fields as one value. Fields are separated so that
/// `("ab", "c")` and `("a", "bc")` do not collide.
pub fn hash_fields(fields: &[&str]) -> String {
    generate_content_hash(&fields.join("\u{1f}"))
}
