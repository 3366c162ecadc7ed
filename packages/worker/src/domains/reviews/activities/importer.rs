//! Map provider items to records and write them in batches.

use std::collections::HashSet;

use chrono::Utc;
use dataforseo_client::ReviewItem;
use tracing::{debug, warn};

use crate::common::utils::hash_fields;
use crate::common::OwnerId;
use crate::domains::reviews::models::{ImportCounts, ImportedRecord, SyncRun};
use crate::kernel::retry::{database_retry, execute_with_retry};
use crate::kernel::traits::ReviewStore;

/// Rating given to reviews that arrive without one.
pub const NEUTRAL_RATING: f64 = 3.0;
pub const ANONYMOUS_AUTHOR: &str = "Anonymous";

/// Where imported records belong.
#[derive(Debug, Clone)]
pub struct ImportTarget {
    pub source: String,
    pub owner_id: OwnerId,
    pub source_url: String,
}

impl ImportTarget {
    pub fn for_run(run: &SyncRun, source: &str) -> Self {
        Self {
            source: source.to_string(),
            owner_id: run.owner_id,
            source_url: run.source_url.clone(),
        }
    }
}

/// Turn a provider item into a record.
///
/// Returns `None` when the item carries nothing to identify it: no id, no
/// author and no text.
pub fn map_review_item(item: &ReviewItem, target: &ImportTarget) -> Option<ImportedRecord> {
    let author = non_blank(item.profile_name.as_deref());
    let text = non_blank(item.review_text.as_deref());

    let external_id = match non_blank(item.review_id.as_deref()) {
        Some(id) => id.to_string(),
        None if author.is_none() && text.is_none() => return None,
        None => hash_fields(&[
            author.unwrap_or_default(),
            text.unwrap_or_default(),
            item.timestamp.as_deref().unwrap_or_default(),
        ]),
    };

    let rating = item
        .rating_value()
        .filter(|r| r.is_finite())
        .unwrap_or(NEUTRAL_RATING);

    let now = Utc::now();
    Some(ImportedRecord {
        source: target.source.clone(),
        external_id,
        owner_id: target.owner_id,
        source_url: target.source_url.clone(),
        author_name: author.unwrap_or(ANONYMOUS_AUTHOR).to_string(),
        rating,
        text: text.map(str::to_string),
        posted_at: item.posted_at(),
        raw_payload: item.raw.clone(),
        imported_at: now,
        updated_at: now,
    })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Import `items` in batches of `batch_size`.
///
/// Per batch, keys already stored count as skipped and the rest as imported.
/// A batch whose write fails counts entirely as errors; later batches still
/// run. Never fails as a whole.
pub async fn import_items(
    reviews: &dyn ReviewStore,
    items: &[ReviewItem],
    target: &ImportTarget,
    batch_size: usize,
) -> ImportCounts {
    let mut counts = ImportCounts::default();
    for batch in items.chunks(batch_size.max(1)) {
        counts += import_batch(reviews, batch, target).await;
    }
    counts
}

async fn import_batch(
    reviews: &dyn ReviewStore,
    batch: &[ReviewItem],
    target: &ImportTarget,
) -> ImportCounts {
    let mut counts = ImportCounts::default();
    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(batch.len());

    for item in batch {
        match map_review_item(item, target) {
            Some(record) if seen.insert(record.external_id.clone()) => records.push(record),
            Some(record) => {
                debug!(external_id = %record.external_id, "Duplicate review in batch");
                counts.skipped += 1;
            }
            None => {
                warn!(raw = %item.raw, "Review item has no id, author or text");
                counts.errors += 1;
            }
        }
    }

    if records.is_empty() {
        return counts;
    }

    let ids: Vec<String> = records.iter().map(|r| r.external_id.clone()).collect();
    let write = async {
        let existing = execute_with_retry(
            || reviews.existing_external_ids(&target.source, &ids),
            &database_retry(),
        )
        .await?;
        execute_with_retry(|| reviews.upsert_reviews(&records), &database_retry()).await?;
        Ok::<_, crate::common::SyncError>(existing)
    };

    match write.await {
        Ok(existing) => {
            let skipped = records
                .iter()
                .filter(|r| existing.contains(&r.external_id))
                .count() as i64;
            counts.skipped += skipped;
            counts.imported += records.len() as i64 - skipped;
        }
        Err(e) => {
            warn!(
                source_url = %target.source_url,
                batch_size = records.len(),
                error = %e,
                "Review batch write failed"
            );
            counts.errors += records.len() as i64;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::stores::MemoryStore;
    use crate::kernel::test_dependencies::review_json;
    use serde_json::json;

    fn target() -> ImportTarget {
        ImportTarget {
            source: "google".into(),
            owner_id: OwnerId::new(),
            source_url: "https://maps.example.com/place/1".into(),
        }
    }

    fn item(value: serde_json::Value) -> ReviewItem {
        ReviewItem::from_value(value)
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let record = map_review_item(
            &item(json!({"review_id": "abc", "review_text": "Great slice"})),
            &target(),
        )
        .unwrap();
        assert_eq!(record.external_id, "abc");
        assert_eq!(record.author_name, ANONYMOUS_AUTHOR);
        assert_eq!(record.rating, NEUTRAL_RATING);
        assert_eq!(record.posted_at, None);
        assert_eq!(record.raw_payload["review_text"], "Great slice");
    }

    #[test]
    fn test_missing_id_falls_back_to_content_hash() {
        let value = json!({
            "profile_name": "Ann",
            "review_text": "Great slice",
            "timestamp": "2024-03-01 10:00:00 +00:00"
        });
        let a = map_review_item(&item(value.clone()), &target()).unwrap();
        let b = map_review_item(&item(value), &target()).unwrap();
        assert_eq!(a.external_id, b.external_id);
        assert_eq!(a.external_id.len(), 64);

        let other = map_review_item(
            &item(json!({"profile_name": "Ann", "review_text": "Cold slice"})),
            &target(),
        )
        .unwrap();
        assert_ne!(a.external_id, other.external_id);
    }

    #[test]
    fn test_unidentifiable_item_is_rejected() {
        assert!(map_review_item(&item(json!({"rating": {"value": 5.0}})), &target()).is_none());
    }

    #[tokio::test]
    async fn test_second_pass_is_skipped() {
        let store = MemoryStore::new();
        let items: Vec<_> = (0..5)
            .map(|i| item(review_json(&format!("r{}", i), "Ann", 4.0, "ok", Utc::now())))
            .collect();

        let first = import_items(&store, &items, &target(), 2).await;
        assert_eq!(first.imported, 5);
        assert_eq!(store.review_count(), 5);

        let second = import_items(&store, &items, &target(), 2).await;
        assert_eq!(second.imported, 0);
        assert_eq!(second.skipped, 5);
        assert_eq!(store.review_count(), 5);
    }

    #[tokio::test]
    async fn test_duplicates_within_a_batch_are_skipped() {
        let store = MemoryStore::new();
        let one = review_json("dup", "Ann", 4.0, "ok", Utc::now());
        let items = vec![item(one.clone()), item(one)];

        let counts = import_items(&store, &items, &target(), 100).await;
        assert_eq!(counts.imported, 1);
        assert_eq!(counts.skipped, 1);
    }

    #[tokio::test]
    async fn test_failed_batch_counts_as_errors_and_import_continues() {
        let store = MemoryStore::new();
        store.fail_next_review_writes(1);
        let items: Vec<_> = (0..5)
            .map(|i| item(review_json(&format!("r{}", i), "Ann", 4.0, "ok", Utc::now())))
            .collect();

        let counts = import_items(&store, &items, &target(), 3).await;
        assert_eq!(counts.errors, 3);
        assert_eq!(counts.imported, 2);
        assert_eq!(store.review_count(), 2);
    }
}
