//! Background commands of the reviews domain.
//!
//! Each variant is one job type on the queue. The payload column holds the
//! variant's request serialized on its own.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::common::{OwnerId, Result, SyncError, SyncRunId};
use crate::kernel::jobs::{CommandMeta, Job, JobPriority, NewJob};

pub const QUICK_SAMPLE_JOB: &str = "reviews.quick_sample";
pub const BACKFILL_JOB: &str = "reviews.backfill";
pub const INCREMENTAL_JOB: &str = "reviews.incremental";

/// Which business to import, and for whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub owner_id: OwnerId,
    pub source_url: String,
    pub business_name: String,
}

impl SyncRequest {
    pub fn new(
        owner_id: OwnerId,
        source_url: impl Into<String>,
        business_name: impl Into<String>,
    ) -> Self {
        Self {
            owner_id,
            source_url: source_url.into(),
            business_name: business_name.into(),
        }
    }

    /// Reject requests that could never produce a useful run.
    pub fn validate(&self) -> Result<()> {
        if self.owner_id.is_nil() {
            return Err(SyncError::Validation("owner id is required".into()));
        }
        if self.business_name.trim().is_empty() {
            return Err(SyncError::Validation("business name is required".into()));
        }

        let url = Url::parse(self.source_url.trim())
            .map_err(|e| SyncError::Validation(format!("invalid source url: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SyncError::Validation(format!(
                "source url must be http(s), got {}",
                url.scheme()
            )));
        }
        Ok(())
    }
}

/// Continue a Phase 1 run in the background.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillRequest {
    pub run_id: SyncRunId,
    pub owner_id: OwnerId,
    pub source_url: String,
    pub business_name: String,
    pub total_available: i64,
    /// Position in the provider's listing to continue from
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewJob {
    QuickSample(SyncRequest),
    Backfill(BackfillRequest),
    Incremental(SyncRequest),
}

impl ReviewJob {
    pub fn job_types() -> Vec<String> {
        vec![
            QUICK_SAMPLE_JOB.to_string(),
            BACKFILL_JOB.to_string(),
            INCREMENTAL_JOB.to_string(),
        ]
    }

    /// Decode a claimed job. Unknown types and bad payloads are rejected.
    pub fn from_job(job: &Job) -> Result<Self> {
        match job.job_type.as_str() {
            QUICK_SAMPLE_JOB => Ok(ReviewJob::QuickSample(job.deserialize()?)),
            BACKFILL_JOB => Ok(ReviewJob::Backfill(job.deserialize()?)),
            INCREMENTAL_JOB => Ok(ReviewJob::Incremental(job.deserialize()?)),
            other => Err(SyncError::UnknownJobType(other.to_string())),
        }
    }

    pub fn to_new_job(&self) -> Result<NewJob> {
        match self {
            ReviewJob::QuickSample(req) => NewJob::for_command(&QuickSampleCommand(req)),
            ReviewJob::Backfill(req) => NewJob::for_command(req),
            ReviewJob::Incremental(req) => NewJob::for_command(&IncrementalCommand(req)),
        }
    }
}

impl CommandMeta for BackfillRequest {
    fn command_type(&self) -> &'static str {
        BACKFILL_JOB
    }

    /// One backfill per run, ever.
    fn idempotency_key(&self) -> Option<String> {
        Some(format!("phase2:{}", self.run_id))
    }

    fn priority(&self) -> JobPriority {
        JobPriority::Low
    }
}

#[derive(Serialize)]
#[serde(transparent)]
struct QuickSampleCommand<'a>(&'a SyncRequest);

impl CommandMeta for QuickSampleCommand<'_> {
    fn command_type(&self) -> &'static str {
        QUICK_SAMPLE_JOB
    }

    fn priority(&self) -> JobPriority {
        JobPriority::High
    }
}

#[derive(Serialize)]
#[serde(transparent)]
struct IncrementalCommand<'a>(&'a SyncRequest);

impl CommandMeta for IncrementalCommand<'_> {
    fn command_type(&self) -> &'static str {
        INCREMENTAL_JOB
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SyncRequest {
        SyncRequest::new(
            OwnerId::new(),
            "https://www.google.com/maps/place/Joes+Pizza",
            "Joe's Pizza",
        )
    }

    #[test]
    fn test_validation() {
        assert!(request().validate().is_ok());

        let mut bad = request();
        bad.owner_id = OwnerId::nil();
        assert!(matches!(bad.validate(), Err(SyncError::Validation(_))));

        let mut bad = request();
        bad.business_name = "   ".into();
        assert!(matches!(bad.validate(), Err(SyncError::Validation(_))));

        for url in ["not a url", "ftp://example.com/x", ""] {
            let mut bad = request();
            bad.source_url = url.into();
            assert!(
                matches!(bad.validate(), Err(SyncError::Validation(_))),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn test_job_payload_decodes_back() {
        let job = ReviewJob::Incremental(request());
        let stored = Job::from_new(job.to_new_job().unwrap());
        assert_eq!(stored.job_type, INCREMENTAL_JOB);
        assert_eq!(ReviewJob::from_job(&stored).unwrap(), job);
    }

    #[test]
    fn test_backfill_is_keyed_by_run() {
        let req = BackfillRequest {
            run_id: SyncRunId::new(),
            owner_id: OwnerId::new(),
            source_url: "https://x.test".into(),
            business_name: "X".into(),
            total_available: 1210,
            offset: 10,
        };
        let new = ReviewJob::Backfill(req.clone()).to_new_job().unwrap();
        assert_eq!(
            new.idempotency_key,
            Some(format!("phase2:{}", req.run_id))
        );
    }

    #[test]
    fn test_unknown_type_and_bad_payload_are_rejected() {
        let job = Job::builder().job_type("reviews.unknown").build();
        assert!(matches!(
            ReviewJob::from_job(&job),
            Err(SyncError::UnknownJobType(_))
        ));

        let job = Job::builder()
            .job_type(BACKFILL_JOB)
            .payload(serde_json::json!({"run_id": 5}))
            .build();
        assert!(matches!(
            ReviewJob::from_job(&job),
            Err(SyncError::InvalidPayload(_))
        ));
    }
}
