//! Job model for background command execution.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::common::{JobId, Result, SyncError, WorkerId};

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    /// Convert to integer for efficient DB ordering (lower = higher priority)
    pub fn as_i16(&self) -> i16 {
        match self {
            JobPriority::Critical => 0,
            JobPriority::High => 1,
            JobPriority::Normal => 2,
            JobPriority::Low => 3,
        }
    }
}

// ============================================================================
// Job Model
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = JobId::new())]
    pub id: JobId,

    pub job_type: String,
    #[builder(default = serde_json::Value::Null)]
    pub payload: serde_json::Value,
    #[builder(default = JobPriority::Normal.as_i16())]
    pub priority: i16,

    #[builder(default)]
    pub status: JobStatus,
    #[builder(default, setter(strip_option))]
    pub worker_id: Option<WorkerId>,
    #[builder(default, setter(strip_option))]
    pub lease_expires_at: Option<DateTime<Utc>>,

    #[builder(default, setter(strip_option))]
    pub idempotency_key: Option<String>,
    #[builder(default = 0)]
    pub attempts: i32,
    #[builder(default, setter(strip_option))]
    pub error_message: Option<String>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Materialize a pending job from an enqueue request.
    pub fn from_new(new: NewJob) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            job_type: new.job_type,
            payload: new.payload,
            priority: new.priority.as_i16(),
            status: JobStatus::Pending,
            worker_id: None,
            lease_expires_at: None,
            idempotency_key: new.idempotency_key,
            attempts: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Deserialize the command payload.
    pub fn deserialize<C: DeserializeOwned>(&self) -> Result<C> {
        serde_json::from_value(self.payload.clone()).map_err(SyncError::InvalidPayload)
    }

    /// A running job whose lease has lapsed.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Running && self.lease_expires_at.is_some_and(|at| at < now)
    }

    /// True while `worker_id` holds the current claim.
    pub fn is_running_on(&self, worker_id: WorkerId) -> bool {
        self.status == JobStatus::Running && self.worker_id == Some(worker_id)
    }
}

// ============================================================================
// Enqueueing
// ============================================================================

/// Metadata for command serialization.
///
/// Commands implement this to provide the job type and an optional
/// idempotency key.
pub trait CommandMeta {
    /// The command type name (used as job_type).
    fn command_type(&self) -> &'static str;

    /// If provided, at most one job ever exists with this key.
    fn idempotency_key(&self) -> Option<String> {
        None
    }

    fn priority(&self) -> JobPriority {
        JobPriority::Normal
    }
}

/// A job to be inserted.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: String,
    pub payload: serde_json::Value,
    pub priority: JobPriority,
    pub idempotency_key: Option<String>,
}

impl NewJob {
    pub fn for_command<C: Serialize + CommandMeta>(command: &C) -> Result<Self> {
        Ok(Self {
            job_type: command.command_type().to_string(),
            payload: serde_json::to_value(command).map_err(SyncError::InvalidPayload)?,
            priority: command.priority(),
            idempotency_key: command.idempotency_key(),
        })
    }
}

/// Result type for enqueue operations that handles idempotency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Job was inserted
    Created(JobId),
    /// A job with the same idempotency key already exists
    Duplicate(JobId),
}

impl EnqueueResult {
    pub fn job_id(&self) -> JobId {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Duplicate(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}
