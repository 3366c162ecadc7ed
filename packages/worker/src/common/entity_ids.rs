//! Typed ID definitions for the worker's entities.

pub use super::id::Id;

/// Marker type for queue jobs.
pub struct QueueJob;

/// Marker type for import runs.
pub struct SyncRunEntity;

/// Marker type for worker registrations.
pub struct WorkerEntity;

/// Marker type for the account that owns a review source.
pub struct Owner;

pub type JobId = Id<QueueJob>;
pub type SyncRunId = Id<SyncRunEntity>;
pub type WorkerId = Id<WorkerEntity>;
pub type OwnerId = Id<Owner>;
