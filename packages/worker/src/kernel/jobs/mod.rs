//! Job infrastructure for background command execution.
//!
//! This module provides the kernel-level infrastructure for job execution:
//! - [`Job`] - Job model and enqueue types
//! - [`WorkerPool`] - Long-running service that claims and executes jobs
//! - [`WorkerRegistration`] - Worker liveness record
//!
//! # Architecture
//!
//! ```text
//! Domain code builds a command
//!     │
//!     └─► JobQueue.enqueue(NewJob::for_command(&cmd))
//!
//! WorkerPool
//!     │
//!     ├─► Poll queue (claim_next, FOR UPDATE SKIP LOCKED)
//!     ├─► JobHandler.handle(job)
//!     └─► Mark succeeded/failed
//! ```
//!
//! Commands and handlers live in their domains. This module only provides the
//! infrastructure.

mod job;
mod registration;
mod worker;

pub use job::{CommandMeta, EnqueueResult, Job, JobPriority, JobStatus, NewJob};
pub use registration::{WorkerRegistration, WorkerState};
pub use worker::{
    ActiveJobSnapshot, JobHandler, WorkerConfig, WorkerPool, WorkerStatus, SHUTDOWN_REASON,
};
