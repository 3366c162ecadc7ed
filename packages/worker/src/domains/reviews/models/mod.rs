pub mod imported_record;
pub mod sync_run;

pub use imported_record::{ImportedRecord, GOOGLE_SOURCE};
pub use sync_run::{stage, ImportCounts, RunStatus, SyncPhase, SyncRun};
