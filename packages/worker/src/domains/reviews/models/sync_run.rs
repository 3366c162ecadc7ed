use std::ops::{Add, AddAssign};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::common::{OwnerId, SyncRunId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "sync_phase", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// Phase 1: small synchronous sample
    QuickSample,
    /// Phase 2: chunked background import of the remainder
    Backfill,
    /// Phase 3: newest reviews since the last import
    Incremental,
}

impl SyncPhase {
    pub fn number(&self) -> u8 {
        match self {
            SyncPhase::QuickSample => 1,
            SyncPhase::Backfill => 2,
            SyncPhase::Incremental => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "sync_run_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// Stage labels written to `SyncRun::stage`.
pub mod stage {
    pub const INITIALIZING: &str = "initializing";
    pub const COUNTING: &str = "counting";
    pub const FETCHING: &str = "fetching";
    pub const IMPORTING: &str = "importing";
    pub const PHASE_1_COMPLETE: &str = "phase_1_complete";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";

    /// `fetching` / `importing` with the chunk position, e.g. `fetching 2/3`.
    pub fn chunk(label: &str, index: usize, total: usize) -> String {
        format!("{} {}/{}", label, index, total)
    }
}

/// Outcome counts of one import batch, chunk or run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImportCounts {
    pub imported: i64,
    pub skipped: i64,
    pub errors: i64,
}

impl ImportCounts {
    pub fn total(&self) -> i64 {
        self.imported + self.skipped + self.errors
    }
}

impl Add for ImportCounts {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            imported: self.imported + rhs.imported,
            skipped: self.skipped + rhs.skipped,
            errors: self.errors + rhs.errors,
        }
    }
}

impl AddAssign for ImportCounts {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Progress record of one import for one business.
///
/// Phase 1 and Phase 2 share a run; Phase 3 gets its own.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: SyncRunId,
    pub owner_id: OwnerId,
    pub source_url: String,
    pub business_name: String,
    pub phase: SyncPhase,
    pub status: RunStatus,
    pub stage: String,
    pub progress_percent: i32,
    pub total_available: Option<i64>,
    pub imported_count: i64,
    pub skipped_count: i64,
    pub error_count: i64,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SyncRun {
    pub fn new(
        owner_id: OwnerId,
        source_url: impl Into<String>,
        business_name: impl Into<String>,
        phase: SyncPhase,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SyncRunId::new(),
            owner_id,
            source_url: source_url.into(),
            business_name: business_name.into(),
            phase,
            status: RunStatus::Running,
            stage: stage::INITIALIZING.to_string(),
            progress_percent: 0,
            total_available: None,
            imported_count: 0,
            skipped_count: 0,
            error_count: 0,
            error_message: None,
            started_at: now,
            completed_at: None,
            updated_at: now,
        }
    }

    pub fn counts(&self) -> ImportCounts {
        ImportCounts {
            imported: self.imported_count,
            skipped: self.skipped_count,
            errors: self.error_count,
        }
    }

    /// Records accounted for so far, whatever their outcome.
    pub fn processed(&self) -> i64 {
        self.counts().total()
    }

    /// How many more records fit under `total_available`. `None` when the
    /// total is unknown.
    pub fn remaining_capacity(&self) -> Option<i64> {
        self.total_available
            .map(|total| (total - self.processed()).max(0))
    }

    pub fn add_counts(&mut self, counts: ImportCounts) {
        self.imported_count += counts.imported;
        self.skipped_count += counts.skipped;
        self.error_count += counts.errors;
        self.touch();
    }

    /// Raise progress to `percent`. Never lowers it and clamps to 0..=100.
    pub fn advance_progress(&mut self, percent: f64) {
        let percent = if percent.is_finite() {
            percent.clamp(0.0, 100.0) as i32
        } else {
            0
        };
        if percent > self.progress_percent {
            self.progress_percent = percent;
            self.touch();
        }
    }

    /// Progress from processed records over the known total.
    pub fn import_percent(&self) -> Option<f64> {
        match self.total_available {
            Some(total) if total > 0 => Some(self.processed() as f64 * 100.0 / total as f64),
            _ => None,
        }
    }

    pub fn set_stage(&mut self, stage: impl Into<String>) {
        self.stage = stage.into();
        self.touch();
    }

    pub fn mark_completed(&mut self) {
        let now = Utc::now();
        self.status = RunStatus::Completed;
        self.stage = stage::COMPLETED.to_string();
        self.progress_percent = 100;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) {
        let now = Utc::now();
        self.status = RunStatus::Failed;
        self.stage = stage::FAILED.to_string();
        self.error_message = Some(message.into());
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> SyncRun {
        SyncRun::new(
            OwnerId::new(),
            "https://maps.example.com/place/1",
            "Joe's Pizza",
            SyncPhase::QuickSample,
        )
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut run = run();
        run.advance_progress(40.0);
        run.advance_progress(25.0);
        assert_eq!(run.progress_percent, 40);
        run.advance_progress(250.0);
        assert_eq!(run.progress_percent, 100);
        run.advance_progress(f64::NAN);
        assert_eq!(run.progress_percent, 100);
    }

    #[test]
    fn test_remaining_capacity_tracks_all_outcomes() {
        let mut run = run();
        assert_eq!(run.remaining_capacity(), None);

        run.total_available = Some(12);
        run.add_counts(ImportCounts {
            imported: 6,
            skipped: 3,
            errors: 1,
        });
        assert_eq!(run.processed(), 10);
        assert_eq!(run.remaining_capacity(), Some(2));

        run.add_counts(ImportCounts {
            imported: 5,
            ..Default::default()
        });
        assert_eq!(run.remaining_capacity(), Some(0));
    }

    #[test]
    fn test_terminal_transitions() {
        let mut run = run();
        run.mark_failed("remote task failed");
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("remote task failed"));
        assert!(run.completed_at.is_some());

        let mut run = self::run();
        run.mark_completed();
        assert_eq!(run.progress_percent, 100);
        assert!(run.status.is_terminal());
    }
}
