use crate::domain::model::{BatchSummary, QuarantinedRow};
use crate::utils::error::{EtlError, ErrorKind};
use crate::utils::monitor::StageTiming;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Extract,
    Transform,
    Load,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Extract => write!(f, "extract"),
            Stage::Transform => write!(f, "transform"),
            Stage::Load => write!(f, "load"),
        }
    }
}

/// `PENDING → EXTRACTING → TRANSFORMING → LOADING → SUCCEEDED`; every
/// non-terminal state may also move to `FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Extracting,
    Transforming,
    Loading,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }

    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        match (self, next) {
            (Pending, Extracting)
            | (Extracting, Transforming)
            | (Transforming, Loading)
            | (Loading, Succeeded) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn stage(self) -> Option<Stage> {
        match self {
            RunStatus::Extracting => Some(Stage::Extract),
            RunStatus::Transforming => Some(Stage::Transform),
            RunStatus::Loading => Some(Stage::Load),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Extracting => "EXTRACTING",
            RunStatus::Transforming => "TRANSFORMING",
            RunStatus::Loading => "LOADING",
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Outcome of one run, handed back to the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub rows_extracted: u64,
    pub rows_quarantined: u64,
    pub rows_loaded: u64,
    pub failed_stage: Option<Stage>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    /// Safe to trigger again; loads are idempotent upserts.
    pub retryable: bool,
    pub summary: BatchSummary,
    pub quarantined: Vec<QuarantinedRow>,
    pub stage_timings: Vec<StageTiming>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// Mutable bookkeeping while a run is in flight.
#[derive(Debug)]
pub(crate) struct RunState {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub rows_extracted: u64,
    pub rows_quarantined: u64,
    pub rows_loaded: u64,
    pub summary: BatchSummary,
    pub quarantined: Vec<QuarantinedRow>,
    started_at: DateTime<Utc>,
}

impl RunState {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            status: RunStatus::Pending,
            rows_extracted: 0,
            rows_quarantined: 0,
            rows_loaded: 0,
            summary: BatchSummary::default(),
            quarantined: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn advance(&mut self, next: RunStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal run transition {} -> {}",
            self.status,
            next
        );
        tracing::debug!(run_id = %self.run_id, "{} -> {}", self.status, next);
        self.status = next;
    }

    pub fn finish(mut self, outcome: Result<(), EtlError>, stage_timings: Vec<StageTiming>) -> RunResult {
        let (failed_stage, error) = match outcome {
            Ok(()) => {
                self.advance(RunStatus::Succeeded);
                (None, None)
            }
            Err(e) => {
                let stage = self.status.stage();
                self.advance(RunStatus::Failed);
                (stage, Some(e))
            }
        };

        RunResult {
            run_id: self.run_id,
            status: self.status,
            rows_extracted: self.rows_extracted,
            rows_quarantined: self.rows_quarantined,
            rows_loaded: self.rows_loaded,
            failed_stage,
            error_kind: error.as_ref().map(EtlError::kind),
            error_message: error.as_ref().map(ToString::to_string),
            retryable: error.as_ref().map(EtlError::is_retryable).unwrap_or(false),
            summary: self.summary,
            quarantined: self.quarantined,
            stage_timings,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}
