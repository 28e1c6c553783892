//! Slice job state machine
//!
//! ```text
//! Queued ──► Running ──► Succeeded
//!   │           ├──────► Failed
//!   │           └──────► TimedOut
//!   ├──────────────────► Failed     (rejected admission, bad upload, unknown profile)
//!   └──────────────────► TimedOut   (deadline expired while queued)
//! ```
//!
//! Terminal states are final; any transition out of them is rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::TimedOut)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Failed)
                | (Queued, TimedOut)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, TimedOut)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid job transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

/// One slicing submission
#[derive(Debug)]
pub struct SliceJob {
    pub id: Uuid,
    state: JobState,
    pub submitted_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    artifact: Option<PathBuf>,
}

impl SliceJob {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: JobState::Queued,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            artifact: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Move to `next`, stamping start/end times
    pub fn transition(&mut self, next: JobState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        let now = Utc::now();
        if next == JobState::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }

        tracing::debug!(job_id = %self.id, from = ?self.state, to = ?next, "Job state change");
        self.state = next;
        Ok(())
    }

    pub fn artifact(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }

    pub fn set_artifact(&mut self, path: PathBuf) {
        self.artifact = Some(path);
    }

    /// Hand the artifact path to whoever removes the file
    pub fn take_artifact(&mut self) -> Option<PathBuf> {
        self.artifact.take()
    }

    /// Milliseconds from submission to the terminal transition (or now)
    pub fn elapsed_ms(&self) -> u64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        end.signed_duration_since(self.submitted_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

impl Default for SliceJob {
    fn default() -> Self {
        Self::new()
    }
}
