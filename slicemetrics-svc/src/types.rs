//! Slicer backend abstraction
//!
//! The external slicer is a singular, expensive capability. The engine only
//! talks to it through [`SlicerBackend`], so orchestration can be exercised
//! against a fake process without spawning a real binary.
//!
//! # Example
//! ```rust,ignore
//! use slicemetrics_svc::types::{SlicerBackend, ProcessResult, ProbeReport, SpawnError};
//!
//! pub struct AlwaysFails;
//!
//! #[async_trait::async_trait]
//! impl SlicerBackend for AlwaysFails {
//!     fn name(&self) -> &'static str { "always-fails" }
//!
//!     async fn invoke(&self, _s: &Path, _m: &Path, _o: &Path, _t: Duration)
//!         -> Result<ProcessResult, SpawnError>
//!     {
//!         Ok(ProcessResult::exited(1, "", "bad geometry"))
//!     }
//!
//!     async fn probe(&self) -> ProbeReport { ProbeReport::available("fake") }
//! }
//! ```

use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// How the slicer process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited on its own with a status code
    Exited(i32),
    /// Terminated by a signal not sent by us
    Signaled,
    /// Killed by us after exceeding its timeout; the process has been reaped
    TimedOut,
}

/// A captured stdout/stderr stream, bounded in size
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub text: String,
    /// Bytes dropped beyond the capture ceiling
    pub truncated_bytes: usize,
}

impl CapturedOutput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            truncated_bytes: 0,
        }
    }
}

/// Result of one slicer invocation
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub outcome: ExitOutcome,
    pub stdout: CapturedOutput,
    pub stderr: CapturedOutput,
    pub elapsed: Duration,
}

impl ProcessResult {
    /// Convenience constructor for a process that exited normally
    pub fn exited(code: i32, stdout: &str, stderr: &str) -> Self {
        Self {
            outcome: ExitOutcome::Exited(code),
            stdout: CapturedOutput::new(stdout),
            stderr: CapturedOutput::new(stderr),
            elapsed: Duration::ZERO,
        }
    }

    /// Convenience constructor for a process killed on timeout
    pub fn timed_out(elapsed: Duration) -> Self {
        Self {
            outcome: ExitOutcome::TimedOut,
            stdout: CapturedOutput::default(),
            stderr: CapturedOutput::default(),
            elapsed,
        }
    }
}

/// Liveness probe result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub available: bool,
    pub detail: String,
}

impl ProbeReport {
    pub fn available(detail: impl Into<String>) -> Self {
        Self {
            available: true,
            detail: detail.into(),
        }
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self {
            available: false,
            detail: detail.into(),
        }
    }
}

/// Errors launching or reaping the slicer
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to spawn slicer: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("failed to reap slicer process: {0}")]
    Reap(String),
}

/// The external slicer binary
///
/// Implementations must not return [`ExitOutcome::TimedOut`] while the
/// child process is still alive.
#[async_trait::async_trait]
pub trait SlicerBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Slice `model_path` with `settings_path`, writing G-code to `output_path`
    async fn invoke(
        &self,
        settings_path: &Path,
        model_path: &Path,
        output_path: &Path,
        timeout: Duration,
    ) -> Result<ProcessResult, SpawnError>;

    /// Cheap capability check that does not run a slice
    async fn probe(&self) -> ProbeReport;
}
