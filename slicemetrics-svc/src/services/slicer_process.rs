//! Slicer process manager
//!
//! Runs one job through the slicer: admission, settings file, invocation and
//! exit classification. The admission permit is held until the backend
//! returns, which only happens after the child has been reaped, so the
//! number of live slicer processes never exceeds the pool capacity.

use crate::models::{JobState, SliceJob, StagedModel};
use crate::services::admission::{AdmissionError, AdmissionPool};
use crate::services::job_workspace::JobWorkspace;
use crate::services::profile_resolver::ResolvedSettings;
use crate::services::settings_file::write_settings;
use crate::types::{ExitOutcome, SlicerBackend, SpawnError};
use slicemetrics_common::config::{SettingsFormat, SlicerConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Tail of stderr kept for diagnostics
pub const STDERR_EXCERPT_BYTES: usize = 512;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("slicer overloaded: {capacity} running, {queued} queued")]
    Overloaded { capacity: usize, queued: usize },

    #[error("slicer failed ({reason}, exit code {exit_code:?})")]
    Failed {
        exit_code: Option<i32>,
        reason: String,
        stderr_excerpt: String,
    },

    #[error("slicer timed out after {0:?}")]
    TimedOut(Duration),

    #[error("failed to launch slicer: {0}")]
    Launch(String),

    #[error("job workspace error: {0}")]
    Workspace(#[from] std::io::Error),
}

pub struct SlicerProcessManager {
    backend: Arc<dyn SlicerBackend>,
    admission: AdmissionPool,
    settings_format: SettingsFormat,
    harden: bool,
}

impl SlicerProcessManager {
    pub fn new(
        backend: Arc<dyn SlicerBackend>,
        admission: AdmissionPool,
        settings_format: SettingsFormat,
        harden: bool,
    ) -> Self {
        Self {
            backend,
            admission,
            settings_format,
            harden,
        }
    }

    pub fn from_config(backend: Arc<dyn SlicerBackend>, admission: AdmissionPool, config: &SlicerConfig) -> Self {
        Self::new(backend, admission, config.settings_format, config.harden_settings)
    }

    pub fn backend(&self) -> &Arc<dyn SlicerBackend> {
        &self.backend
    }

    pub fn admission(&self) -> &AdmissionPool {
        &self.admission
    }

    /// Slice `model` with `settings`, returning the artifact path
    ///
    /// `timeout` runs from admission: time spent queued for a slot is taken
    /// out of the time the slicer gets. On success the job is `Running` and
    /// its artifact is set; terminal transitions are left to the caller.
    pub async fn run(
        &self,
        job: &mut SliceJob,
        settings: &ResolvedSettings,
        model: &StagedModel,
        workspace: &JobWorkspace,
        timeout: Duration,
    ) -> Result<PathBuf, ProcessError> {
        let deadline = Instant::now() + timeout;

        let permit = self.admission.acquire(deadline).await.map_err(|e| match e {
            AdmissionError::Overloaded { capacity, queued } => ProcessError::Overloaded { capacity, queued },
            AdmissionError::DeadlineExpired { waited_ms } => {
                warn!(job_id = %job.id, waited_ms, "Deadline expired while queued for slicer");
                ProcessError::TimedOut(timeout)
            }
            AdmissionError::Closed => ProcessError::Launch("admission pool closed".to_string()),
        })?;

        if !permit.waited().is_zero() {
            debug!(job_id = %job.id, waited_ms = permit.waited().as_millis() as u64, "Slicer slot granted");
        }

        job.transition(JobState::Running)
            .map_err(|e| ProcessError::Launch(e.to_string()))?;

        let settings_path = workspace.settings_path(self.settings_format);
        write_settings(settings, self.settings_format, self.harden, &settings_path).await?;

        let artifact = workspace.artifact_path();
        job.set_artifact(artifact.clone());

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ProcessError::TimedOut(timeout));
        }

        info!(
            job_id = %job.id,
            backend = self.backend.name(),
            timeout_ms = remaining.as_millis() as u64,
            "Starting slicer"
        );

        let result = self
            .backend
            .invoke(&settings_path, &model.path, &artifact, remaining)
            .await
            .map_err(|e| match e {
                SpawnError::Spawn(io) => ProcessError::Launch(io.to_string()),
                SpawnError::Reap(msg) => ProcessError::Launch(msg),
            });
        drop(permit);
        let result = result?;

        let excerpt = stderr_excerpt(&result.stderr.text);
        match result.outcome {
            ExitOutcome::TimedOut => {
                warn!(job_id = %job.id, elapsed_ms = result.elapsed.as_millis() as u64, "Slicer timed out");
                discard_partial(&artifact).await;
                Err(ProcessError::TimedOut(timeout))
            }
            ExitOutcome::Signaled => {
                error!(job_id = %job.id, stderr = %excerpt, "Slicer terminated by signal");
                discard_partial(&artifact).await;
                Err(ProcessError::Failed {
                    exit_code: None,
                    reason: "terminated-by-signal".to_string(),
                    stderr_excerpt: excerpt,
                })
            }
            ExitOutcome::Exited(code) if code != 0 => {
                error!(job_id = %job.id, exit_code = code, stderr = %excerpt, "Slicer exited with error");
                discard_partial(&artifact).await;
                Err(ProcessError::Failed {
                    exit_code: Some(code),
                    reason: "nonzero-exit".to_string(),
                    stderr_excerpt: excerpt,
                })
            }
            ExitOutcome::Exited(_) => {
                let size = tokio::fs::metadata(&artifact).await.map(|m| m.len()).unwrap_or(0);
                if size == 0 {
                    error!(job_id = %job.id, "Slicer exited cleanly but produced no output");
                    return Err(ProcessError::Failed {
                        exit_code: Some(0),
                        reason: "no-output".to_string(),
                        stderr_excerpt: excerpt,
                    });
                }

                info!(
                    job_id = %job.id,
                    elapsed_ms = result.elapsed.as_millis() as u64,
                    artifact_bytes = size,
                    "Slicer finished"
                );
                Ok(artifact)
            }
        }
    }
}

/// Last `STDERR_EXCERPT_BYTES` of stderr, cut on a char boundary
pub fn stderr_excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim_end();
    if trimmed.len() <= STDERR_EXCERPT_BYTES {
        return trimmed.to_string();
    }

    let mut start = trimmed.len() - STDERR_EXCERPT_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

/// Partial output must never be parsed
async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Discarded partial slicer output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to discard partial output"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ModelFormat, Overrides, Profile, ProfileKind};
    use crate::services::profile_resolver::resolve;
    use crate::services::profile_store::ProfileStore;
    use crate::types::{ProbeReport, ProcessResult};
    use async_trait::async_trait;
    use slicemetrics_common::config::AdmissionPolicy;
    use tempfile::TempDir;

    /// Writes `gcode` to the output path and exits with `code`, or dies
    /// from a signal when `signaled` is set
    struct ScriptedSlicer {
        gcode: &'static str,
        code: i32,
        stderr: &'static str,
        signaled: bool,
    }

    impl ScriptedSlicer {
        fn exiting(gcode: &'static str, code: i32, stderr: &'static str) -> Self {
            Self {
                gcode,
                code,
                stderr,
                signaled: false,
            }
        }
    }

    #[async_trait]
    impl SlicerBackend for ScriptedSlicer {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn invoke(&self, _s: &Path, _m: &Path, output: &Path, _t: Duration) -> Result<ProcessResult, SpawnError> {
            tokio::fs::write(output, self.gcode).await?;
            if self.signaled {
                let mut result = ProcessResult::exited(0, "", self.stderr);
                result.outcome = ExitOutcome::Signaled;
                return Ok(result);
            }
            Ok(ProcessResult::exited(self.code, "", self.stderr))
        }

        async fn probe(&self) -> ProbeReport {
            ProbeReport::available("scripted")
        }
    }

    fn settings() -> ResolvedSettings {
        let store = ProfileStore::from_profiles(ProfileKind::ALL.iter().map(|kind| Profile {
            kind: *kind,
            name: "default".to_string(),
            settings: Default::default(),
            source: PathBuf::from("default.json"),
        }))
        .unwrap();
        resolve(&store, "default", "default", "default", &Overrides::new()).unwrap()
    }

    async fn run_with(
        backend: ScriptedSlicer,
    ) -> (Result<PathBuf, ProcessError>, SliceJob, JobWorkspace, TempDir) {
        let root = TempDir::new().unwrap();
        let mut job = SliceJob::new();
        let workspace = JobWorkspace::create(root.path(), job.id).await.unwrap();
        let model_path = workspace.model_path(ModelFormat::Stl);
        std::fs::write(&model_path, "solid x\nendsolid x\n").unwrap();
        let model = StagedModel {
            original_filename: "x.stl".to_string(),
            sha256: String::new(),
            path: model_path,
            size_bytes: 19,
            format: ModelFormat::Stl,
        };

        let manager = SlicerProcessManager::new(
            Arc::new(backend),
            AdmissionPool::new(1, AdmissionPolicy::Reject, 0),
            SettingsFormat::Ini,
            true,
        );
        let result = manager
            .run(&mut job, &settings(), &model, &workspace, Duration::from_secs(5))
            .await;
        (result, job, workspace, root)
    }

    #[tokio::test]
    async fn test_success_returns_artifact() {
        let (result, job, _ws, _root) = run_with(ScriptedSlicer::exiting("; filament used [mm3] = 10\n", 0, "")).await;

        let artifact = result.unwrap();
        assert!(artifact.exists());
        assert_eq!(job.state(), JobState::Running);
        assert_eq!(job.artifact(), Some(artifact.as_path()));
        assert!(artifact.with_file_name("settings.ini").exists());
    }

    #[tokio::test]
    async fn test_nonzero_exit_discards_output() {
        let (result, job, _ws, _root) = run_with(ScriptedSlicer::exiting(
            "; partial",
            3,
            "Error: object is outside the print area",
        ))
        .await;

        match result.unwrap_err() {
            ProcessError::Failed {
                exit_code,
                reason,
                stderr_excerpt,
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(reason, "nonzero-exit");
                assert!(stderr_excerpt.contains("outside the print area"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!job.artifact().unwrap().exists());
    }

    #[tokio::test]
    async fn test_clean_exit_without_output_is_failure() {
        let (result, _job, _ws, _root) = run_with(ScriptedSlicer::exiting("", 0, "")).await;

        assert!(matches!(
            result.unwrap_err(),
            ProcessError::Failed { reason, exit_code: Some(0), .. } if reason == "no-output"
        ));
    }

    #[tokio::test]
    async fn test_signal_death_discards_output() {
        let (result, job, _ws, _root) = run_with(ScriptedSlicer {
            signaled: true,
            ..ScriptedSlicer::exiting("; partial", 0, "Segmentation fault")
        })
        .await;

        match result.unwrap_err() {
            ProcessError::Failed {
                exit_code,
                reason,
                stderr_excerpt,
            } => {
                assert_eq!(exit_code, None);
                assert_eq!(reason, "terminated-by-signal");
                assert!(stderr_excerpt.contains("Segmentation fault"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!job.artifact().unwrap().exists());
    }

    #[test]
    fn test_stderr_excerpt_keeps_tail() {
        let long = format!("{}END", "x".repeat(2000));
        let excerpt = stderr_excerpt(&long);
        assert_eq!(excerpt.len(), STDERR_EXCERPT_BYTES);
        assert!(excerpt.ends_with("END"));

        // Multi-byte characters never get split
        let wide = "é".repeat(600);
        let excerpt = stderr_excerpt(&wide);
        assert!(excerpt.len() <= STDERR_EXCERPT_BYTES);
        assert!(excerpt.chars().all(|c| c == 'é'));
    }
}
