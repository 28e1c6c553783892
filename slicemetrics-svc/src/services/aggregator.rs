//! Job metrics aggregation and cleanup
//!
//! Turns a finished job's artifact into [`SliceMetrics`] and tears down
//! everything the job left on disk. Cleanup can be called any number of
//! times; only the first call does anything.

use crate::models::{SliceJob, SliceMetrics};
use crate::services::job_workspace::JobWorkspace;
use crate::services::output_parser::{OutputParser, ParseError};
use tracing::{debug, warn};

/// What a cleanup call actually removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub artifact_removed: bool,
    pub workspace_released: bool,
}

#[derive(Debug, Clone, Default)]
pub struct JobAggregator {
    parser: OutputParser,
}

impl JobAggregator {
    pub fn new(parser: OutputParser) -> Self {
        Self { parser }
    }

    pub fn parser(&self) -> &OutputParser {
        &self.parser
    }

    /// Parse the job's artifact, then remove it
    ///
    /// The artifact is removed whether or not parsing succeeds.
    pub async fn aggregate(&self, job: &mut SliceJob) -> Result<SliceMetrics, ParseError> {
        let Some(artifact) = job.take_artifact() else {
            return Err(ParseError::NoMetricsFound);
        };

        let result = self.parser.parse(&artifact).await;
        remove_artifact(&artifact).await;

        if let Ok(metrics) = &result {
            debug!(
                job_id = %job.id,
                volume_mm3 = ?metrics.volume_mm3,
                print_time_s = ?metrics.print_time_s,
                "Metrics captured"
            );
        }
        result
    }

    /// Remove the artifact (if still present) and release the workspace
    pub async fn cleanup(&self, job: &mut SliceJob, workspace: &mut JobWorkspace) -> CleanupReport {
        let mut report = CleanupReport::default();

        if let Some(artifact) = job.take_artifact() {
            report.artifact_removed = remove_artifact(&artifact).await;
        }

        match workspace.release().await {
            Ok(released) => report.workspace_released = released,
            Err(e) => warn!(
                job_id = %job.id,
                path = %workspace.path().display(),
                error = %e,
                "Failed to release job workspace"
            ),
        }

        if report.workspace_released {
            debug!(job_id = %job.id, "Job workspace released");
        }
        report
    }
}

async fn remove_artifact(path: &std::path::Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove slicer output");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobState;
    use tempfile::TempDir;

    async fn job_with_artifact(root: &TempDir, gcode: &str) -> (SliceJob, JobWorkspace) {
        let mut job = SliceJob::new();
        let workspace = JobWorkspace::create(root.path(), job.id).await.unwrap();
        std::fs::write(workspace.artifact_path(), gcode).unwrap();
        job.transition(JobState::Running).unwrap();
        job.set_artifact(workspace.artifact_path());
        (job, workspace)
    }

    #[tokio::test]
    async fn test_aggregate_removes_artifact() {
        let root = TempDir::new().unwrap();
        let (mut job, workspace) = job_with_artifact(&root, "; filament used [mm3] = 321\n").await;
        let artifact = workspace.artifact_path();

        let metrics = JobAggregator::default().aggregate(&mut job).await.unwrap();

        assert_eq!(metrics.volume_mm3, Some(321.0));
        assert!(!artifact.exists());
        assert!(job.artifact().is_none());
    }

    #[tokio::test]
    async fn test_aggregate_removes_artifact_on_parse_failure() {
        let root = TempDir::new().unwrap();
        let (mut job, workspace) = job_with_artifact(&root, "G28\n").await;
        let artifact = workspace.artifact_path();

        let err = JobAggregator::default().aggregate(&mut job).await.unwrap_err();

        assert!(matches!(err, ParseError::NoMetricsFound));
        assert!(!artifact.exists());
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let root = TempDir::new().unwrap();
        let (mut job, mut workspace) = job_with_artifact(&root, "; partial").await;
        let aggregator = JobAggregator::default();

        let first = aggregator.cleanup(&mut job, &mut workspace).await;
        assert!(first.artifact_removed);
        assert!(first.workspace_released);
        assert!(!workspace.path().exists());

        let second = aggregator.cleanup(&mut job, &mut workspace).await;
        assert_eq!(second, CleanupReport::default());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
