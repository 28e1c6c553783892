//! Slice orchestration
//!
//! `submit` drives one job through every stage:
//!
//! 1. resolve the profile selection
//! 2. create the job workspace
//! 3. stage the upload
//! 4. admit and run the slicer
//! 5. parse the artifact
//!
//! Any stage failure short-circuits into a [`SliceError`]. The workspace is
//! cleaned up exactly once, on every path, before the job's terminal
//! transition.

use crate::error::SliceError;
use crate::models::{JobState, ModelSummary, Overrides, SliceJob, SliceMetrics, SliceReport, StagedModel};
use crate::services::admission::AdmissionPool;
use crate::services::aggregator::JobAggregator;
use crate::services::job_workspace::JobWorkspace;
use crate::services::model_stager::stage_model;
use crate::services::output_parser::OutputParser;
use crate::services::profile_resolver::{resolve, ResolvedSettings};
use crate::services::profile_store::{ProfileDirs, ProfileLoadError, ProfileStore};
use crate::services::slicer_process::SlicerProcessManager;
use crate::types::{ProbeReport, SlicerBackend};
use slicemetrics_common::config::TomlConfig;
use slicemetrics_common::human_time::format_print_time;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::sync::RwLock;
use tracing::{error, info, warn, Instrument};

/// One slicing submission
#[derive(Debug)]
pub struct SliceRequest<R> {
    /// Upload stream
    pub model: R,
    /// Declared filename; its extension selects the model format
    pub filename: String,
    pub printer: String,
    pub process: String,
    pub filament: String,
    pub overrides: Overrides,
}

pub struct SliceService {
    profiles: RwLock<Arc<ProfileStore>>,
    profile_dirs: ProfileDirs,
    process: SlicerProcessManager,
    aggregator: JobAggregator,
    work_dir: PathBuf,
    max_upload_bytes: u64,
    timeout: Duration,
}

impl SliceService {
    pub fn new(config: &TomlConfig, store: ProfileStore, backend: Arc<dyn SlicerBackend>) -> Self {
        let admission = AdmissionPool::from_config(&config.admission);
        Self {
            profiles: RwLock::new(Arc::new(store)),
            profile_dirs: ProfileDirs::from(&config.profiles),
            process: SlicerProcessManager::from_config(backend, admission, &config.slicer),
            aggregator: JobAggregator::new(OutputParser::new(config.markers.clone())),
            work_dir: config.work_dir.clone(),
            max_upload_bytes: config.upload.max_bytes,
            timeout: Duration::from_secs(config.slicer.timeout_secs),
        }
    }

    /// Current profile snapshot
    pub async fn profiles(&self) -> Arc<ProfileStore> {
        Arc::clone(&*self.profiles.read().await)
    }

    /// Reload profiles from disk; jobs in flight keep their snapshot
    ///
    /// On error the current store stays in place.
    pub async fn reload_profiles(&self) -> Result<Arc<ProfileStore>, ProfileLoadError> {
        let dirs = self.profile_dirs.clone();
        let store = tokio::task::spawn_blocking(move || ProfileStore::load(&dirs))
            .await
            .map_err(|e| ProfileLoadError::Io {
                path: self.profile_dirs.printer.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            })??;

        let store = Arc::new(store);
        *self.profiles.write().await = Arc::clone(&store);
        info!("Profile store reloaded");
        Ok(store)
    }

    /// Slicer liveness check
    pub async fn probe(&self) -> ProbeReport {
        self.process.backend().probe().await
    }

    pub fn admission(&self) -> &AdmissionPool {
        self.process.admission()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Slice one model and report its metrics
    pub async fn submit<R>(&self, request: SliceRequest<R>) -> Result<SliceReport, SliceError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut job = SliceJob::new();
        let span = tracing::info_span!("slice_job", job_id = %job.id);

        async move {
            info!(
                filename = %request.filename,
                printer = %request.printer,
                process = %request.process,
                filament = %request.filament,
                overrides = request.overrides.len(),
                "Slice job submitted"
            );

            let result = self.run_job(&mut job, request).await;

            match result {
                Ok(report) => Ok(report),
                Err(e) => {
                    let terminal = e.terminal_state();
                    if let Err(t) = job.transition(terminal) {
                        warn!(error = %t, "Could not record terminal state");
                    }
                    if e.is_server_side() {
                        error!(kind = e.kind(), error = %e, elapsed_ms = job.elapsed_ms(), "Slice job failed");
                    } else {
                        warn!(kind = e.kind(), error = %e, elapsed_ms = job.elapsed_ms(), "Slice job rejected");
                    }
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_job<R>(&self, job: &mut SliceJob, request: SliceRequest<R>) -> Result<SliceReport, SliceError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let store = self.profiles().await;
        let settings = resolve(
            &store,
            &request.printer,
            &request.process,
            &request.filament,
            &request.overrides,
        )?;
        drop(store);

        let mut workspace = JobWorkspace::create(&self.work_dir, job.id)
            .await
            .map_err(|e| SliceError::Internal(format!("cannot create job workspace: {}", e)))?;

        let outcome = self
            .execute(job, &settings, request.model, &request.filename, &workspace)
            .await;

        // Cleanup precedes the terminal transition on every path
        self.aggregator.cleanup(job, &mut workspace).await;

        let (metrics, model) = outcome?;
        job.transition(JobState::Succeeded)
            .map_err(|e| SliceError::Internal(e.to_string()))?;

        let report = SliceReport {
            job_id: job.id,
            state: job.state(),
            print_time_human: metrics.print_time_s.map(format_print_time),
            metrics,
            model: ModelSummary {
                filename: model.original_filename,
                format: model.format,
                size_bytes: model.size_bytes,
                sha256: model.sha256,
            },
            layers: settings.layers().to_vec(),
            duration_ms: job.elapsed_ms(),
        };

        info!(
            volume_mm3 = ?report.metrics.volume_mm3,
            weight_g = ?report.metrics.weight_g,
            print_time_s = ?report.metrics.print_time_s,
            warnings = report.metrics.warnings.len(),
            duration_ms = report.duration_ms,
            "Slice job succeeded"
        );
        Ok(report)
    }

    async fn execute<R>(
        &self,
        job: &mut SliceJob,
        settings: &ResolvedSettings,
        upload: R,
        filename: &str,
        workspace: &JobWorkspace,
    ) -> Result<(SliceMetrics, StagedModel), SliceError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let model = stage_model(upload, filename, self.max_upload_bytes, workspace).await?;

        self.process
            .run(job, settings, &model, workspace, self.timeout)
            .await?;

        let metrics = self.aggregator.aggregate(job).await?;
        Ok((metrics, model))
    }
}
