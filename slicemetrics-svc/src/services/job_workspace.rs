//! Per-job private working directory
//!
//! Each job gets `<work_dir>/slice-<job-id>-XXXXXX` holding its staged
//! model, settings file and G-code output. Nothing in it is shared with other
//! jobs. Directory creation and removal run on the blocking pool. Releasing
//! is idempotent; dropping an unreleased workspace removes the directory as
//! a fallback.

use crate::models::ModelFormat;
use slicemetrics_common::config::SettingsFormat;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use uuid::Uuid;

const ARTIFACT_FILE: &str = "output.gcode";

#[derive(Debug)]
pub struct JobWorkspace {
    job_id: Uuid,
    path: PathBuf,
    dir: Option<TempDir>,
}

impl JobWorkspace {
    /// Create a fresh directory under `root` (created if missing)
    pub async fn create(root: &Path, job_id: Uuid) -> io::Result<Self> {
        let root = root.to_path_buf();
        let dir = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&root)?;
            tempfile::Builder::new()
                .prefix(&format!("slice-{}-", job_id))
                .tempdir_in(&root)
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;

        Ok(Self {
            job_id,
            path: dir.path().to_path_buf(),
            dir: Some(dir),
        })
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn model_path(&self, format: ModelFormat) -> PathBuf {
        self.path.join(format!("model.{}", format.extension()))
    }

    pub fn settings_path(&self, format: SettingsFormat) -> PathBuf {
        self.path.join(format!("settings.{}", format.extension()))
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.path.join(ARTIFACT_FILE)
    }

    pub fn is_released(&self) -> bool {
        self.dir.is_none()
    }

    /// Remove the directory and everything in it
    ///
    /// Returns `Ok(true)` if this call removed it, `Ok(false)` if it was
    /// already released. A directory deleted behind our back counts as
    /// released.
    pub async fn release(&mut self) -> io::Result<bool> {
        let Some(dir) = self.dir.take() else {
            return Ok(false);
        };

        let closed = tokio::task::spawn_blocking(move || dir.close())
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        match closed {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e),
        }
    }
}
