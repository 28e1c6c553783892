//! Shared fixtures for slicemetrics-svc integration tests
//!
//! `FakeSlicer` stands in for the slicer binary. It writes canned G-code,
//! can be told to fail or to run longer than its timeout, and records how
//! many invocations overlapped.

#![allow(dead_code)]

use async_trait::async_trait;
use slicemetrics_common::config::{AdmissionPolicy, TomlConfig};
use slicemetrics_svc::models::Overrides;
use slicemetrics_svc::services::{ProfileDirs, ProfileStore, SliceRequest, SliceService};
use slicemetrics_svc::types::{ProbeReport, ProcessResult, SlicerBackend, SpawnError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const PRUSA_GCODE: &str = "\
; generated by PrusaSlicer 2.7.1
G21
G90
G1 Z0.2 F7800
G1 X10 Y10 E0.5
; filament used [mm] = 1234.56
; filament used [mm3] = 2969.41
; filament used [g] = 3.68
; total filament used [g] = 3.68
; estimated printing time (normal mode) = 1h 23m 45s
; estimated printing time (silent mode) = 1h 30m 2s
";

pub const ASCII_STL: &[u8] = b"solid cube
facet normal 0 0 1
 outer loop
  vertex 0 0 0
  vertex 1 0 0
  vertex 0 1 0
 endloop
endfacet
endsolid cube
";

/// Scripted stand-in for the slicer binary
pub struct FakeSlicer {
    pub gcode: String,
    pub exit_code: i32,
    pub stderr: String,
    pub delay: Duration,
    pub available: bool,
    calls: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    settings_seen: Mutex<Vec<String>>,
}

impl FakeSlicer {
    pub fn new(gcode: &str) -> Self {
        Self {
            gcode: gcode.to_string(),
            exit_code: 0,
            stderr: String::new(),
            delay: Duration::ZERO,
            available: true,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            settings_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(exit_code: i32, stderr: &str) -> Self {
        Self {
            exit_code,
            stderr: stderr.to_string(),
            ..Self::new("; partial output\n")
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// Settings files as they were handed to the slicer
    pub fn settings_seen(&self) -> Vec<String> {
        self.settings_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl SlicerBackend for FakeSlicer {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn invoke(
        &self,
        settings_path: &Path,
        model_path: &Path,
        output_path: &Path,
        timeout: Duration,
    ) -> Result<ProcessResult, SpawnError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        assert!(model_path.exists(), "model staged before invocation");
        let settings = tokio::fs::read_to_string(settings_path).await?;
        self.settings_seen.lock().unwrap().push(settings);

        let result = if self.delay > timeout {
            // Leave a partial artifact behind, as a killed slicer would
            tokio::fs::write(output_path, "; partial").await?;
            tokio::time::sleep(timeout).await;
            ProcessResult::timed_out(timeout)
        } else {
            tokio::time::sleep(self.delay).await;
            tokio::fs::write(output_path, &self.gcode).await?;
            ProcessResult::exited(self.exit_code, "", &self.stderr)
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(result)
    }

    async fn probe(&self) -> ProbeReport {
        if self.available {
            ProbeReport::available("fake slicer")
        } else {
            ProbeReport::unavailable("fake slicer switched off")
        }
    }
}

/// Temporary profiles + work dir
pub struct TestEnv {
    pub root: TempDir,
    pub config: TomlConfig,
}

impl TestEnv {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        let mut config = TomlConfig::default();
        config.work_dir = root.path().join("work");
        config.profiles.printer_dir = root.path().join("profiles/printer");
        config.profiles.process_dir = root.path().join("profiles/process");
        config.profiles.filament_dir = root.path().join("profiles/filament");
        config.slicer.timeout_secs = 5;
        config.admission.capacity = 2;
        config.admission.policy = AdmissionPolicy::Queue;
        config.admission.max_queue = 8;

        write_profile(
            &config.profiles.printer_dir,
            "mk4.json",
            r#"{"name": "MK4", "nozzle_diameter": [0.4], "bed_shape": ["0x0", "250x0", "250x210", "0x210"]}"#,
        );
        write_profile(
            &config.profiles.process_dir,
            "draft.json",
            r#"{"name": "0.20mm DRAFT", "layer_height": 0.2, "fill_density": "15%", "layer_gcode": "G92 E0\n;LAYER"}"#,
        );
        write_profile(
            &config.profiles.filament_dir,
            "pla.json",
            r#"{"name": "Generic PLA", "filament_density": 1.24, "filament_diameter": 1.75, "temperature": 215}"#,
        );

        Self { root, config }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.config.work_dir.clone()
    }

    pub fn store(&self) -> ProfileStore {
        ProfileStore::load(&ProfileDirs::from(&self.config.profiles)).unwrap()
    }

    pub fn service(&self, backend: Arc<FakeSlicer>) -> SliceService {
        SliceService::new(&self.config, self.store(), backend)
    }

    /// Entries left in the work dir
    pub fn leftovers(&self) -> usize {
        match std::fs::read_dir(self.work_dir()) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

pub fn write_profile(dir: &Path, file: &str, content: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join(file), content).unwrap();
}

pub fn request<'a>(body: &'a [u8], filename: &str) -> SliceRequest<&'a [u8]> {
    SliceRequest {
        model: body,
        filename: filename.to_string(),
        printer: "MK4".to_string(),
        process: "0.20mm DRAFT".to_string(),
        filament: "Generic PLA".to_string(),
        overrides: Overrides::new(),
    }
}
