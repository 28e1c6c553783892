//! End-to-end tests of `SliceService::submit` against a fake slicer

mod helpers;

use helpers::{request, FakeSlicer, TestEnv, ASCII_STL, PRUSA_GCODE};
use slicemetrics_common::config::AdmissionPolicy;
use slicemetrics_svc::models::{JobState, ModelFormat, SettingValue};
use slicemetrics_svc::services::{LayerSource, ProfileError, ValidationError};
use slicemetrics_svc::SliceError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

#[tokio::test]
async fn test_submit_reports_metrics() {
    let env = TestEnv::new();
    let slicer = Arc::new(FakeSlicer::new(PRUSA_GCODE));
    let service = env.service(slicer.clone());

    let report = service.submit(request(ASCII_STL, "cube.stl")).await.unwrap();

    assert_eq!(report.state, JobState::Succeeded);
    assert_eq!(report.metrics.volume_mm3, Some(2969.41));
    assert_eq!(report.metrics.weight_g, Some(3.68));
    assert_eq!(report.metrics.print_time_s, Some(5025));
    assert!(report.metrics.warnings.is_empty());
    assert_eq!(report.print_time_human.as_deref(), Some("1h 23m 45s"));
    assert_eq!(report.model.format, ModelFormat::Stl);
    assert_eq!(report.model.size_bytes, ASCII_STL.len() as u64);
    assert_eq!(report.layers.len(), 3);
    assert_eq!(slicer.calls(), 1);
}

#[tokio::test]
async fn test_workspace_removed_after_success() {
    let env = TestEnv::new();
    let service = env.service(Arc::new(FakeSlicer::new(PRUSA_GCODE)));

    service.submit(request(ASCII_STL, "cube.stl")).await.unwrap();

    assert_eq!(env.leftovers(), 0, "model, settings and G-code all removed");
}

#[tokio::test]
async fn test_overrides_reach_settings_file() {
    let env = TestEnv::new();
    let slicer = Arc::new(FakeSlicer::new(PRUSA_GCODE));
    let service = env.service(slicer.clone());

    let mut req = request(ASCII_STL, "cube.stl");
    req.overrides.insert("fill_density".to_string(), SettingValue::Text("40%".into()));
    req.overrides.insert("layer_height".to_string(), SettingValue::Float(0.1));
    let report = service.submit(req).await.unwrap();

    assert_eq!(report.layers.last().unwrap().source, LayerSource::Overrides);

    let settings = &slicer.settings_seen()[0];
    assert!(settings.contains("fill_density = 40%\n"));
    assert!(settings.contains("layer_height = 0.1\n"));
    assert!(settings.contains("temperature = 215\n"));
    // Hardening strips the extruder reset from layer hooks
    assert!(settings.contains("layer_gcode = ;LAYER\n"));
}

#[tokio::test]
async fn test_unknown_profile_fails_before_slicing() {
    let env = TestEnv::new();
    let slicer = Arc::new(FakeSlicer::new(PRUSA_GCODE));
    let service = env.service(slicer.clone());

    let mut req = request(ASCII_STL, "cube.stl");
    req.filament = "Unobtainium".to_string();
    let err = service.submit(req).await.unwrap_err();

    assert!(matches!(err, SliceError::Profile(ProfileError::ProfileNotFound { .. })));
    assert_eq!(err.terminal_state(), JobState::Failed);
    assert_eq!(slicer.calls(), 0);
    assert_eq!(env.leftovers(), 0);
}

#[tokio::test]
async fn test_unsupported_format_rejected() {
    let env = TestEnv::new();
    let slicer = Arc::new(FakeSlicer::new(PRUSA_GCODE));
    let service = env.service(slicer.clone());

    let err = service.submit(request(b"just some text", "notes.txt")).await.unwrap_err();

    assert!(matches!(err, SliceError::Validation(ValidationError::UnsupportedFormat(_))));
    assert_eq!(slicer.calls(), 0);
    assert_eq!(env.leftovers(), 0);
}

#[tokio::test]
async fn test_oversized_upload_leaves_nothing_behind() {
    let mut env = TestEnv::new();
    env.config.upload.max_bytes = 16;
    let slicer = Arc::new(FakeSlicer::new(PRUSA_GCODE));
    let service = env.service(slicer.clone());

    let err = service.submit(request(ASCII_STL, "cube.stl")).await.unwrap_err();

    assert!(matches!(err, SliceError::Validation(ValidationError::PayloadTooLarge { limit: 16 })));
    assert_eq!(slicer.calls(), 0);
    assert_eq!(env.leftovers(), 0);
}

#[tokio::test]
async fn test_slicer_failure_carries_stderr() {
    let env = TestEnv::new();
    let service = env.service(Arc::new(FakeSlicer::failing(1, "Objects could not fit on the bed")));

    let err = service.submit(request(ASCII_STL, "cube.stl")).await.unwrap_err();

    match &err {
        SliceError::ProcessFailed {
            exit_code,
            reason,
            stderr_excerpt,
        } => {
            assert_eq!(*exit_code, Some(1));
            assert_eq!(reason, "nonzero-exit");
            assert!(stderr_excerpt.contains("could not fit"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(env.leftovers(), 0);
}

#[tokio::test]
async fn test_timeout_discards_partial_output() {
    let mut env = TestEnv::new();
    env.config.slicer.timeout_secs = 1;
    let slicer = Arc::new(FakeSlicer::new(PRUSA_GCODE).with_delay(Duration::from_secs(30)));
    let service = env.service(slicer);

    let err = service.submit(request(ASCII_STL, "cube.stl")).await.unwrap_err();

    assert!(matches!(err, SliceError::ProcessTimedOut { .. }));
    assert_eq!(err.terminal_state(), JobState::TimedOut);
    assert_eq!(env.leftovers(), 0);
}

#[tokio::test]
async fn test_gcode_without_metrics_is_parse_error() {
    let env = TestEnv::new();
    let service = env.service(Arc::new(FakeSlicer::new("G28\nG1 X0 Y0\n")));

    let err = service.submit(request(ASCII_STL, "cube.stl")).await.unwrap_err();

    assert!(matches!(err, SliceError::Parse(_)));
    assert_eq!(err.kind(), "parse");
    assert_eq!(env.leftovers(), 0);
}

#[tokio::test]
async fn test_concurrency_never_exceeds_capacity() {
    let env = TestEnv::new();
    let slicer = Arc::new(FakeSlicer::new(PRUSA_GCODE).with_delay(Duration::from_millis(100)));
    let service = Arc::new(env.service(slicer.clone()));

    let mut tasks = JoinSet::new();
    for _ in 0..6 {
        let service = service.clone();
        tasks.spawn(async move { service.submit(request(ASCII_STL, "cube.stl")).await });
    }

    let mut succeeded = 0;
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
        succeeded += 1;
    }

    assert_eq!(succeeded, 6, "queue policy lets every job through eventually");
    assert!(slicer.max_running() <= 2, "at most capacity slicers at once");
    assert_eq!(service.admission().queued(), 0);
    assert_eq!(env.leftovers(), 0);
}

#[tokio::test]
async fn test_reject_policy_overloads_extra_job() {
    let mut env = TestEnv::new();
    env.config.admission.capacity = 1;
    env.config.admission.policy = AdmissionPolicy::Reject;
    let slicer = Arc::new(FakeSlicer::new(PRUSA_GCODE).with_delay(Duration::from_millis(500)));
    let service = Arc::new(env.service(slicer.clone()));

    let first = {
        let service = service.clone();
        tokio::spawn(async move { service.submit(request(ASCII_STL, "cube.stl")).await })
    };

    // Wait until the first job holds the only slot
    while slicer.calls() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let err = service.submit(request(ASCII_STL, "cube.stl")).await.unwrap_err();
    assert!(matches!(err, SliceError::Overloaded { capacity: 1, .. }));
    assert_eq!(err.terminal_state(), JobState::Failed);

    first.await.unwrap().unwrap();
    assert_eq!(slicer.calls(), 1);
}

#[tokio::test]
async fn test_queued_job_times_out_waiting() {
    let mut env = TestEnv::new();
    env.config.admission.capacity = 1;
    env.config.slicer.timeout_secs = 1;
    let slicer = Arc::new(FakeSlicer::new(PRUSA_GCODE).with_delay(Duration::from_millis(900)));
    let service = Arc::new(env.service(slicer.clone()));

    let first = {
        let service = service.clone();
        tokio::spawn(async move { service.submit(request(ASCII_STL, "cube.stl")).await })
    };
    while slicer.calls() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Started 200 ms into the first job; the slot frees up after ~900 ms, which
    // leaves this job too little of its 1 s budget to finish a 900 ms slice
    let second = service.submit(request(ASCII_STL, "cube.stl")).await;

    assert!(first.await.unwrap().is_ok());
    let err = second.unwrap_err();
    assert!(matches!(err, SliceError::ProcessTimedOut { .. }));
    assert_eq!(env.leftovers(), 0);
}

#[tokio::test]
async fn test_profile_reload_picks_up_new_documents() {
    let env = TestEnv::new();
    let service = env.service(Arc::new(FakeSlicer::new(PRUSA_GCODE)));

    helpers::write_profile(
        &env.config.profiles.filament_dir,
        "petg.json",
        r#"{"name": "Generic PETG", "filament_density": 1.27}"#,
    );

    let mut req = request(ASCII_STL, "cube.stl");
    req.filament = "Generic PETG".to_string();
    assert!(service.submit(req).await.is_err());

    service.reload_profiles().await.unwrap();

    let mut req = request(ASCII_STL, "cube.stl");
    req.filament = "Generic PETG".to_string();
    assert!(service.submit(req).await.is_ok());
}
