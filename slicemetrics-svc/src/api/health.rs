//! Health check endpoint
//!
//! Reports uptime, the slicer probe result and admission load. Answers 503
//! when the slicer binary is not usable, so a supervisor can tell a live
//! process from a working service.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::ProfileKind;
use crate::types::ProbeReport;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct AdmissionStatus {
    pub capacity: usize,
    pub in_use: usize,
    pub queued: usize,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok" or "degraded"
    pub status: String,
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    pub slicer: ProbeReport,
    pub admission: AdmissionStatus,
    /// Loaded profile count per kind
    pub profiles: BTreeMap<String, usize>,
    /// Last error message if any (for diagnostics)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let slicer = state.service.probe().await;
    let store = state.service.profiles().await;
    let profiles = ProfileKind::ALL
        .iter()
        .map(|kind| (kind.to_string(), store.len(*kind)))
        .collect();

    let admission = state.service.admission();
    let last_error = state.last_error.read().await.clone();

    let status = if slicer.available {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if slicer.available { "ok" } else { "degraded" }.to_string(),
        module: "slicemetrics-svc".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        slicer,
        admission: AdmissionStatus {
            capacity: admission.capacity(),
            in_use: admission.in_use(),
            queued: admission.queued(),
        },
        profiles,
        last_error,
    };

    (status, Json(response))
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
