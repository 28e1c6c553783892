//! Slice endpoint
//!
//! `POST /slice?filename=..&printer=..&process=..&filament=..[&infill_percent=..]`
//!
//! The request body is the raw model file and is streamed straight into the
//! stager, so the axum body limit is disabled here and the upload limit is
//! enforced while staging. Extra setting overrides travel as a JSON object
//! in the `X-Slice-Overrides` header.

use axum::{
    body::Body,
    extract::{rejection::QueryRejection, DefaultBodyLimit, Query, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use futures::TryStreamExt;
use serde::Deserialize;
use tokio_util::io::StreamReader;

use crate::error::{ApiError, ApiResult};
use crate::models::{Overrides, SettingValue, SliceReport};
use crate::services::SliceRequest;
use crate::AppState;

pub const OVERRIDES_HEADER: &str = "x-slice-overrides";

#[derive(Debug, Deserialize)]
pub struct SliceQuery {
    pub filename: String,
    pub printer: String,
    pub process: String,
    pub filament: String,
    pub infill_percent: Option<f64>,
}

/// POST /slice
pub async fn slice(
    State(state): State<AppState>,
    query: Result<Query<SliceQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Json<SliceReport>> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let mut overrides = parse_overrides(&headers)?;
    if let Some(percent) = query.infill_percent {
        overrides.insert("fill_density".to_string(), infill_override(percent)?);
    }

    let stream = body
        .into_data_stream()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));

    let request = SliceRequest {
        model: StreamReader::new(stream),
        filename: query.filename,
        printer: query.printer,
        process: query.process,
        filament: query.filament,
        overrides,
    };

    match state.service.submit(request).await {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            if e.is_server_side() {
                state.record_error(e.to_string()).await;
            }
            Err(e.into())
        }
    }
}

/// Read the overrides header; absent means no overrides
pub fn parse_overrides(headers: &HeaderMap) -> ApiResult<Overrides> {
    let Some(raw) = headers.get(OVERRIDES_HEADER) else {
        return Ok(Overrides::new());
    };

    let text = raw
        .to_str()
        .map_err(|_| ApiError::BadRequest(format!("{} must be ASCII JSON", OVERRIDES_HEADER)))?;
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| ApiError::BadRequest(format!("{} is not valid JSON: {}", OVERRIDES_HEADER, e)))?;
    let serde_json::Value::Object(object) = value else {
        return Err(ApiError::BadRequest(format!("{} must be a JSON object", OVERRIDES_HEADER)));
    };

    object
        .iter()
        .map(|(key, value)| {
            SettingValue::from_json(value)
                .map(|v| (key.clone(), v))
                .ok_or_else(|| {
                    ApiError::BadRequest(format!("override '{}' must be a scalar or a list of scalars", key))
                })
        })
        .collect()
}

/// `fill_density` override for an infill percentage, clamped to 0..=100
pub fn infill_override(percent: f64) -> ApiResult<SettingValue> {
    if !percent.is_finite() {
        return Err(ApiError::BadRequest("infill_percent must be a number".to_string()));
    }
    let clamped = percent.clamp(0.0, 100.0).round();
    Ok(SettingValue::Text(format!("{}%", clamped)))
}

/// Build slice routes
pub fn slice_routes() -> Router<AppState> {
    Router::new()
        .route("/slice", post(slice))
        .layer(DefaultBodyLimit::disable())
}
