//! Slice results

use crate::models::{JobState, ModelFormat};
use crate::services::profile_resolver::LayerRef;
use serde::Serialize;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Metrics extracted from a toolpath file
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SliceMetrics {
    /// Filament volume in mm³
    pub volume_mm3: Option<f64>,
    /// Filament weight in grams; needs density in the slicer settings
    pub weight_g: Option<f64>,
    /// Estimated print time in seconds
    pub print_time_s: Option<u64>,
    /// Degraded or partial extraction notes
    pub warnings: BTreeSet<String>,
}

/// Summary of the uploaded model
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub filename: String,
    pub format: ModelFormat,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Outward result of a successful submission
#[derive(Debug, Clone, Serialize)]
pub struct SliceReport {
    pub job_id: Uuid,
    pub state: JobState,
    pub metrics: SliceMetrics,
    /// `1h 23m 45s` style rendering of `metrics.print_time_s`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub print_time_human: Option<String>,
    pub model: ModelSummary,
    pub layers: Vec<LayerRef>,
    pub duration_ms: u64,
}
