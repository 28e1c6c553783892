//! Data models for slicemetrics-svc

pub mod metrics;
pub mod profile;
pub mod slice_job;
pub mod staged_model;

pub use metrics::{ModelSummary, SliceMetrics, SliceReport};
pub use profile::{Overrides, Profile, ProfileKind, SettingValue};
pub use slice_job::{InvalidTransition, JobState, SliceJob};
pub use staged_model::{ModelFormat, StagedModel};
