//! Slicing engine services

pub mod admission;
pub mod aggregator;
pub mod cli_slicer;
pub mod job_workspace;
pub mod model_stager;
pub mod orchestrator;
pub mod output_parser;
pub mod profile_resolver;
pub mod profile_store;
pub mod settings_file;
pub mod slicer_process;

pub use admission::{AdmissionError, AdmissionPermit, AdmissionPool};
pub use aggregator::{CleanupReport, JobAggregator};
pub use cli_slicer::CliSlicer;
pub use job_workspace::JobWorkspace;
pub use model_stager::{stage_model, ValidationError};
pub use orchestrator::{SliceRequest, SliceService};
pub use output_parser::{OutputParser, ParseError};
pub use profile_resolver::{resolve, LayerRef, LayerSource, ProfileError, ResolvedSettings};
pub use profile_store::{ProfileDirs, ProfileLoadError, ProfileStore};
pub use settings_file::{render_settings, write_settings};
pub use slicer_process::{ProcessError, SlicerProcessManager};
