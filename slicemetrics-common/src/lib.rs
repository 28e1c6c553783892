//! # SliceMetrics Common Library
//!
//! Shared code for the SliceMetrics service crates:
//! - Error type for bootstrap and configuration failures
//! - TOML bootstrap configuration and its resolution order
//! - Logging initialisation
//! - Print time parsing and formatting

pub mod config;
pub mod error;
pub mod human_time;
pub mod logging;

pub use error::{Error, Result};
