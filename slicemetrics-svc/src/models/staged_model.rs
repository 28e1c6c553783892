//! Accepted model formats and staged uploads

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 3D model formats the slicer accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelFormat {
    #[serde(rename = "stl")]
    Stl,
    #[serde(rename = "3mf")]
    ThreeMf,
    #[serde(rename = "obj")]
    Obj,
    #[serde(rename = "amf")]
    Amf,
    #[serde(rename = "step")]
    Step,
}

impl ModelFormat {
    /// Map a file extension (case-insensitive, without dot)
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "stl" => Some(ModelFormat::Stl),
            "3mf" => Some(ModelFormat::ThreeMf),
            "obj" => Some(ModelFormat::Obj),
            "amf" => Some(ModelFormat::Amf),
            "step" | "stp" => Some(ModelFormat::Step),
            _ => None,
        }
    }

    /// Map a declared upload filename by its extension
    pub fn from_filename(filename: &str) -> Option<Self> {
        Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Extension used for the staged copy
    pub fn extension(&self) -> &'static str {
        match self {
            ModelFormat::Stl => "stl",
            ModelFormat::ThreeMf => "3mf",
            ModelFormat::Obj => "obj",
            ModelFormat::Amf => "amf",
            ModelFormat::Step => "step",
        }
    }
}

/// A validated upload copied into a job workspace
#[derive(Debug, Clone)]
pub struct StagedModel {
    pub original_filename: String,
    /// Hex SHA-256 of the uploaded bytes
    pub sha256: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub format: ModelFormat,
}
