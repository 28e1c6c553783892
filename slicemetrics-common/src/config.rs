//! Bootstrap configuration loading and config file resolution
//!
//! The service reads a single TOML document at startup. Every field has a
//! compiled default, so a missing file is never fatal: the service logs a
//! warning and starts with defaults.
//!
//! # Config file resolution order
//!
//! 1. Command-line argument (highest priority)
//! 2. `SLICEMETRICS_CONFIG` environment variable
//! 3. `~/.config/slicemetrics/config.toml` (user config dir)
//! 4. `/etc/slicemetrics/config.toml` (Linux only)
//! 5. Compiled defaults (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SLICEMETRICS_CONFIG";

/// Compiled default values used when neither TOML nor CLI provide a setting
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub bind: String,
    pub log_level: String,
    pub slicer_binary: PathBuf,
    pub profiles_root: PathBuf,
    pub work_dir: PathBuf,
}

impl CompiledDefaults {
    /// Defaults for the platform this binary was compiled for
    pub fn for_current_platform() -> Self {
        let profiles_root = dirs::data_local_dir()
            .map(|d| d.join("slicemetrics").join("profiles"))
            .unwrap_or_else(|| PathBuf::from("./profiles"));

        let slicer_binary = if cfg!(target_os = "macos") {
            PathBuf::from("/Applications/PrusaSlicer.app/Contents/MacOS/PrusaSlicer")
        } else if cfg!(target_os = "windows") {
            PathBuf::from("C:\\Program Files\\Prusa3D\\PrusaSlicer\\prusa-slicer-console.exe")
        } else {
            PathBuf::from("/usr/bin/prusa-slicer")
        };

        Self {
            bind: "127.0.0.1:5780".to_string(),
            log_level: "info".to_string(),
            slicer_binary,
            profiles_root,
            work_dir: std::env::temp_dir().join("slicemetrics"),
        }
    }
}

/// Top-level TOML document
///
/// Scalar fields come before the tables so the document can be written back
/// with `toml::to_string_pretty`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Root directory for per-job workspaces
    pub work_dir: PathBuf,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub slicer: SlicerConfig,
    pub admission: AdmissionConfig,
    pub upload: UploadConfig,
    pub profiles: ProfilesConfig,
    /// Comment marker table used to extract metrics from G-code
    pub markers: Vec<MarkerRule>,
}

impl Default for TomlConfig {
    fn default() -> Self {
        let defaults = CompiledDefaults::for_current_platform();
        Self {
            work_dir: defaults.work_dir.clone(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            slicer: SlicerConfig::default(),
            admission: AdmissionConfig::default(),
            upload: UploadConfig::default(),
            profiles: ProfilesConfig::default(),
            markers: default_marker_table(),
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: CompiledDefaults::for_current_platform().bind,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// On-disk settings format handed to the slicer binary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingsFormat {
    /// PrusaSlicer style `key = value`
    Ini,
    /// OrcaSlicer style JSON object with string values
    Json,
}

impl SettingsFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SettingsFormat::Ini => "ini",
            SettingsFormat::Json => "json",
        }
    }
}

/// External slicer invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlicerConfig {
    /// Path to the slicer executable
    pub binary: PathBuf,
    /// Argument template; `{settings}`, `{model}`, `{output}` and
    /// `{output_dir}` are substituted per job
    pub args: Vec<String>,
    pub settings_format: SettingsFormat,
    /// Wall-clock limit per job, measured from admission
    pub timeout_secs: u64,
    /// Time between graceful stop and forced kill
    pub kill_grace_ms: u64,
    /// Ceiling for each captured output stream
    pub capture_limit_bytes: usize,
    /// Apply compatibility fixes to the serialized settings
    pub harden_settings: bool,
}

impl Default for SlicerConfig {
    fn default() -> Self {
        Self {
            binary: CompiledDefaults::for_current_platform().slicer_binary,
            args: vec![
                "--export-gcode".to_string(),
                "--load".to_string(),
                "{settings}".to_string(),
                "--output".to_string(),
                "{output}".to_string(),
                "{model}".to_string(),
            ],
            settings_format: SettingsFormat::Ini,
            timeout_secs: 300,
            kill_grace_ms: 2000,
            capture_limit_bytes: 64 * 1024,
            harden_settings: true,
        }
    }
}

/// What to do when every slicer slot is busy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionPolicy {
    /// Fail immediately with `Overloaded`
    Reject,
    /// Wait in a bounded FIFO queue
    Queue,
}

/// Concurrency limits for slicer invocations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub capacity: usize,
    pub policy: AdmissionPolicy,
    pub max_queue: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            capacity: 2,
            policy: AdmissionPolicy::Queue,
            max_queue: 8,
        }
    }
}

/// Upload limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: 100 * 1024 * 1024,
        }
    }
}

/// Directories holding printer/process/filament profile documents
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilesConfig {
    pub printer_dir: PathBuf,
    pub process_dir: PathBuf,
    pub filament_dir: PathBuf,
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        let root = CompiledDefaults::for_current_platform().profiles_root;
        Self {
            printer_dir: root.join("printer"),
            process_dir: root.join("process"),
            filament_dir: root.join("filament"),
        }
    }
}

/// Metric a marker line contributes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    VolumeMm3,
    WeightG,
    TimeS,
    LengthMm,
    DiameterMm,
    DensityGCm3,
}

impl MetricField {
    /// Whether values are durations rather than plain numbers
    pub fn is_duration(&self) -> bool {
        matches!(self, MetricField::TimeS)
    }
}

/// How several values of one field are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    Sum,
    Max,
}

/// One row of the marker table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerRule {
    /// Comment key, e.g. `filament used [mm3]`
    pub marker: String,
    pub field: MetricField,
    pub aggregate: Aggregate,
    /// Multiplier converting the emitted unit into the field's unit
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

impl MarkerRule {
    pub fn new(marker: &str, field: MetricField, aggregate: Aggregate, scale: f64) -> Self {
        Self {
            marker: marker.to_string(),
            field,
            aggregate,
            scale,
        }
    }
}

/// Markers emitted by PrusaSlicer and OrcaSlicer
///
/// Earlier rows take priority over later rows for the same field.
pub fn default_marker_table() -> Vec<MarkerRule> {
    use Aggregate::{Max, Sum};
    use MetricField::*;

    vec![
        MarkerRule::new("filament used [mm3]", VolumeMm3, Sum, 1.0),
        MarkerRule::new("filament used [cm3]", VolumeMm3, Sum, 1000.0),
        MarkerRule::new("total filament used [g]", WeightG, Sum, 1.0),
        MarkerRule::new("filament used [g]", WeightG, Sum, 1.0),
        MarkerRule::new("estimated printing time (normal mode)", TimeS, Max, 1.0),
        MarkerRule::new("estimated printing time", TimeS, Max, 1.0),
        MarkerRule::new("total estimated time", TimeS, Max, 1.0),
        MarkerRule::new("filament used [mm]", LengthMm, Sum, 1.0),
        MarkerRule::new("filament_diameter", DiameterMm, Max, 1.0),
        MarkerRule::new("filament_density", DensityGCm3, Max, 1.0),
    ]
}

impl TomlConfig {
    /// Check invariants that serde defaults cannot express
    pub fn validate(&self) -> Result<()> {
        if self.admission.capacity == 0 {
            return Err(Error::Config("admission.capacity must be at least 1".to_string()));
        }
        if self.slicer.timeout_secs == 0 {
            return Err(Error::Config("slicer.timeout_secs must be greater than 0".to_string()));
        }
        if self.upload.max_bytes == 0 {
            return Err(Error::Config("upload.max_bytes must be greater than 0".to_string()));
        }
        if self.slicer.args.is_empty() {
            return Err(Error::Config("slicer.args must not be empty".to_string()));
        }
        for rule in &self.markers {
            if rule.marker.trim().is_empty() {
                return Err(Error::Config("markers entries need a non-empty marker".to_string()));
            }
            if !rule.scale.is_finite() || rule.scale <= 0.0 {
                return Err(Error::Config(format!(
                    "marker '{}' has invalid scale {}",
                    rule.marker, rule.scale
                )));
            }
        }
        Ok(())
    }
}

/// Locates the config file following the documented priority order
pub struct ConfigResolver {
    cli_path: Option<PathBuf>,
}

impl ConfigResolver {
    pub fn new(cli_path: Option<PathBuf>) -> Self {
        Self { cli_path }
    }

    /// Return the first config path that applies, if any
    ///
    /// CLI and environment paths are returned even when the file does not
    /// exist so the caller can warn about it.
    pub fn resolve(&self) -> Option<PathBuf> {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_path {
            return Some(path.clone());
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        // Priority 3: user config dir
        if let Some(user_config) = dirs::config_dir().map(|d| d.join("slicemetrics").join("config.toml")) {
            if user_config.exists() {
                return Some(user_config);
            }
        }

        // Priority 4: system config
        if cfg!(target_os = "linux") {
            let system_config = PathBuf::from("/etc/slicemetrics/config.toml");
            if system_config.exists() {
                return Some(system_config);
            }
        }

        None
    }
}

/// Where the loaded configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Parsed from this file
    File(PathBuf),
    /// A path was given but nothing exists there; defaults apply
    Missing(PathBuf),
    /// No config path applied; defaults apply
    Defaults,
}

impl ConfigSource {
    pub fn is_defaults(&self) -> bool {
        !matches!(self, ConfigSource::File(_))
    }

    /// Log where the configuration came from
    ///
    /// Call after the subscriber is installed, otherwise the missing-file
    /// warning goes nowhere.
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => info!(path = %path.display(), "Loaded configuration"),
            ConfigSource::Missing(path) => {
                warn!(path = %path.display(), "Config file not found, using compiled defaults")
            }
            ConfigSource::Defaults => warn!("No config file found, using compiled defaults"),
        }
    }
}

/// Load and validate configuration, reporting its source without logging
///
/// A missing file yields defaults. A file that exists but cannot be parsed
/// is an error.
pub fn load_config_with_source(path: Option<&Path>) -> Result<(TomlConfig, ConfigSource)> {
    let (config, source) = match path {
        None => (TomlConfig::default(), ConfigSource::Defaults),
        Some(path) if !path.exists() => (TomlConfig::default(), ConfigSource::Missing(path.to_path_buf())),
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
            let config: TomlConfig = toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
            (config, ConfigSource::File(path.to_path_buf()))
        }
    };

    config.validate()?;
    Ok((config, source))
}

/// Load and validate configuration, logging where it came from
pub fn load_config(path: Option<&Path>) -> Result<TomlConfig> {
    let (config, source) = load_config_with_source(path)?;
    source.log();
    Ok(config)
}

/// Write configuration back to disk (used to emit a starter config)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Write to a sibling temp file then rename so readers never see a torn file
    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
