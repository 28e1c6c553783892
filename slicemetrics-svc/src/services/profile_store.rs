//! Profile store
//!
//! Loads printer, process and filament JSON documents from three
//! directories and indexes them by name. The store is read-only after load
//! and shared as `Arc<ProfileStore>`; refreshing builds a new store.

use crate::models::{Profile, ProfileKind, SettingValue};
use slicemetrics_common::config::ProfilesConfig;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Keys describing the document rather than slicer settings
const METADATA_KEYS: &[&str] = &["name"];

/// Profile loading errors
#[derive(Debug, Error)]
pub enum ProfileLoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("{path} is not a JSON object")]
    NotAnObject { path: PathBuf },

    #[error("Duplicate {kind} profile '{name}' in {first} and {second}")]
    Duplicate {
        kind: ProfileKind,
        name: String,
        first: PathBuf,
        second: PathBuf,
    },
}

/// Where each kind of profile lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileDirs {
    pub printer: PathBuf,
    pub process: PathBuf,
    pub filament: PathBuf,
}

impl ProfileDirs {
    pub fn dir_for(&self, kind: ProfileKind) -> &Path {
        match kind {
            ProfileKind::Printer => &self.printer,
            ProfileKind::Process => &self.process,
            ProfileKind::Filament => &self.filament,
        }
    }
}

impl From<&ProfilesConfig> for ProfileDirs {
    fn from(config: &ProfilesConfig) -> Self {
        Self {
            printer: config.printer_dir.clone(),
            process: config.process_dir.clone(),
            filament: config.filament_dir.clone(),
        }
    }
}

/// Read-only index of profiles by kind and name
#[derive(Debug, Default)]
pub struct ProfileStore {
    profiles: HashMap<ProfileKind, BTreeMap<String, Profile>>,
    dirs: Option<ProfileDirs>,
}

impl ProfileStore {
    /// Load every `*.json` document under the configured directories
    ///
    /// A missing directory yields no profiles of that kind (with a warning).
    pub fn load(dirs: &ProfileDirs) -> Result<Self, ProfileLoadError> {
        let mut profiles = Vec::new();
        for kind in ProfileKind::ALL {
            profiles.extend(load_kind_dir(kind, dirs.dir_for(kind))?);
        }

        let mut store = Self::from_profiles(profiles)?;
        store.dirs = Some(dirs.clone());

        info!(
            printers = store.len(ProfileKind::Printer),
            processes = store.len(ProfileKind::Process),
            filaments = store.len(ProfileKind::Filament),
            "Profile store loaded"
        );
        Ok(store)
    }

    /// Build a store from already-parsed profiles
    pub fn from_profiles(profiles: impl IntoIterator<Item = Profile>) -> Result<Self, ProfileLoadError> {
        let mut index: HashMap<ProfileKind, BTreeMap<String, Profile>> = HashMap::new();

        for profile in profiles {
            let by_name = index.entry(profile.kind).or_default();
            if let Some(existing) = by_name.get(&profile.name) {
                return Err(ProfileLoadError::Duplicate {
                    kind: profile.kind,
                    name: profile.name.clone(),
                    first: existing.source.clone(),
                    second: profile.source.clone(),
                });
            }
            by_name.insert(profile.name.clone(), profile);
        }

        Ok(Self {
            profiles: index,
            dirs: None,
        })
    }

    pub fn get(&self, kind: ProfileKind, name: &str) -> Option<&Profile> {
        self.profiles.get(&kind).and_then(|m| m.get(name))
    }

    /// Sorted profile names of one kind
    pub fn names(&self, kind: ProfileKind) -> Vec<&str> {
        self.profiles
            .get(&kind)
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn len(&self, kind: ProfileKind) -> usize {
        self.profiles.get(&kind).map(BTreeMap::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.values().all(BTreeMap::is_empty)
    }

    /// Directories this store was loaded from, if any
    pub fn dirs(&self) -> Option<&ProfileDirs> {
        self.dirs.as_ref()
    }
}

fn load_kind_dir(kind: ProfileKind, dir: &Path) -> Result<Vec<Profile>, ProfileLoadError> {
    if !dir.is_dir() {
        warn!(kind = %kind, dir = %dir.display(), "Profile directory missing, no profiles loaded");
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(dir).map_err(|source| ProfileLoadError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    paths.sort();

    let mut profiles = Vec::with_capacity(paths.len());
    for path in paths {
        let content = std::fs::read_to_string(&path).map_err(|source| ProfileLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let profile = parse_profile_document(kind, &path, &content)?;
        debug!(kind = %kind, name = %profile.name, path = %path.display(), "Loaded profile");
        profiles.push(profile);
    }

    Ok(profiles)
}

/// Parse one JSON profile document
///
/// The name comes from the document's `"name"` field, falling back to the
/// file stem. Nested objects and nulls are skipped with a warning.
pub fn parse_profile_document(
    kind: ProfileKind,
    path: &Path,
    content: &str,
) -> Result<Profile, ProfileLoadError> {
    let value: serde_json::Value =
        serde_json::from_str(content).map_err(|e| ProfileLoadError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let object = value.as_object().ok_or_else(|| ProfileLoadError::NotAnObject {
        path: path.to_path_buf(),
    })?;

    let name = object
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .ok_or_else(|| ProfileLoadError::Parse {
            path: path.to_path_buf(),
            message: "profile has no name".to_string(),
        })?;

    let mut settings = BTreeMap::new();
    for (key, raw) in object {
        if METADATA_KEYS.contains(&key.as_str()) {
            continue;
        }
        match SettingValue::from_json(raw) {
            Some(value) => {
                settings.insert(key.clone(), value);
            }
            None => warn!(
                profile = %name,
                key = %key,
                "Skipping setting with unsupported value type"
            ),
        }
    }

    Ok(Profile {
        kind,
        name,
        settings,
        source: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, file: &str, content: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(file), content).unwrap();
    }

    fn dirs_in(root: &Path) -> ProfileDirs {
        ProfileDirs {
            printer: root.join("printer"),
            process: root.join("process"),
            filament: root.join("filament"),
        }
    }

    #[test]
    fn test_load_indexes_by_kind_and_name() {
        let temp = TempDir::new().unwrap();
        let dirs = dirs_in(temp.path());
        write(&dirs.printer, "mk4.json", r#"{"name": "Prusa MK4", "nozzle_diameter": ["0.4"]}"#);
        write(&dirs.process, "020mm.json", r#"{"layer_height": 0.2}"#);
        write(&dirs.filament, "pla.json", r#"{"name": "PLA", "filament_density": 1.24}"#);
        write(&dirs.filament, "readme.txt", "not a profile");

        let store = ProfileStore::load(&dirs).unwrap();

        assert!(store.get(ProfileKind::Printer, "Prusa MK4").is_some());
        assert!(store.get(ProfileKind::Process, "020mm").is_some(), "file stem used as name");
        assert_eq!(store.names(ProfileKind::Filament), vec!["PLA"]);
        assert_eq!(store.dirs(), Some(&dirs));

        let printer = store.get(ProfileKind::Printer, "Prusa MK4").unwrap();
        assert!(!printer.settings.contains_key("name"));
    }

    #[test]
    fn test_missing_directory_is_not_fatal() {
        let temp = TempDir::new().unwrap();
        let store = ProfileStore::load(&dirs_in(temp.path())).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let temp = TempDir::new().unwrap();
        let dirs = dirs_in(temp.path());
        write(&dirs.filament, "a.json", r#"{"name": "PLA"}"#);
        write(&dirs.filament, "b.json", r#"{"name": "PLA"}"#);

        let err = ProfileStore::load(&dirs).unwrap_err();
        assert!(matches!(err, ProfileLoadError::Duplicate { kind: ProfileKind::Filament, .. }));
    }

    #[test]
    fn test_same_name_in_different_kinds_is_fine() {
        let temp = TempDir::new().unwrap();
        let dirs = dirs_in(temp.path());
        write(&dirs.printer, "a.json", r#"{"name": "default"}"#);
        write(&dirs.process, "a.json", r#"{"name": "default"}"#);

        let store = ProfileStore::load(&dirs).unwrap();
        assert_eq!(store.len(ProfileKind::Printer), 1);
        assert_eq!(store.len(ProfileKind::Process), 1);
    }

    #[test]
    fn test_invalid_json_reports_path() {
        let temp = TempDir::new().unwrap();
        let dirs = dirs_in(temp.path());
        write(&dirs.process, "broken.json", "{ not json");

        match ProfileStore::load(&dirs).unwrap_err() {
            ProfileLoadError::Parse { path, .. } => assert!(path.ends_with("broken.json")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_nested_objects_skipped() {
        let profile = parse_profile_document(
            ProfileKind::Process,
            Path::new("p.json"),
            r#"{"layer_height": 0.2, "extra": {"nested": true}, "missing": null}"#,
        )
        .unwrap();

        assert_eq!(profile.settings.len(), 1);
        assert_eq!(profile.settings["layer_height"], SettingValue::Float(0.2));
    }

    #[test]
    fn test_array_document_rejected() {
        let err = parse_profile_document(ProfileKind::Printer, Path::new("x.json"), "[1, 2]").unwrap_err();
        assert!(matches!(err, ProfileLoadError::NotAnObject { .. }));
    }
}
