//! Profile resolution
//!
//! Merges printer → process → filament → request overrides into one
//! settings document. A later layer always wins on a key collision; keys
//! are compared case-sensitively and values keep their types.

use crate::models::{Overrides, ProfileKind, SettingValue};
use crate::services::profile_store::ProfileStore;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    #[error("{kind} profile not found: {name}")]
    ProfileNotFound { kind: ProfileKind, name: String },
}

/// Which layer supplied a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerSource {
    Printer,
    Process,
    Filament,
    Overrides,
}

impl From<ProfileKind> for LayerSource {
    fn from(kind: ProfileKind) -> Self {
        match kind {
            ProfileKind::Printer => LayerSource::Printer,
            ProfileKind::Process => LayerSource::Process,
            ProfileKind::Filament => LayerSource::Filament,
        }
    }
}

/// One entry in the layer stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerRef {
    pub source: LayerSource,
    pub name: String,
}

/// Merged settings for one request
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSettings {
    layers: Vec<LayerRef>,
    values: BTreeMap<String, SettingValue>,
    origin: BTreeMap<String, LayerSource>,
}

impl ResolvedSettings {
    pub fn layers(&self) -> &[LayerRef] {
        &self.layers
    }

    pub fn values(&self) -> &BTreeMap<String, SettingValue> {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(key)
    }

    /// Layer whose value won for `key`
    pub fn origin_of(&self, key: &str) -> Option<LayerSource> {
        self.origin.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn apply(&mut self, source: LayerSource, name: &str, settings: &BTreeMap<String, SettingValue>) {
        self.layers.push(LayerRef {
            source,
            name: name.to_string(),
        });
        for (key, value) in settings {
            self.values.insert(key.clone(), value.clone());
            self.origin.insert(key.clone(), source);
        }
    }
}

/// Resolve three profile names plus overrides into merged settings
pub fn resolve(
    store: &ProfileStore,
    printer: &str,
    process: &str,
    filament: &str,
    overrides: &Overrides,
) -> Result<ResolvedSettings, ProfileError> {
    let selection = [
        (ProfileKind::Printer, printer),
        (ProfileKind::Process, process),
        (ProfileKind::Filament, filament),
    ];

    // Look everything up first so a missing name never yields a partial merge
    let mut profiles = Vec::with_capacity(selection.len());
    for (kind, name) in selection {
        let profile = store.get(kind, name).ok_or_else(|| ProfileError::ProfileNotFound {
            kind,
            name: name.to_string(),
        })?;
        profiles.push(profile);
    }

    let mut resolved = ResolvedSettings {
        layers: Vec::with_capacity(4),
        values: BTreeMap::new(),
        origin: BTreeMap::new(),
    };

    for profile in profiles {
        resolved.apply(profile.kind.into(), &profile.name, &profile.settings);
    }
    if !overrides.is_empty() {
        resolved.apply(LayerSource::Overrides, "request", overrides);
    }

    tracing::debug!(
        printer,
        process,
        filament,
        overrides = overrides.len(),
        keys = resolved.len(),
        "Resolved slicer settings"
    );

    Ok(resolved)
}
