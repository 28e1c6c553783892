//! Settings file writer
//!
//! Serializes merged settings into the file the slicer loads:
//! - `ini`: PrusaSlicer `key = value` lines
//! - `json`: OrcaSlicer style object where every scalar is a string
//!
//! Hardening applies fixes that keep CLI slicing from rejecting otherwise
//! valid profile combinations.

use crate::models::SettingValue;
use crate::services::profile_resolver::ResolvedSettings;
use slicemetrics_common::config::SettingsFormat;
use std::collections::BTreeMap;
use std::path::Path;

const DEFAULT_NOZZLE_DIAMETER: &str = "0.4";
const DEFAULT_FILL_DENSITY: &str = "20";

/// Custom G-code hooks where a stray `G92 E0` fights absolute extrusion
const LAYER_GCODE_KEYS: &[&str] = &[
    "before_layer_gcode",
    "layer_gcode",
    "before_layer_change_gcode",
    "layer_change_gcode",
];

/// Settings that some profiles carry as negative placeholders
const NON_NEGATIVE_KEYS: &[&str] = &["tree_support_wall_count", "raft_first_layer_expansion"];

/// Render settings in the requested format
pub fn render_settings(settings: &ResolvedSettings, format: SettingsFormat, harden: bool) -> String {
    let mut values = settings.values().clone();
    if harden {
        harden_settings(&mut values);
    }

    match format {
        SettingsFormat::Ini => render_ini(&values),
        SettingsFormat::Json => render_json(&values),
    }
}

/// Render and write the settings file
pub async fn write_settings(
    settings: &ResolvedSettings,
    format: SettingsFormat,
    harden: bool,
    path: &Path,
) -> std::io::Result<()> {
    let content = render_settings(settings, format, harden);
    tokio::fs::write(path, content).await?;
    tracing::debug!(path = %path.display(), format = ?format, "Wrote slicer settings");
    Ok(())
}

/// Apply compatibility fixes in place
pub fn harden_settings(values: &mut BTreeMap<String, SettingValue>) {
    // nozzle_diameter is always a list, one entry per extruder
    let nozzle = match values.remove("nozzle_diameter") {
        Some(SettingValue::List(items)) if !items.is_empty() => SettingValue::List(items),
        Some(SettingValue::List(_)) | None => SettingValue::List(vec![DEFAULT_NOZZLE_DIAMETER.into()]),
        Some(scalar) => SettingValue::List(vec![scalar]),
    };
    values.insert("nozzle_diameter".to_string(), nozzle);

    values
        .entry("use_relative_e_distances".to_string())
        .or_insert(SettingValue::Bool(false));

    for key in LAYER_GCODE_KEYS {
        if let Some(SettingValue::Text(gcode)) = values.get_mut(*key) {
            *gcode = gcode.replace("G92 E0", "").trim().to_string();
        }
    }

    for key in NON_NEGATIVE_KEYS {
        if let Some(value) = values.get_mut(*key) {
            match value.as_f64() {
                Some(v) if v >= 0.0 => {}
                _ => *value = "0".into(),
            }
        }
    }

    if let Some(value) = values.get_mut("fill_density") {
        *value = clamp_fill_density(value);
    }
}

/// Clamp infill to a whole percentage in 0..=100, keeping a `%` suffix
fn clamp_fill_density(value: &SettingValue) -> SettingValue {
    let percent_suffix = matches!(value, SettingValue::Text(s) if s.trim().ends_with('%'));

    match value.as_f64() {
        Some(v) => {
            let clamped = v.clamp(0.0, 100.0) as i64;
            if percent_suffix {
                SettingValue::Text(format!("{}%", clamped))
            } else {
                SettingValue::Text(clamped.to_string())
            }
        }
        None => {
            tracing::warn!(value = ?value, "Unparseable fill_density, using default");
            DEFAULT_FILL_DENSITY.into()
        }
    }
}

fn render_ini(values: &BTreeMap<String, SettingValue>) -> String {
    let mut out = String::from("# generated by slicemetrics\n");
    for (key, value) in values {
        // Multi-line G-code is stored with escaped newlines
        let rendered = value
            .to_setting_string()
            .replace('\r', "")
            .replace('\n', "\\n");
        out.push_str(key);
        out.push_str(" = ");
        out.push_str(&rendered);
        out.push('\n');
    }
    out
}

fn render_json(values: &BTreeMap<String, SettingValue>) -> String {
    let object: serde_json::Map<String, serde_json::Value> = values
        .iter()
        .map(|(key, value)| (key.clone(), json_string_value(value)))
        .collect();

    // Serializing a map of strings cannot fail
    serde_json::to_string_pretty(&serde_json::Value::Object(object)).unwrap_or_default()
}

fn json_string_value(value: &SettingValue) -> serde_json::Value {
    match value {
        SettingValue::List(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|item| serde_json::Value::String(item.to_setting_string()))
                .collect(),
        ),
        scalar => serde_json::Value::String(scalar.to_setting_string()),
    }
}
