//! Profile documents and setting values

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Request-level setting overrides, applied after every profile layer
pub type Overrides = BTreeMap<String, SettingValue>;

/// Kind of profile document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    Printer,
    Process,
    Filament,
}

impl ProfileKind {
    /// All kinds in merge order
    pub const ALL: [ProfileKind; 3] = [ProfileKind::Printer, ProfileKind::Process, ProfileKind::Filament];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileKind::Printer => "printer",
            ProfileKind::Process => "process",
            ProfileKind::Filament => "filament",
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single typed setting value
///
/// Values keep the type they were loaded with. Conversion to the slicer's
/// string form only happens when the settings file is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<SettingValue>),
}

impl SettingValue {
    /// Convert a JSON value, rejecting nulls and nested objects
    pub fn from_json(value: &serde_json::Value) -> Option<SettingValue> {
        use serde_json::Value;

        match value {
            Value::Bool(b) => Some(SettingValue::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(SettingValue::Int(i))
                } else {
                    n.as_f64().map(SettingValue::Float)
                }
            }
            Value::String(s) => Some(SettingValue::Text(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(SettingValue::from_json)
                .collect::<Option<Vec<_>>>()
                .map(SettingValue::List),
            Value::Null | Value::Object(_) => None,
        }
    }

    /// Numeric view of the value
    ///
    /// Text is parsed leniently (`,` decimals, trailing `%`). Lists yield
    /// their first element.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Bool(_) => None,
            SettingValue::Int(i) => Some(*i as f64),
            SettingValue::Float(f) => Some(*f),
            SettingValue::Text(s) => {
                slicemetrics_common::human_time::parse_locale_number(s.trim().trim_end_matches('%'))
            }
            SettingValue::List(items) => items.first().and_then(SettingValue::as_f64),
        }
    }

    /// String form as slicer config files expect it
    ///
    /// Booleans become `1`/`0`; lists are joined with `,`.
    pub fn to_setting_string(&self) -> String {
        match self {
            SettingValue::Bool(true) => "1".to_string(),
            SettingValue::Bool(false) => "0".to_string(),
            SettingValue::Int(i) => i.to_string(),
            SettingValue::Float(f) => f.to_string(),
            SettingValue::Text(s) => s.clone(),
            SettingValue::List(items) => items
                .iter()
                .map(SettingValue::to_setting_string)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        SettingValue::Text(value.to_string())
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        SettingValue::Bool(value)
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        SettingValue::Int(value)
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        SettingValue::Float(value)
    }
}

/// A named printer, process or filament document
///
/// Immutable once loaded; owned by the profile store.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub kind: ProfileKind,
    pub name: String,
    pub settings: BTreeMap<String, SettingValue>,
    pub source: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_scalars_and_lists() {
        assert_eq!(SettingValue::from_json(&json!(true)), Some(SettingValue::Bool(true)));
        assert_eq!(SettingValue::from_json(&json!(3)), Some(SettingValue::Int(3)));
        assert_eq!(SettingValue::from_json(&json!(0.4)), Some(SettingValue::Float(0.4)));
        assert_eq!(
            SettingValue::from_json(&json!(["0.4", "0.6"])),
            Some(SettingValue::List(vec!["0.4".into(), "0.6".into()]))
        );
    }

    #[test]
    fn test_from_json_rejects_objects_and_nulls() {
        assert_eq!(SettingValue::from_json(&json!(null)), None);
        assert_eq!(SettingValue::from_json(&json!({"a": 1})), None);
        assert_eq!(SettingValue::from_json(&json!([1, {"a": 1}])), None);
    }

    #[test]
    fn test_setting_strings() {
        assert_eq!(SettingValue::Bool(true).to_setting_string(), "1");
        assert_eq!(SettingValue::Float(20.0).to_setting_string(), "20");
        assert_eq!(SettingValue::Float(0.2).to_setting_string(), "0.2");
        assert_eq!(
            SettingValue::List(vec![SettingValue::Float(0.4), SettingValue::Int(1)]).to_setting_string(),
            "0.4,1"
        );
    }

    #[test]
    fn test_as_f64_accepts_percent_and_comma() {
        assert_eq!(SettingValue::Text("15%".into()).as_f64(), Some(15.0));
        assert_eq!(SettingValue::Text("1,24".into()).as_f64(), Some(1.24));
        assert_eq!(SettingValue::Bool(true).as_f64(), None);
    }
}
