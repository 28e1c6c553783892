//! G-code output parser
//!
//! Extracts metrics from the comment lines slicers write into their output,
//! driven by a marker table rather than hard-coded keys.
//!
//! # Matching
//! A comment such as `; filament used [mm3] = 1234.5` is split into a key and
//! a value on the first `=` (or `:` when there is no `=`). A key matches a
//! rule when it equals the rule's marker or continues it with a space or
//! `(`, so `estimated printing time (normal mode)` matches the
//! `estimated printing time` rule.
//!
//! # Slots
//! The full key is a slot. Repeating the same key replaces its earlier
//! value; different keys matched by one rule are combined with the rule's
//! aggregation. For each metric only the highest-priority rule that matched
//! anything is used, so OrcaSlicer's `total filament used [g]` shadows its
//! per-extruder `filament used [g]` lines instead of being added to them.

use crate::models::SliceMetrics;
use slicemetrics_common::config::{default_marker_table, Aggregate, MarkerRule, MetricField};
use slicemetrics_common::human_time::{parse_locale_number, parse_print_duration};
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no volume or print time found in slicer output")]
    NoMetricsFound,

    #[error("cannot read slicer output {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parser task failed: {0}")]
    Internal(String),
}

impl ParseError {
    /// Stable reason code
    pub fn reason(&self) -> &'static str {
        match self {
            ParseError::NoMetricsFound => "no-metrics-found",
            ParseError::Unreadable { .. } => "unreadable-output",
            ParseError::Internal(_) => "internal",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputParser {
    rules: Arc<[MarkerRule]>,
}

impl Default for OutputParser {
    fn default() -> Self {
        Self::new(default_marker_table())
    }
}

impl OutputParser {
    /// Build a parser; an empty table falls back to the built-in markers
    pub fn new(rules: Vec<MarkerRule>) -> Self {
        let rules = if rules.is_empty() {
            default_marker_table()
        } else {
            rules
        };
        Self { rules: rules.into() }
    }

    pub fn rules(&self) -> &[MarkerRule] {
        &self.rules
    }

    /// Parse a G-code file in a single pass on the blocking pool
    pub async fn parse(&self, path: &Path) -> Result<SliceMetrics, ParseError> {
        let rules = Arc::clone(&self.rules);
        let path = path.to_path_buf();

        tokio::task::spawn_blocking(move || parse_file(&rules, &path))
            .await
            .map_err(|e| ParseError::Internal(e.to_string()))?
    }

    /// Parse G-code held in memory
    pub fn parse_str(&self, content: &str) -> Result<SliceMetrics, ParseError> {
        let mut extraction = Extraction::new(&self.rules);
        for line in content.lines() {
            extraction.feed_line(line);
        }
        extraction.finish()
    }
}

fn parse_file(rules: &[MarkerRule], path: &Path) -> Result<SliceMetrics, ParseError> {
    let unreadable = |source| ParseError::Unreadable {
        path: path.to_path_buf(),
        source,
    };

    let file = std::fs::File::open(path).map_err(unreadable)?;
    let mut reader = std::io::BufReader::new(file);
    let mut extraction = Extraction::new(rules);
    let mut buf = Vec::with_capacity(256);

    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf).map_err(unreadable)?;
        if n == 0 {
            break;
        }
        // Only comment lines carry metrics
        if buf.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b';') {
            extraction.feed_line(&String::from_utf8_lossy(&buf));
        }
    }

    let metrics = extraction.finish()?;
    tracing::debug!(
        path = %path.display(),
        volume_mm3 = ?metrics.volume_mm3,
        weight_g = ?metrics.weight_g,
        print_time_s = ?metrics.print_time_s,
        warnings = metrics.warnings.len(),
        "Parsed slicer output"
    );
    Ok(metrics)
}

/// Whether a comment key belongs to a marker
fn key_matches(key: &str, marker: &str) -> bool {
    match key.strip_prefix(marker) {
        Some("") => true,
        Some(rest) => rest.starts_with(' ') || rest.starts_with('('),
        None => false,
    }
}

fn combine(aggregate: Aggregate, values: impl IntoIterator<Item = f64>) -> Option<f64> {
    values.into_iter().fold(None, |acc, v| {
        Some(match (acc, aggregate) {
            (None, _) => v,
            (Some(a), Aggregate::Sum) => a + v,
            (Some(a), Aggregate::Max) => a.max(v),
        })
    })
}

/// Split a numeric value list into tokens
///
/// Handles `12.5, 3.1`, `12.5 3.1` and `12.5,3.1`; a lone `12,5` stays one
/// token so it can be read as a comma decimal.
fn numeric_tokens(value: &str) -> Vec<&str> {
    value
        .split_whitespace()
        .flat_map(|raw| {
            let token = raw.trim_matches(',');
            if token.contains(',') && token.matches('.').count() > 1 {
                token.split(',').collect::<Vec<_>>()
            } else {
                vec![token]
            }
        })
        .filter(|t| !t.is_empty())
        .collect()
}

/// Running state of one parse
struct Extraction<'a> {
    rules: &'a [MarkerRule],
    /// Per rule: slot key -> value of its last occurrence
    slots: Vec<BTreeMap<String, f64>>,
    metrics: SliceMetrics,
}

impl<'a> Extraction<'a> {
    fn new(rules: &'a [MarkerRule]) -> Self {
        Self {
            rules,
            slots: vec![BTreeMap::new(); rules.len()],
            metrics: SliceMetrics::default(),
        }
    }

    fn feed_line(&mut self, line: &str) {
        let Some(body) = line.trim().strip_prefix(';') else {
            return;
        };

        // OrcaSlicer packs several `key: value` pairs into one comment
        for segment in body.split(';') {
            let Some((key, value)) = segment.split_once('=').or_else(|| segment.split_once(':')) else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() {
                continue;
            }

            let rules = self.rules;
            for (index, rule) in rules.iter().enumerate() {
                if !key_matches(key, &rule.marker) {
                    continue;
                }
                match self.read_values(rule, value) {
                    Some(v) => {
                        self.slots[index].insert(key.to_string(), v * rule.scale);
                    }
                    None => {
                        self.metrics
                            .warnings
                            .insert(format!("malformed-value:{}", rule.marker));
                    }
                }
            }
        }
    }

    /// Combine all values on one line; `None` if none of them parse
    fn read_values(&mut self, rule: &MarkerRule, value: &str) -> Option<f64> {
        let mut parsed = Vec::new();
        let mut malformed = false;

        if rule.field.is_duration() {
            for token in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                match parse_print_duration(token) {
                    Some(secs) => parsed.push(secs as f64),
                    None => malformed = true,
                }
            }
        } else {
            for token in numeric_tokens(value) {
                match parse_locale_number(token) {
                    Some(v) => parsed.push(v),
                    None => malformed = true,
                }
            }
        }

        if malformed && !parsed.is_empty() {
            self.metrics
                .warnings
                .insert(format!("malformed-value:{}", rule.marker));
        }
        combine(rule.aggregate, parsed)
    }

    /// Value of `field` from its highest-priority matched rule
    fn field_value(&self, field: MetricField) -> Option<f64> {
        self.rules
            .iter()
            .zip(&self.slots)
            .find(|(rule, slots)| rule.field == field && !slots.is_empty())
            .and_then(|(rule, slots)| combine(rule.aggregate, slots.values().copied()))
    }

    fn finish(mut self) -> Result<SliceMetrics, ParseError> {
        let mut volume = self.field_value(MetricField::VolumeMm3);
        let mut weight = self.field_value(MetricField::WeightG);
        let time = self.field_value(MetricField::TimeS);
        let length = self.field_value(MetricField::LengthMm);
        let diameter = self.field_value(MetricField::DiameterMm);
        let density = self.field_value(MetricField::DensityGCm3);
        let warnings = &mut self.metrics.warnings;

        if volume.is_none() {
            if let (Some(length), Some(diameter)) = (length, diameter) {
                let radius = diameter / 2.0;
                volume = Some(length * std::f64::consts::PI * radius * radius);
                warnings.insert("volume-derived-from-length".to_string());
            }
        }

        if volume.is_none() && time.is_none() {
            return Err(ParseError::NoMetricsFound);
        }

        if weight.is_none() {
            match (volume, density) {
                (Some(v), Some(density)) => {
                    weight = Some(v * density / 1000.0);
                    warnings.insert("weight-derived-from-density".to_string());
                }
                _ => {
                    warnings.insert("weight-unavailable".to_string());
                }
            }
        }
        if volume.is_none() {
            warnings.insert("volume-unavailable".to_string());
        }
        if time.is_none() {
            warnings.insert("time-unavailable".to_string());
        }

        self.metrics.volume_mm3 = volume;
        self.metrics.weight_g = weight;
        self.metrics.print_time_s = time.map(|t| t.round().max(0.0) as u64);
        Ok(self.metrics)
    }
}
