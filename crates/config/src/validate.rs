//! Configuration validation.
//!
//! Validates TOML, YAML and JSON configuration files against the known
//! schema, detects unknown/misspelled fields and flags scheduler settings
//! that would make ticks overlap.

use std::{collections::HashMap, path::Path};

use crate::{
    duration::parse_duration_ms, env_subst::substitute_env, loader::config_format,
    schema::ChronosConfig,
};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "value", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "scheduler.every"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<std::path::PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

/// Known config sections and their keys.
fn known_sections() -> HashMap<&'static str, &'static [&'static str]> {
    HashMap::from([
        ("database", &["url", "max_connections"][..]),
        ("scheduler", &["enabled", "every", "dispatch_timeout"][..]),
        ("notifications", &["in_app", "log"][..]),
    ])
}

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, d)| *d > 0 && *d <= max_distance)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

/// Validate a config file at the given path, or the discovered config file
/// if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(ref actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Info,
                category: "file-ref",
                path: String::new(),
                message: "no config file found; using defaults".into(),
            }],
            config_path: None,
        };
    };

    match std::fs::read_to_string(actual_path) {
        Ok(content) => {
            let content = substitute_env(&content);
            let mut result = validate_str(&content, config_format(actual_path));
            result.config_path = Some(actual_path.clone());
            result
        },
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("failed to read config file: {e}"),
            }],
            config_path: Some(actual_path.clone()),
        },
    }
}

/// Validate a TOML string without touching the file system.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    validate_str(toml_str, "toml")
}

/// Validate config text in the given format (`toml`, `yaml`, `yml` or
/// `json`), the way the loader would read it.
#[must_use]
pub fn validate_str(content: &str, format: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let value = match parse_value(content, format) {
        Ok(v) => v,
        Err(message) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message,
            });
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    if let Some(table) = value.as_table() {
        check_unknown_fields(table, &mut diagnostics);
    }

    match value.try_into::<ChronosConfig>() {
        Ok(config) => check_values(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "type-error",
            path: String::new(),
            message: format!("type error: {e}"),
        }),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Parse into a TOML value tree whatever the source format.
fn parse_value(content: &str, format: &str) -> Result<toml::Value, String> {
    let tree = match format {
        "toml" => {
            return toml::from_str(content).map_err(|e| format!("TOML syntax error: {e}"));
        },
        "yaml" | "yml" => serde_yaml::from_str::<serde_json::Value>(content)
            .map_err(|e| format!("YAML syntax error: {e}"))?,
        "json" => serde_json::from_str::<serde_json::Value>(content)
            .map_err(|e| format!("JSON syntax error: {e}"))?,
        other => return Err(format!("unsupported config format: .{other}")),
    };
    match json_to_toml(tree) {
        None => Ok(toml::Value::Table(toml::map::Map::new())),
        Some(value @ toml::Value::Table(_)) => Ok(value),
        Some(_) => Err("config root must be a mapping".into()),
    }
}

/// Nulls have no TOML form. They are dropped, which reads them as unset.
fn json_to_toml(value: serde_json::Value) -> Option<toml::Value> {
    use serde_json::Value as Json;

    Some(match value {
        Json::Null => return None,
        Json::Bool(b) => toml::Value::Boolean(b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => toml::Value::Integer(i),
            None => toml::Value::Float(n.as_f64()?),
        },
        Json::String(s) => toml::Value::String(s),
        Json::Array(items) => {
            toml::Value::Array(items.into_iter().filter_map(json_to_toml).collect())
        },
        Json::Object(map) => toml::Value::Table(
            map.into_iter()
                .filter_map(|(k, v)| json_to_toml(v).map(|v| (k, v)))
                .collect(),
        ),
    })
}

fn check_unknown_fields(
    table: &toml::map::Map<String, toml::Value>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let sections = known_sections();
    let section_names: Vec<&str> = sections.keys().copied().collect();

    for (key, value) in table {
        let Some(fields) = sections.get(key.as_str()) else {
            let message = match suggest(key, &section_names, 3) {
                Some(s) => format!("unknown field at top level (did you mean \"{s}\"?)"),
                None => "unknown field at top level".into(),
            };
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "unknown-field",
                path: key.clone(),
                message,
            });
            continue;
        };

        let Some(inner) = value.as_table() else {
            continue;
        };
        for child in inner.keys() {
            if fields.contains(&child.as_str()) {
                continue;
            }
            let message = match suggest(child, fields, 3) {
                Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                None => "unknown field".into(),
            };
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "unknown-field",
                path: format!("{key}.{child}"),
                message,
            });
        }
    }
}

fn check_values(config: &ChronosConfig, diagnostics: &mut Vec<Diagnostic>) {
    let every = check_duration("scheduler.every", &config.scheduler.every, diagnostics);
    let timeout = check_duration(
        "scheduler.dispatch_timeout",
        &config.scheduler.dispatch_timeout,
        diagnostics,
    );

    if let (Some(every), Some(timeout)) = (every, timeout)
        && timeout >= every
    {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "value",
            path: "scheduler.dispatch_timeout".into(),
            message: "dispatch timeout is not shorter than the tick interval; \
                      a slow sink will cause ticks to be skipped"
                .into(),
        });
    }

    if config.database.max_connections == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "value",
            path: "database.max_connections".into(),
            message: "max_connections must be at least 1".into(),
        });
    }

    if !config.notifications.in_app && !config.notifications.log {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "value",
            path: "notifications".into(),
            message: "all notification sinks are disabled; due events will be marked \
                      without anyone being told"
                .into(),
        });
    }
}

fn check_duration(path: &str, value: &str, diagnostics: &mut Vec<Diagnostic>) -> Option<u64> {
    match parse_duration_ms(value) {
        Ok(ms) => Some(ms),
        Err(e) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "value",
                path: path.into(),
                message: e.to_string(),
            });
            None
        },
    }
}
