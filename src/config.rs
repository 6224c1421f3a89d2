use std::{fs, path::Path};

use anyhow::{Context, Result};
use chrono::Duration;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::TrackingMode;

pub const DEFAULT_CERT_URL: &str = "https://certificationsystem.netlify.app/";
pub const DEFAULT_STORAGE_KEY: &str = "cert_data";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    Number,
    Text,
    Time,
    Percentage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub key: String,
    pub label: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default = "default_true")]
    pub show_zero: bool,
}

impl FieldSpec {
    pub fn number(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            field_type: FieldType::Number,
            unit: String::new(),
            default_value: None,
            show_zero: true,
        }
    }

    pub fn text(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            field_type: FieldType::Text,
            ..Self::number(key, label)
        }
    }

    pub fn is_text(&self) -> bool {
        self.field_type == FieldType::Text
    }

    pub fn default_number(&self) -> f64 {
        self.default_value
            .as_ref()
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    pub fn default_text(&self) -> String {
        self.default_value
            .as_ref()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }
}

fn default_true() -> bool {
    true
}

/// Construction-time options for one tracker instance. Every key is
/// optional in the JSON form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerConfig {
    pub app_name: String,
    pub app_version: String,
    pub storage_key: String,
    /// Explicit namespace; bypasses path-derived namespacing.
    pub app_id: Option<String>,
    /// Page path used to derive the storage namespace.
    pub app_path: String,
    pub cert_url: String,
    pub fields: Vec<FieldSpec>,
    pub track_focus: bool,
    pub inactivity_timeout_ms: u64,
    pub classroom_mode: bool,
    pub verification_mode: bool,
    pub suspicious_resize_threshold_px: u32,
    pub legacy_mode: Option<bool>,
    pub isolate_storage: Option<bool>,
    pub migrate_legacy_data: bool,
    pub debug: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            app_name: "App".into(),
            app_version: "4.1.0".into(),
            storage_key: DEFAULT_STORAGE_KEY.into(),
            app_id: None,
            app_path: "/".into(),
            cert_url: DEFAULT_CERT_URL.into(),
            fields: Vec::new(),
            track_focus: false,
            inactivity_timeout_ms: 120_000,
            classroom_mode: false,
            verification_mode: false,
            suspicious_resize_threshold_px: 100,
            legacy_mode: None,
            isolate_storage: None,
            migrate_legacy_data: false,
            debug: false,
        }
    }
}

impl TrackerConfig {
    /// Missing files yield the defaults; a malformed file is logged and
    /// also yields the defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read tracker config from {}", path.display()))?;

        Ok(serde_json::from_str(&contents).unwrap_or_else(|err| {
            warn!(
                "Ignoring malformed tracker config {}: {err}",
                path.display()
            );
            Self::default()
        }))
    }

    /// Pages deployed before storage isolation keep their unnamespaced
    /// slots: explicit `legacyMode`, `isolateStorage: false`, or an app
    /// version below 4.
    pub fn uses_legacy_storage(&self) -> bool {
        self.legacy_mode == Some(true)
            || self.isolate_storage == Some(false)
            || crate::namespace::is_legacy_version(&self.app_version)
    }

    /// Mode requested by configuration when nothing was persisted.
    pub fn initial_mode(&self) -> TrackingMode {
        if self.verification_mode {
            TrackingMode::Verification
        } else if self.classroom_mode {
            TrackingMode::Classroom
        } else {
            TrackingMode::Normal
        }
    }

    pub fn focus_tracking_enabled(&self, mode: TrackingMode) -> bool {
        self.track_focus || mode.is_bounded()
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.inactivity_timeout_ms).unwrap_or(i64::MAX))
    }

    pub fn field(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_json_fills_defaults() {
        let config: TrackerConfig = serde_json::from_str(
            r#"{
                "appName": "Frazioni",
                "fields": [
                    {"key": "ex", "label": "Exercises"},
                    {"key": "notes", "label": "Notes", "type": "text", "defaultValue": "none"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.app_name, "Frazioni");
        assert_eq!(config.storage_key, DEFAULT_STORAGE_KEY);
        assert_eq!(config.inactivity_timeout_ms, 120_000);
        assert_eq!(config.fields[0].field_type, FieldType::Number);
        assert!(config.fields[0].show_zero);
        assert!(config.fields[1].is_text());
        assert_eq!(config.fields[1].default_text(), "none");
    }

    #[test]
    fn legacy_storage_detection() {
        let mut config = TrackerConfig::default();
        assert!(!config.uses_legacy_storage());

        config.app_version = "3.2.0".into();
        assert!(config.uses_legacy_storage());

        config.app_version = "4.0.0".into();
        config.isolate_storage = Some(false);
        assert!(config.uses_legacy_storage());

        config.isolate_storage = None;
        config.legacy_mode = Some(true);
        assert!(config.uses_legacy_storage());
    }

    #[test]
    fn verification_beats_classroom_as_initial_mode() {
        let config = TrackerConfig {
            classroom_mode: true,
            verification_mode: true,
            ..TrackerConfig::default()
        };
        assert_eq!(config.initial_mode(), TrackingMode::Verification);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = TrackerConfig::from_json_file(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, TrackerConfig::default());
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        let config = TrackerConfig::from_json_file(&path).unwrap();
        assert_eq!(config, TrackerConfig::default());
    }
}
