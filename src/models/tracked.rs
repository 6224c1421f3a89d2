use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use super::{Event, StudentInfo, SuspiciousActivity, TrackingMode};

/// Layout version written by this crate. Older layouts are upgraded on load.
pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppMeta {
    pub app_name: String,
    pub app_version: String,
    #[serde(default)]
    pub app_path: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub legacy_mode: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_update: DateTime<Utc>,
}

/// A bounded Classroom or Verification interval. Once `end_time` is set the
/// session is archived and never reopened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub end_time: Option<DateTime<Utc>>,
    pub mode: TrackingMode,
    #[serde(default)]
    pub strict: bool,
}

impl Session {
    pub fn open(mode: TrackingMode, start_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            start_time,
            end_time: None,
            mode,
            strict: mode == TrackingMode::Verification,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn duration_secs(&self, now: DateTime<Utc>) -> i64 {
        let end = self.end_time.unwrap_or(now);
        (end - self.start_time).num_seconds().max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Number(value) => write!(f, "{}", json_number(*value)),
            FieldValue::Text(value) => f.write_str(value),
        }
    }
}

/// Persisted record for one tracking context (one mode slot).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackedData {
    pub schema_version: u32,
    pub meta: AppMeta,
    #[serde(serialize_with = "serialize_values")]
    pub values: BTreeMap<String, f64>,
    #[serde(default)]
    pub text_fields: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
    #[serde(default)]
    pub session_history: Vec<Session>,
    #[serde(default)]
    pub student_info: Option<StudentInfo>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub suspicious_activities: Vec<SuspiciousActivity>,
}

impl TrackedData {
    pub fn value(&self, key: &str) -> f64 {
        self.values.get(key).copied().unwrap_or(0.0)
    }

    /// Elapsed active seconds (`values.t`).
    pub fn elapsed_secs(&self) -> u64 {
        self.value("t").max(0.0) as u64
    }

    pub fn open_session(&self) -> Option<&Session> {
        self.session.as_ref().filter(|session| session.is_open())
    }

    pub fn has_open_session(&self) -> bool {
        self.open_session().is_some()
    }
}

/// Integral accumulators are written as JSON integers so a certificate reads
/// `"t": 42` rather than `"t": 42.0`.
pub fn serialize_values<S>(values: &BTreeMap<String, f64>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_map(values.iter().map(|(key, value)| (key, json_number(*value))))
}

pub fn json_number(value: f64) -> Value {
    const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;
    if value.fract() == 0.0 && value.abs() <= MAX_SAFE_INTEGER {
        Value::from(value as i64)
    } else {
        serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
