//! Versioned layouts of a stored TrackedData record.
//!
//! | Version | Written by            | Shape                                   |
//! |---------|-----------------------|-----------------------------------------|
//! | 0       | 1.x trackers          | flat `{ "t": 12, "ex": 3, "fl": 1 }`     |
//! | 1       | 4.x trackers          | `_meta`, `_values`, `_textFields`, ...   |
//! | 2       | this crate            | camelCase with `schemaVersion: 2`        |
//!
//! Loading parses into [`StoredRecord`] and walks one migration per version
//! step until the current layout is reached. Migrations are pure.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::models::{
    AppMeta, Event, Session, StudentInfo, SuspiciousActivity, TrackedData, TrackingMode,
    SCHEMA_VERSION,
};

/// Provenance used to fill in metadata older layouts never recorded.
#[derive(Debug, Clone)]
pub struct MigrationContext {
    pub meta: AppMeta,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum StoredRecord {
    Flat(Map<String, Value>),
    Underscored(UnderscoredRecord),
    Current(TrackedData),
}

impl StoredRecord {
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw).context("stored record is not JSON")?;
        let Value::Object(map) = value else {
            bail!("stored record is not a JSON object");
        };

        if let Some(version) = map.get("schemaVersion") {
            return match version.as_u64() {
                Some(v) if v == u64::from(SCHEMA_VERSION) => {
                    let data = serde_json::from_value(Value::Object(map))
                        .context("malformed current-layout record")?;
                    Ok(StoredRecord::Current(data))
                }
                _ => bail!("unsupported schema version {version}"),
            };
        }

        if map.contains_key("_meta") || map.contains_key("_values") {
            let record = serde_json::from_value(Value::Object(map))
                .context("malformed underscored record")?;
            return Ok(StoredRecord::Underscored(record));
        }

        Ok(StoredRecord::Flat(map))
    }

    pub fn version(&self) -> u32 {
        match self {
            StoredRecord::Flat(_) => 0,
            StoredRecord::Underscored(_) => 1,
            StoredRecord::Current(_) => SCHEMA_VERSION,
        }
    }

    /// App name recorded in the record's metadata, if any.
    pub fn app_name(&self) -> Option<&str> {
        match self {
            StoredRecord::Flat(_) => None,
            StoredRecord::Underscored(record) => record
                .meta
                .as_ref()
                .and_then(|meta| meta.app_name.as_deref()),
            StoredRecord::Current(data) => Some(data.meta.app_name.as_str()),
        }
    }

    pub fn upgrade(self, ctx: &MigrationContext) -> TrackedData {
        let mut record = self;
        loop {
            record = match record {
                StoredRecord::Flat(map) => StoredRecord::Underscored(migrate_flat(map, ctx)),
                StoredRecord::Underscored(old) => {
                    StoredRecord::Current(migrate_underscored(old, ctx))
                }
                StoredRecord::Current(data) => return data,
            };
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnderscoredMeta {
    pub app_name: Option<String>,
    pub app_version: Option<String>,
    pub app_path: Option<String>,
    pub namespace: Option<String>,
    pub legacy_mode: Option<bool>,
    pub start_time: Option<i64>,
    pub last_update: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnderscoredSession {
    pub id: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub verification_mode: Option<bool>,
    pub strict_mode: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnderscoredEntry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub details: Value,
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnderscoredRecord {
    #[serde(rename = "_meta", default)]
    pub meta: Option<UnderscoredMeta>,
    #[serde(rename = "_values", default)]
    pub values: Map<String, Value>,
    #[serde(rename = "_textFields", default)]
    pub text_fields: Map<String, Value>,
    #[serde(rename = "_session", default)]
    pub session: Option<UnderscoredSession>,
    #[serde(rename = "_classroomSession", default)]
    pub classroom_session: Option<UnderscoredSession>,
    #[serde(rename = "_verificationSession", default)]
    pub verification_session: Option<UnderscoredSession>,
    #[serde(rename = "_sessionHistory", default)]
    pub session_history: Vec<UnderscoredSession>,
    #[serde(rename = "_studentInfo", default)]
    pub student_info: Option<StudentInfo>,
    #[serde(rename = "_events", default)]
    pub events: Vec<UnderscoredEntry>,
    #[serde(rename = "_suspiciousActivities", default)]
    pub suspicious_activities: Vec<UnderscoredEntry>,
}

/// v0 → v1: numeric keys become `_values`; start time is back-dated by the
/// elapsed seconds the record already carries.
fn migrate_flat(map: Map<String, Value>, ctx: &MigrationContext) -> UnderscoredRecord {
    let values: Map<String, Value> = map
        .into_iter()
        .filter(|(_, value)| value.is_number())
        .collect();

    let elapsed = values.get("t").and_then(Value::as_f64).unwrap_or(0.0).max(0.0);
    let start = ctx.now - Duration::seconds(elapsed as i64);

    UnderscoredRecord {
        meta: Some(UnderscoredMeta {
            app_name: Some(ctx.meta.app_name.clone()),
            app_version: Some(ctx.meta.app_version.clone()),
            app_path: Some(ctx.meta.app_path.clone()),
            namespace: Some(ctx.meta.namespace.clone()),
            legacy_mode: Some(ctx.meta.legacy_mode),
            start_time: Some(start.timestamp_millis()),
            last_update: Some(ctx.now.timestamp_millis()),
        }),
        values,
        ..UnderscoredRecord::default()
    }
}

/// v1 → v2: camelCase layout, typed timestamps, one `session` slot.
fn migrate_underscored(old: UnderscoredRecord, ctx: &MigrationContext) -> TrackedData {
    let meta_in = old.meta.unwrap_or_default();
    let meta = AppMeta {
        app_name: meta_in.app_name.unwrap_or_else(|| ctx.meta.app_name.clone()),
        app_version: meta_in
            .app_version
            .unwrap_or_else(|| ctx.meta.app_version.clone()),
        app_path: meta_in.app_path.unwrap_or_else(|| ctx.meta.app_path.clone()),
        namespace: meta_in.namespace.unwrap_or_else(|| ctx.meta.namespace.clone()),
        legacy_mode: meta_in.legacy_mode.unwrap_or(ctx.meta.legacy_mode),
        start_time: millis_or(meta_in.start_time, ctx.now),
        last_update: millis_or(meta_in.last_update, ctx.now),
    };

    let mut values: BTreeMap<String, f64> = old
        .values
        .iter()
        .filter_map(|(key, value)| value.as_f64().map(|number| (key.clone(), number)))
        .collect();
    values.entry("t".to_string()).or_insert(0.0);

    let text_fields = old
        .text_fields
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::String(text) => Some((key, text)),
            Value::Null => None,
            other => Some((key, other.to_string())),
        })
        .collect();

    let session = old
        .verification_session
        .map(|s| convert_session(s, TrackingMode::Verification, ctx.now))
        .or_else(|| {
            old.session.map(|s| {
                let mode = if s.verification_mode == Some(true) {
                    TrackingMode::Verification
                } else {
                    TrackingMode::Classroom
                };
                convert_session(s, mode, ctx.now)
            })
        })
        .or_else(|| {
            old.classroom_session
                .map(|s| convert_session(s, TrackingMode::Classroom, ctx.now))
        });

    let mut session_history: Vec<Session> = old
        .session_history
        .into_iter()
        .map(|s| {
            let mode = if s.verification_mode == Some(true) {
                TrackingMode::Verification
            } else {
                TrackingMode::Classroom
            };
            convert_session(s, mode, ctx.now)
        })
        .filter(|s| !s.is_open())
        .collect();

    // 4.x trackers stamped `endTime` on leaving a mode without archiving.
    if let Some(closed) = session.as_ref().filter(|s| !s.is_open()) {
        if !session_history.iter().any(|s| s.id == closed.id) {
            session_history.push(closed.clone());
        }
    }

    let events = old
        .events
        .into_iter()
        .map(|entry| Event {
            kind: entry.kind,
            data: entry.data,
            timestamp: millis_or(entry.timestamp, ctx.now),
        })
        .collect();

    let suspicious_activities = old
        .suspicious_activities
        .into_iter()
        .map(|entry| SuspiciousActivity {
            kind: entry.kind,
            details: entry.details,
            timestamp: millis_or(entry.timestamp, ctx.now),
        })
        .collect();

    TrackedData {
        schema_version: SCHEMA_VERSION,
        meta,
        values,
        text_fields,
        session,
        session_history,
        student_info: old.student_info,
        events,
        suspicious_activities,
    }
}

fn convert_session(old: UnderscoredSession, mode: TrackingMode, now: DateTime<Utc>) -> Session {
    let start_time = millis_or(old.start_time, now);
    Session {
        id: old
            .id
            .unwrap_or_else(|| format!("session_{}", start_time.timestamp_millis())),
        start_time,
        end_time: old.end_time.and_then(from_millis),
        mode,
        strict: old.strict_mode.unwrap_or(mode == TrackingMode::Verification),
    }
}

fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

fn millis_or(millis: Option<i64>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    millis.and_then(from_millis).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(now: DateTime<Utc>) -> MigrationContext {
        MigrationContext {
            meta: AppMeta {
                app_name: "Frazioni".into(),
                app_version: "4.1.0".into(),
                app_path: "/application/matematica/frazioni.html".into(),
                namespace: "matematica_frazioni".into(),
                legacy_mode: false,
                start_time: now,
                last_update: now,
            },
            now,
        }
    }

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    #[test]
    fn flat_record_migrates_to_current() {
        let now = at(1_700_000_100_000);
        let record = StoredRecord::parse(r#"{"t": 100, "ex": 7, "fl": 2, "note": "x"}"#).unwrap();
        assert_eq!(record.version(), 0);
        assert_eq!(record.app_name(), None);

        let data = record.upgrade(&ctx(now));
        assert_eq!(data.schema_version, SCHEMA_VERSION);
        assert_eq!(data.value("t"), 100.0);
        assert_eq!(data.value("ex"), 7.0);
        assert_eq!(data.value("fl"), 2.0);
        assert!(!data.values.contains_key("note"));
        assert_eq!(data.meta.start_time, at(1_700_000_000_000));
        assert_eq!(data.meta.app_name, "Frazioni");
    }

    #[test]
    fn underscored_record_keeps_sessions_and_logs() {
        let now = at(1_700_000_900_000);
        let raw = json!({
            "_meta": {"appName": "Vecchia", "appVersion": "4.0.0", "startTime": 1_700_000_000_000i64},
            "_values": {"t": 30, "fl": 1, "flt": 4},
            "_textFields": {"notes": "ok"},
            "_verificationSession": {"startTime": 1_700_000_000_000i64, "endTime": null, "strictMode": true},
            "_sessionHistory": [{"id": "s1", "startTime": 1_699_999_000_000i64, "endTime": 1_699_999_500_000i64}],
            "_studentInfo": {"nome": "Ada", "cognome": "Lovelace", "classe": "3B"},
            "_events": [{"type": "focus_lost", "data": {"count": 1}, "timestamp": 1_700_000_010_000i64}],
            "_suspiciousActivities": [{"type": "copy_attempt", "details": {}, "timestamp": 1_700_000_020_000i64}]
        })
        .to_string();

        let record = StoredRecord::parse(&raw).unwrap();
        assert_eq!(record.version(), 1);
        assert_eq!(record.app_name(), Some("Vecchia"));

        let data = record.upgrade(&ctx(now));
        assert_eq!(data.meta.app_name, "Vecchia");
        assert_eq!(data.meta.last_update, now);
        assert_eq!(data.text_fields.get("notes").map(String::as_str), Some("ok"));

        let session = data.session.as_ref().unwrap();
        assert_eq!(session.mode, TrackingMode::Verification);
        assert!(session.strict);
        assert!(session.is_open());
        assert_eq!(session.id, "session_1700000000000");

        assert_eq!(data.session_history.len(), 1);
        assert_eq!(data.session_history[0].id, "s1");
        assert_eq!(data.student_info.as_ref().unwrap().first_name, "Ada");
        assert_eq!(data.events[0].kind, "focus_lost");
        assert_eq!(data.suspicious_activities[0].kind, "copy_attempt");
    }

    #[test]
    fn closed_underscored_session_is_archived_once() {
        let now = at(1_700_000_900_000);
        let raw = json!({
            "_meta": {"appName": "Frazioni"},
            "_values": {"t": 12},
            "_verificationSession": {"id": "v1", "startTime": 1_700_000_000_000i64, "endTime": 1_700_000_600_000i64},
            "_sessionHistory": [{"id": "s0", "startTime": 1_699_999_000_000i64, "endTime": 1_699_999_500_000i64}]
        })
        .to_string();

        let data = StoredRecord::parse(&raw).unwrap().upgrade(&ctx(now));
        assert!(!data.has_open_session());
        let ids: Vec<_> = data.session_history.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s0", "v1"]);
        assert_eq!(data.session_history[1].mode, TrackingMode::Verification);

        let archived = json!({
            "_values": {"t": 12},
            "_classroomSession": {"id": "c1", "startTime": 1_700_000_000_000i64, "endTime": 1_700_000_600_000i64},
            "_sessionHistory": [{"id": "c1", "startTime": 1_700_000_000_000i64, "endTime": 1_700_000_600_000i64}]
        })
        .to_string();
        let data = StoredRecord::parse(&archived).unwrap().upgrade(&ctx(now));
        assert_eq!(data.session_history.len(), 1);
    }

    #[test]
    fn current_record_round_trips() {
        let now = at(1_700_000_000_000);
        let original = StoredRecord::Flat(Map::new()).upgrade(&ctx(now));
        let raw = serde_json::to_string(&original).unwrap();
        let parsed = StoredRecord::parse(&raw).unwrap();
        assert_eq!(parsed.version(), SCHEMA_VERSION);
        assert_eq!(parsed.upgrade(&ctx(now)), original);
    }

    #[test]
    fn corrupt_input_is_rejected() {
        assert!(StoredRecord::parse("{not json").is_err());
        assert!(StoredRecord::parse("[1, 2]").is_err());
        assert!(StoredRecord::parse(r#"{"schemaVersion": 99}"#).is_err());
        assert!(StoredRecord::parse(r#"{"_values": 5}"#).is_err());
    }
}
