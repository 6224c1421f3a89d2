//! Shareable certificate links.
//!
//! A certificate is a self-contained JSON summary of one tracked context,
//! base64-encoded into the `cert` query parameter of the configured viewer
//! URL. Building it is pure: the only timestamp it reads is the
//! `generated` argument.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    config::{FieldType, TrackerConfig},
    models::{
        serialize_values, Event, EventKind, Session, StudentInfo, SuspiciousActivity,
        SuspiciousKind, TrackedData, TrackingMode,
    },
};

pub const CERT_QUERY_PARAM: &str = "cert";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateMeta {
    pub app_name: String,
    pub app_version: String,
    pub app_path: String,
    pub namespace: String,
    pub legacy_mode: bool,
    pub mode: TrackingMode,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub generated: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub end_time: DateTime<Utc>,
    pub classroom_mode: bool,
    pub verification_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldDeclaration {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub show_zero: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Violations {
    pub focus_lost: u64,
    pub focus_lost_time: u64,
    pub resizes: usize,
    pub suspicious_resizes: usize,
    pub copy_paste_attempts: usize,
    pub devtools_opened: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationDetail {
    pub session: Option<Session>,
    pub suspicious_activities: Vec<SuspiciousActivity>,
    pub events: Vec<Event>,
    pub violations: Violations,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomDetail {
    pub id: String,
    pub focus_events: Vec<Event>,
    pub strict_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub meta: CertificateMeta,
    pub student_info: Option<StudentInfo>,
    #[serde(serialize_with = "serialize_values")]
    pub values: BTreeMap<String, f64>,
    pub text_fields: BTreeMap<String, String>,
    pub fields: Vec<FieldDeclaration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<ClassroomDetail>,
}

/// Everything besides the tracked record that goes into a certificate.
#[derive(Debug, Clone, Copy)]
pub struct CertificateContext<'a> {
    pub config: &'a TrackerConfig,
    pub namespace: &'a str,
    pub legacy_mode: bool,
    pub mode: TrackingMode,
    pub student: Option<&'a StudentInfo>,
}

pub fn build_certificate(
    data: &TrackedData,
    ctx: &CertificateContext<'_>,
    generated: DateTime<Utc>,
) -> Certificate {
    let config = ctx.config;
    let session = data.session.as_ref();

    let meta = CertificateMeta {
        app_name: config.app_name.clone(),
        app_version: config.app_version.clone(),
        app_path: config.app_path.clone(),
        namespace: ctx.namespace.to_string(),
        legacy_mode: ctx.legacy_mode,
        mode: ctx.mode,
        generated,
        start_time: session.map_or(data.meta.start_time, |s| s.start_time),
        end_time: session
            .and_then(|s| s.end_time)
            .unwrap_or(data.meta.last_update),
        classroom_mode: ctx.mode == TrackingMode::Classroom,
        verification_mode: ctx.mode == TrackingMode::Verification,
    };

    let mut fields: Vec<FieldDeclaration> = config
        .fields
        .iter()
        .map(|field| FieldDeclaration {
            key: field.key.clone(),
            label: field.label.clone(),
            field_type: field.field_type,
            unit: field.unit.clone(),
            show_zero: field.show_zero,
        })
        .collect();

    if config.focus_tracking_enabled(ctx.mode) {
        fields.push(FieldDeclaration {
            key: "fl".into(),
            label: "Times window left".into(),
            field_type: FieldType::Number,
            unit: String::new(),
            show_zero: true,
        });
        fields.push(FieldDeclaration {
            key: "flt".into(),
            label: "Time out of focus".into(),
            field_type: FieldType::Time,
            unit: String::new(),
            show_zero: true,
        });
    }

    let verification = (ctx.mode == TrackingMode::Verification).then(|| VerificationDetail {
        session: data.session.clone(),
        suspicious_activities: data.suspicious_activities.clone(),
        events: data.events.clone(),
        violations: count_violations(data),
    });

    let classroom = match (ctx.mode, session) {
        (TrackingMode::Classroom, Some(session)) => Some(ClassroomDetail {
            id: session.id.clone(),
            focus_events: data
                .events
                .iter()
                .filter(|e| e.is(EventKind::FocusLost) || e.is(EventKind::FocusRestored))
                .cloned()
                .collect(),
            strict_mode: session.strict,
        }),
        _ => None,
    };

    Certificate {
        meta,
        student_info: ctx.student.cloned(),
        values: data.values.clone(),
        text_fields: data.text_fields.clone(),
        fields,
        verification,
        session: classroom,
    }
}

pub fn count_violations(data: &TrackedData) -> Violations {
    let suspicious = |kinds: &[SuspiciousKind]| {
        data.suspicious_activities
            .iter()
            .filter(|a| kinds.iter().any(|kind| a.is(*kind)))
            .count()
    };

    Violations {
        focus_lost: data.value("fl").max(0.0) as u64,
        focus_lost_time: data.value("flt").max(0.0) as u64,
        resizes: data
            .events
            .iter()
            .filter(|e| e.is(EventKind::WindowResize))
            .count(),
        suspicious_resizes: suspicious(&[SuspiciousKind::SuspiciousResize]),
        copy_paste_attempts: suspicious(&[SuspiciousKind::CopyAttempt, SuspiciousKind::PasteAttempt]),
        devtools_opened: suspicious(&[SuspiciousKind::DevtoolsOpen]),
    }
}

pub fn encode_link(cert_url: &str, certificate: &Certificate) -> Result<String> {
    let json = serde_json::to_string(certificate).context("failed to serialize certificate")?;
    let encoded = STANDARD.encode(json.as_bytes());

    let mut url =
        Url::parse(cert_url).with_context(|| format!("invalid certificate URL '{cert_url}'"))?;
    url.query_pairs_mut().append_pair(CERT_QUERY_PARAM, &encoded);
    Ok(url.into())
}

pub fn certificate_link(
    data: &TrackedData,
    ctx: &CertificateContext<'_>,
    generated: DateTime<Utc>,
) -> Result<String> {
    encode_link(&ctx.config.cert_url, &build_certificate(data, ctx, generated))
}

pub fn decode_link(link: &str) -> Result<Certificate> {
    let url = Url::parse(link).with_context(|| format!("invalid certificate link '{link}'"))?;
    let encoded = url
        .query_pairs()
        .find(|(key, _)| key == CERT_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| anyhow!("link has no '{CERT_QUERY_PARAM}' parameter"))?;

    let bytes = STANDARD
        .decode(encoded.as_bytes())
        .context("certificate payload is not valid base64")?;
    serde_json::from_slice(&bytes).context("certificate payload is not a certificate")
}

/// `42s`, `3m 5s`, `2h 1m`.
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
