//! Storage namespacing.
//!
//! Independent pages served from the same origin share one key-value store.
//! Each page gets a namespace derived from its URL path so its slots never
//! collide with another page's. Pages deployed before isolation existed run
//! in legacy mode and keep their bare, unnamespaced keys.

use crate::{config::TrackerConfig, models::TrackingMode};

/// Unnamespaced on purpose: the student is the same across every page.
pub const STUDENT_INFO_KEY: &str = "student_global_info";

const PREFIX_SEGMENT: &str = "application";
const NESTED_PREFIX_SEGMENT: &str = "certificationSystem";
const FALLBACK_NAMESPACE: &str = "app";

/// Derives the storage namespace for a page.
///
/// `/application/matematica/frazioni.html` resolves to `matematica_frazioni`;
/// a root or single-file path falls back to the sanitized app name.
pub fn resolve_namespace(path: &str, app_id: Option<&str>, app_name: &str) -> String {
    if let Some(id) = app_id.filter(|id| !id.is_empty()) {
        return id.to_string();
    }

    let segments = meaningful_segments(path);
    if segments.len() <= 1 {
        return fallback_namespace(app_name);
    }

    let folder = segments[segments.len() - 2];
    let file = strip_html_extension(segments[segments.len() - 1]);
    let raw = if file.is_empty() || file.eq_ignore_ascii_case("index") {
        folder.to_string()
    } else {
        format!("{folder}_{file}")
    };

    let namespace = sanitize(&raw);
    if namespace.is_empty() {
        fallback_namespace(app_name)
    } else {
        namespace
    }
}

/// Lowercases, maps everything outside `[a-z0-9_]` to `_`, collapses runs of
/// `_` and trims them from both ends.
pub fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars().flat_map(char::to_lowercase) {
        let ch = if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            ch
        } else {
            '_'
        };
        if ch == '_' && out.ends_with('_') {
            continue;
        }
        out.push(ch);
    }
    out.trim_matches('_').to_string()
}

/// `true` when the major component of `version` parses below 4.
pub fn is_legacy_version(version: &str) -> bool {
    let major = version.trim().split('.').next().unwrap_or_default();
    let digits: String = major.chars().take_while(char::is_ascii_digit).collect();
    digits.parse::<u64>().map(|major| major < 4).unwrap_or(false)
}

fn meaningful_segments(path: &str) -> Vec<&str> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let raw: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let mut segments = Vec::with_capacity(raw.len());
    let mut idx = 0;
    while idx < raw.len() {
        if raw[idx] == PREFIX_SEGMENT {
            idx += 1;
            if raw.get(idx) == Some(&NESTED_PREFIX_SEGMENT) {
                idx += 1;
            }
            continue;
        }
        segments.push(raw[idx]);
        idx += 1;
    }
    segments
}

fn strip_html_extension(file: &str) -> &str {
    let lower = file.to_ascii_lowercase();
    if lower.ends_with(".html") {
        &file[..file.len() - 5]
    } else if lower.ends_with(".htm") {
        &file[..file.len() - 4]
    } else {
        file
    }
}

fn fallback_namespace(app_name: &str) -> String {
    let namespace = sanitize(app_name);
    if namespace.is_empty() {
        FALLBACK_NAMESPACE.to_string()
    } else {
        namespace
    }
}

/// Key layout for one tracker instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    namespace: Option<String>,
    base_key: String,
}

impl StorageKeys {
    pub fn for_config(config: &TrackerConfig) -> Self {
        if config.uses_legacy_storage() {
            Self::legacy(&config.storage_key)
        } else {
            let namespace = resolve_namespace(
                &config.app_path,
                config.app_id.as_deref(),
                &config.app_name,
            );
            Self::namespaced(namespace, &config.storage_key)
        }
    }

    pub fn namespaced(namespace: impl Into<String>, base_key: &str) -> Self {
        Self {
            namespace: Some(namespace.into()),
            base_key: base_key.to_string(),
        }
    }

    pub fn legacy(base_key: &str) -> Self {
        Self {
            namespace: None,
            base_key: base_key.to_string(),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn is_legacy(&self) -> bool {
        self.namespace.is_none()
    }

    /// The pre-isolation key for this instance's base key.
    pub fn unnamespaced_key(&self) -> &str {
        &self.base_key
    }

    pub fn root_key(&self) -> String {
        match &self.namespace {
            Some(namespace) => format!("{namespace}_{}", self.base_key),
            None => self.base_key.clone(),
        }
    }

    pub fn data_key(&self, mode: TrackingMode) -> String {
        format!("{}{}", self.root_key(), mode.slot_suffix())
    }

    pub fn modes_key(&self) -> String {
        format!("{}_modes", self.root_key())
    }
}
