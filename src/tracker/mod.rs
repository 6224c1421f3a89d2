//! The session store: one tracker instance's persisted data, its current
//! mode, and the key layout that keeps each mode's data in its own slot.
//!
//! Everything here is synchronous and takes `now` explicitly. Scheduling
//! (the one-second ticker, the devtools poll) and user confirmation live in
//! [`crate::timer::TrackerHandle`].

mod activity;
mod focus;
mod modes;
mod observer;
mod session;

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::{json, Value};

use crate::{
    certificate::{self, Certificate, CertificateContext},
    config::TrackerConfig,
    db::{
        records::{MigrationContext, StoredRecord},
        KeyValueStore,
    },
    models::{
        AppMeta, Event, EventKind, ModeFlags, Session, StudentInfo, SuspiciousActivity,
        SuspiciousKind, TrackedData, TrackingMode, SCHEMA_VERSION,
    },
    namespace::{StorageKeys, STUDENT_INFO_KEY},
    timer::EngagementState,
};

pub use focus::ClipboardAction;
pub use modes::TransitionOutcome;
pub use observer::{NoopObserver, TrackerObserver};

/// Reopening within this window after the last recorded close is most
/// likely a page reload.
pub const RELOAD_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReopenKind {
    LikelyReload,
    Reopened,
}

impl ReopenKind {
    pub fn classify(last_closed: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if now - last_closed < Duration::seconds(RELOAD_WINDOW_SECS) {
            ReopenKind::LikelyReload
        } else {
            ReopenKind::Reopened
        }
    }
}

/// What [`SessionStore::resume`] found and decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeReport {
    pub mode: TrackingMode,
    /// An open session from a previous page load was re-attached.
    pub session_resumed: bool,
    /// Present when mode flags were persisted by an earlier load. Advisory.
    pub reopen: Option<ReopenKind>,
    /// Schema version the slot was upgraded from, if it was.
    pub upgraded_from: Option<u32>,
    pub discarded_corrupt: bool,
}

/// Read-only summary for rendering layers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerStatus {
    pub mode: TrackingMode,
    pub elapsed_secs: u64,
    pub focused: bool,
    pub session_id: Option<String>,
    pub in_session: bool,
    pub namespace: Option<String>,
    pub storage_key: String,
    pub memory_only: bool,
}

#[derive(Debug, Default)]
struct LoadedSlot {
    data: Option<TrackedData>,
    upgraded_from: Option<u32>,
    corrupt: bool,
}

pub struct SessionStore {
    config: TrackerConfig,
    keys: StorageKeys,
    storage: Arc<dyn KeyValueStore>,
    observer: Arc<dyn TrackerObserver>,
    mode: TrackingMode,
    data: TrackedData,
    student: Option<StudentInfo>,
    engagement: EngagementState,
    memory_only: bool,
    resumed: bool,
}

impl SessionStore {
    /// Builds an unresumed store. Nothing is read or written until
    /// [`SessionStore::resume`] runs.
    pub fn new(config: TrackerConfig, storage: Arc<dyn KeyValueStore>) -> Self {
        let keys = StorageKeys::for_config(&config);
        let now = Utc::now();
        let mut store = Self {
            config,
            keys,
            storage,
            observer: Arc::new(NoopObserver),
            mode: TrackingMode::Normal,
            data: placeholder_data(now),
            student: None,
            engagement: EngagementState::new(now),
            memory_only: false,
            resumed: false,
        };
        store.data = store.empty_data(now);
        store
    }

    pub fn with_observer(mut self, observer: Arc<dyn TrackerObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Second initialization phase: recovers persisted mode flags, picks the
    /// matching slot, and re-attaches to (or opens) the mode's session.
    /// Mode flags are read before any data so the right slot is chosen.
    pub fn resume(&mut self, now: DateTime<Utc>) -> ResumeReport {
        debug!(
            "Resuming tracker '{}' ({} storage, key '{}')",
            self.config.app_name,
            if self.keys.is_legacy() { "legacy" } else { "isolated" },
            self.keys.root_key()
        );
        if self.config.debug {
            info!(
                "Namespace {:?}, slots '{}' / '{}' / '{}', modes '{}'",
                self.keys.namespace(),
                self.keys.data_key(TrackingMode::Normal),
                self.keys.data_key(TrackingMode::Classroom),
                self.keys.data_key(TrackingMode::Verification),
                self.keys.modes_key()
            );
        }

        self.resumed = true;
        self.student = self.read_student_info();

        if self.config.migrate_legacy_data && !self.keys.is_legacy() {
            self.migrate_legacy_slot();
        }

        let flags = self.read_mode_flags();
        let reopen = flags
            .as_ref()
            .map(|flags| ReopenKind::classify(flags.last_closed, now));
        match reopen {
            Some(ReopenKind::LikelyReload) => info!("Tracker state recovered after a likely reload"),
            Some(ReopenKind::Reopened) => info!("Tracker state recovered after the page was reopened"),
            None => {}
        }

        let mode = flags
            .as_ref()
            .map(ModeFlags::mode)
            .unwrap_or_else(|| self.config.initial_mode());
        self.mode = mode;
        self.engagement = EngagementState::new(now);

        let loaded = self.load_slot(mode, now);
        let mut session_resumed = false;

        self.data = match (mode.is_bounded(), loaded.data) {
            (true, Some(data)) if data.has_open_session() => {
                session_resumed = true;
                data
            }
            (true, previous) => {
                let mut fresh = self.empty_data(now);
                if let Some(previous) = previous {
                    fresh.session_history = previous.session_history;
                }
                fresh
            }
            (false, Some(data)) => data,
            (false, None) => self.empty_data(now),
        };
        self.ensure_declared_fields();

        if mode.is_bounded() {
            if session_resumed {
                info!("Re-attached to open {mode} session");
            } else {
                let session = Session::open(mode, now);
                self.data.session = Some(session.clone());
                self.log_event(
                    EventKind::SessionStarted,
                    json!({ "sessionId": session.id }),
                    now,
                );
                self.observer.on_session_start(&session);
            }
            self.log_event(EventKind::PageLoad, json!({ "mode": mode }), now);
        }

        self.persist_modes(now);
        self.persist(now);

        ResumeReport {
            mode,
            session_resumed,
            reopen,
            upgraded_from: loaded.upgraded_from,
            discarded_corrupt: loaded.corrupt,
        }
    }

    pub fn mode(&self) -> TrackingMode {
        self.mode
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    pub fn data(&self) -> &TrackedData {
        &self.data
    }

    pub fn snapshot(&self) -> TrackedData {
        self.data.clone()
    }

    pub fn student_info(&self) -> Option<&StudentInfo> {
        self.student.as_ref()
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.data.elapsed_secs()
    }

    pub fn is_focused(&self) -> bool {
        self.engagement.focused
    }

    pub fn is_memory_only(&self) -> bool {
        self.memory_only
    }

    pub fn is_in_session(&self) -> bool {
        self.mode.is_bounded() && self.data.has_open_session()
    }

    pub fn focus_tracking_enabled(&self) -> bool {
        self.config.focus_tracking_enabled(self.mode)
    }

    pub fn status(&self) -> TrackerStatus {
        TrackerStatus {
            mode: self.mode,
            elapsed_secs: self.elapsed_secs(),
            focused: self.engagement.focused,
            session_id: self.data.open_session().map(|s| s.id.clone()),
            in_session: self.is_in_session(),
            namespace: self.keys.namespace().map(str::to_string),
            storage_key: self.keys.data_key(self.mode),
            memory_only: self.memory_only,
        }
    }

    /// Saves the shared student record. Incomplete records are ignored.
    pub fn save_student_info(&mut self, info: StudentInfo, now: DateTime<Utc>) -> bool {
        if !info.is_complete() {
            return false;
        }

        match serde_json::to_string(&info) {
            Ok(raw) => self.write(STUDENT_INFO_KEY, &raw),
            Err(err) => error!("Failed to serialize student info: {err}"),
        }
        self.student = Some(info);
        self.persist(now);
        true
    }

    pub fn certificate(&self, generated: DateTime<Utc>) -> Certificate {
        certificate::build_certificate(&self.data, &self.certificate_context(), generated)
    }

    pub fn certificate_link(&self, generated: DateTime<Utc>) -> anyhow::Result<String> {
        certificate::certificate_link(&self.data, &self.certificate_context(), generated)
    }

    fn certificate_context(&self) -> CertificateContext<'_> {
        CertificateContext {
            config: &self.config,
            namespace: self.keys.namespace().unwrap_or_default(),
            legacy_mode: self.keys.is_legacy(),
            mode: self.mode,
            student: self.student.as_ref(),
        }
    }

    pub(crate) fn log_event(&mut self, kind: EventKind, data: Value, now: DateTime<Utc>) {
        self.data.events.push(Event::new(kind, data, now));
    }

    pub(crate) fn log_suspicious(&mut self, kind: SuspiciousKind, details: Value, now: DateTime<Utc>) {
        let activity = SuspiciousActivity::new(kind, details, now);
        warn!("Suspicious activity in {} mode: {}", self.mode, kind.as_str());
        self.data.suspicious_activities.push(activity.clone());
        self.observer.on_suspicious_activity(&activity);
        if self.mode == TrackingMode::Verification {
            self.observer
                .on_warning(&format!("Activity recorded: {}", kind.message()));
        }
    }

    /// Closes the open session, if any, and archives it.
    pub(crate) fn close_open_session(&mut self, now: DateTime<Utc>) -> Option<Session> {
        let closed = {
            let session = self.data.session.as_mut().filter(|s| s.is_open())?;
            session.end_time = Some(now);
            session.clone()
        };
        self.data.session_history.push(closed.clone());
        self.log_event(
            EventKind::SessionEnded,
            json!({ "sessionId": closed.id, "duration": closed.duration_secs(now) }),
            now,
        );
        info!("Closed {} session {}", closed.mode, closed.id);
        self.observer.on_session_end(&closed);
        Some(closed)
    }

    fn empty_data(&self, now: DateTime<Utc>) -> TrackedData {
        TrackedData {
            schema_version: SCHEMA_VERSION,
            meta: self.meta_template(now),
            values: self.default_values(),
            text_fields: self.default_text_fields(),
            session: None,
            session_history: Vec::new(),
            student_info: self.student.clone(),
            events: Vec::new(),
            suspicious_activities: Vec::new(),
        }
    }

    fn meta_template(&self, now: DateTime<Utc>) -> AppMeta {
        AppMeta {
            app_name: self.config.app_name.clone(),
            app_version: self.config.app_version.clone(),
            app_path: self.config.app_path.clone(),
            namespace: self.keys.namespace().unwrap_or_default().to_string(),
            legacy_mode: self.keys.is_legacy(),
            start_time: now,
            last_update: now,
        }
    }

    fn default_values(&self) -> BTreeMap<String, f64> {
        let mut values = BTreeMap::from([("t".to_string(), 0.0)]);
        for field in self.config.fields.iter().filter(|f| !f.is_text()) {
            values.insert(field.key.clone(), field.default_number());
        }
        if self.focus_tracking_enabled() {
            values.insert("fl".to_string(), 0.0);
            values.insert("flt".to_string(), 0.0);
        }
        values
    }

    fn default_text_fields(&self) -> BTreeMap<String, String> {
        self.config
            .fields
            .iter()
            .filter(|f| f.is_text())
            .map(|field| (field.key.clone(), field.default_text()))
            .collect()
    }

    /// Fields declared after a record was written get their defaults.
    fn ensure_declared_fields(&mut self) {
        for (key, value) in self.default_values() {
            self.data.values.entry(key).or_insert(value);
        }
        for (key, value) in self.default_text_fields() {
            self.data.text_fields.entry(key).or_insert(value);
        }
    }

    fn migration_context(&self, now: DateTime<Utc>) -> MigrationContext {
        MigrationContext {
            meta: self.meta_template(now),
            now,
        }
    }

    fn load_slot(&self, mode: TrackingMode, now: DateTime<Utc>) -> LoadedSlot {
        let key = self.keys.data_key(mode);
        let Some(raw) = self.read(&key) else {
            return LoadedSlot::default();
        };

        match StoredRecord::parse(&raw) {
            Ok(record) => {
                let version = record.version();
                let upgraded_from = (version < SCHEMA_VERSION).then(|| {
                    info!("Upgrading '{key}' from schema v{version}");
                    version
                });
                LoadedSlot {
                    data: Some(record.upgrade(&self.migration_context(now))),
                    upgraded_from,
                    corrupt: false,
                }
            }
            Err(err) => {
                warn!("Discarding unreadable record at '{key}': {err:#}");
                LoadedSlot {
                    data: None,
                    upgraded_from: None,
                    corrupt: true,
                }
            }
        }
    }

    fn load_or_create(&self, mode: TrackingMode, now: DateTime<Utc>) -> TrackedData {
        self.load_slot(mode, now)
            .data
            .unwrap_or_else(|| self.empty_data(now))
    }

    fn read_student_info(&self) -> Option<StudentInfo> {
        let raw = self.read(STUDENT_INFO_KEY)?;
        serde_json::from_str(&raw)
            .map_err(|err| warn!("Ignoring unreadable student info: {err}"))
            .ok()
    }

    fn read_mode_flags(&self) -> Option<ModeFlags> {
        let key = self.keys.modes_key();
        let raw = self.read(&key)?;
        serde_json::from_str(&raw)
            .map_err(|err| warn!("Ignoring unreadable mode flags at '{key}': {err}"))
            .ok()
    }

    /// One-way copy of the unnamespaced slot into this page's namespaced
    /// slot. Only runs when the target is empty and the stored record names
    /// this same app; anything less certain is left alone.
    fn migrate_legacy_slot(&mut self) {
        let legacy_key = self.keys.unnamespaced_key().to_string();
        let target_key = self.keys.data_key(TrackingMode::Normal);
        if self.read(&target_key).is_some() {
            return;
        }
        let Some(raw) = self.read(&legacy_key) else {
            return;
        };

        match StoredRecord::parse(&raw) {
            Ok(record) => match record.app_name() {
                Some(name) if name == self.config.app_name => {
                    info!("Migrating legacy data '{legacy_key}' -> '{target_key}'");
                    self.write(&target_key, &raw);
                }
                Some(name) => warn!(
                    "Not migrating '{legacy_key}': recorded app '{name}' is not '{}'",
                    self.config.app_name
                ),
                None => warn!("Not migrating '{legacy_key}': record carries no app name"),
            },
            Err(err) => warn!("Not migrating unreadable legacy record '{legacy_key}': {err:#}"),
        }
    }

    /// Write-through of the current slot.
    pub(crate) fn persist(&mut self, now: DateTime<Utc>) {
        if !self.resumed {
            debug!("Skipping write before resume");
            return;
        }

        self.data.meta.last_update = now;
        self.data.student_info = self.student.clone();
        let key = self.keys.data_key(self.mode);
        match serde_json::to_string(&self.data) {
            Ok(raw) => self.write(&key, &raw),
            Err(err) => error!("Failed to serialize tracked data for '{key}': {err}"),
        }
    }

    pub(crate) fn persist_modes(&mut self, now: DateTime<Utc>) {
        if !self.resumed {
            return;
        }

        let flags = ModeFlags::for_mode(self.mode, now);
        let key = self.keys.modes_key();
        match serde_json::to_string(&flags) {
            Ok(raw) => self.write(&key, &raw),
            Err(err) => error!("Failed to serialize mode flags: {err}"),
        }
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.storage.get(key) {
            Ok(value) => value,
            Err(err) => {
                warn!("Reading '{key}' from {} store failed: {err:#}", self.storage.name());
                None
            }
        }
    }

    fn write(&mut self, key: &str, value: &str) {
        if self.memory_only {
            return;
        }
        if let Err(err) = self.storage.set(key, value) {
            error!(
                "Writing '{key}' to {} store failed; continuing in memory only: {err:#}",
                self.storage.name()
            );
            self.memory_only = true;
            self.observer.on_storage_error(&err);
        }
    }
}

fn placeholder_data(now: DateTime<Utc>) -> TrackedData {
    TrackedData {
        schema_version: SCHEMA_VERSION,
        meta: AppMeta {
            app_name: String::new(),
            app_version: String::new(),
            app_path: String::new(),
            namespace: String::new(),
            legacy_mode: false,
            start_time: now,
            last_update: now,
        },
        values: BTreeMap::new(),
        text_fields: BTreeMap::new(),
        session: None,
        session_history: Vec::new(),
        student_info: None,
        events: Vec::new(),
        suspicious_activities: Vec::new(),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use chrono::TimeZone;

    use super::*;
    use crate::{
        config::FieldSpec,
        db::MemoryStore,
        models::FieldValue,
    };

    pub fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    pub fn config() -> TrackerConfig {
        TrackerConfig {
            app_name: "Frazioni".into(),
            app_path: "/application/matematica/frazioni.html".into(),
            fields: vec![
                FieldSpec::number("ex", "Exercises"),
                FieldSpec::text("notes", "Notes"),
            ],
            ..TrackerConfig::default()
        }
    }

    pub fn resumed(config: TrackerConfig, storage: Arc<MemoryStore>) -> SessionStore {
        let mut store = SessionStore::new(config, storage);
        store.resume(at(0));
        store
    }

    /// Records every callback as a short string.
    #[derive(Default)]
    pub struct Recorder {
        pub calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn push(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl TrackerObserver for Recorder {
        fn on_timer_tick(&self, elapsed_secs: u64) {
            self.push(format!("tick:{elapsed_secs}"));
        }
        fn on_field_update(&self, key: &str, value: &FieldValue) {
            self.push(format!("field:{key}={value}"));
        }
        fn on_reset(&self) {
            self.push("reset".into());
        }
        fn on_session_start(&self, session: &Session) {
            self.push(format!("session_start:{}", session.mode));
        }
        fn on_session_end(&self, session: &Session) {
            self.push(format!("session_end:{}", session.mode));
        }
        fn on_mode_change(&self, from: TrackingMode, to: TrackingMode) {
            self.push(format!("mode:{from}->{to}"));
        }
        fn on_suspicious_activity(&self, activity: &SuspiciousActivity) {
            self.push(format!("suspicious:{}", activity.kind));
        }
        fn on_warning(&self, message: &str) {
            self.push(format!("warning:{message}"));
        }
        fn on_storage_error(&self, _error: &anyhow::Error) {
            self.push("storage_error".into());
        }
    }
}
