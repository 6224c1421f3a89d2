use chrono::{DateTime, Utc};
use log::{info, warn};
use serde_json::json;

use super::SessionStore;
use crate::{
    confirm::ConfirmPrompt,
    models::{EventKind, Session, SuspiciousKind, TrackingMode},
};

impl SessionStore {
    /// Starts a fresh session inside the current bounded mode, closing any
    /// open one first. Values and text fields return to their defaults.
    pub fn start_session(&mut self, now: DateTime<Utc>) -> Option<Session> {
        if !self.mode.is_bounded() {
            warn!("Sessions only exist in classroom or verification mode");
            return None;
        }

        self.close_open_session(now);
        self.data.values = self.default_values();
        self.data.text_fields = self.default_text_fields();
        self.engagement.reset_focus(now);

        let session = Session::open(self.mode, now);
        self.data.session = Some(session.clone());
        self.log_event(
            EventKind::SessionStarted,
            json!({ "sessionId": session.id }),
            now,
        );
        self.persist(now);
        self.observer.on_session_start(&session);
        Some(session)
    }

    /// Closes the open session and returns the certificate link for it.
    /// Without an open session this is a no-op returning `Ok(None)`.
    pub fn end_session(&mut self, now: DateTime<Utc>) -> anyhow::Result<Option<String>> {
        if self.close_open_session(now).is_none() {
            return Ok(None);
        }
        self.persist(now);
        self.certificate_link(now).map(Some)
    }

    /// First half of a reset. In Verification mode the attempt itself is
    /// recorded before anyone answers the prompt.
    pub fn request_reset(&mut self, now: DateTime<Utc>) -> ConfirmPrompt {
        if self.mode == TrackingMode::Verification {
            self.log_suspicious(SuspiciousKind::ResetAttemptInVerification, json!({}), now);
            self.persist(now);
        }
        ConfirmPrompt::reset(self.mode)
    }

    /// Second half of a reset, after confirmation. Session history survives;
    /// in Verification mode so does the suspicious-activity log.
    pub fn apply_reset(&mut self, now: DateTime<Utc>) {
        self.close_open_session(now);

        let history = std::mem::take(&mut self.data.session_history);
        let audit = if self.mode == TrackingMode::Verification {
            std::mem::take(&mut self.data.suspicious_activities)
        } else {
            Vec::new()
        };

        self.data = self.empty_data(now);
        self.data.session_history = history;
        self.data.suspicious_activities = audit;
        self.engagement.reset_focus(now);

        info!("Reset {} mode statistics", self.mode);
        self.persist(now);
        self.observer.on_reset();
    }
}
