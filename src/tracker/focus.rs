//! Focus accounting and the Verification-only integrity signals.

use chrono::{DateTime, Utc};
use log::debug;
use serde_json::json;

use super::SessionStore;
use crate::{
    models::{EventKind, SuspiciousKind, TrackingMode},
    timer::{WindowDimensions, WindowSize},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardAction {
    Copy,
    Paste,
}

impl ClipboardAction {
    fn suspicious_kind(self) -> SuspiciousKind {
        match self {
            ClipboardAction::Copy => SuspiciousKind::CopyAttempt,
            ClipboardAction::Paste => SuspiciousKind::PasteAttempt,
        }
    }
}

impl SessionStore {
    fn verifying(&self) -> bool {
        self.mode == TrackingMode::Verification
    }

    /// Window blur. Counted once per focused-to-blurred transition.
    pub fn focus_lost(&mut self, now: DateTime<Utc>) -> bool {
        if !self.focus_tracking_enabled() || !self.engagement.focused {
            return false;
        }

        self.engagement.focused = false;
        self.engagement.focus_lost_at = Some(now);

        let count = {
            let lost = self.data.values.entry("fl".to_string()).or_insert(0.0);
            *lost += 1.0;
            lost.max(0.0) as u64
        };
        let elapsed = self.data.elapsed_secs();

        if self.verifying() {
            self.log_suspicious(SuspiciousKind::FocusLost, json!({ "count": count }), now);
        }
        self.log_event(
            EventKind::FocusLost,
            json!({ "count": count, "timeInSession": elapsed }),
            now,
        );
        self.persist(now);
        self.observer.on_focus_lost(count);
        true
    }

    /// Window focus. Adds the whole seconds spent away to `flt` and returns
    /// them.
    pub fn focus_gained(&mut self, now: DateTime<Utc>) -> Option<u64> {
        if !self.focus_tracking_enabled() {
            return None;
        }
        self.engagement.last_activity = now;
        if self.engagement.focused {
            return None;
        }
        self.engagement.focused = true;
        let lost_at = self.engagement.focus_lost_at.take()?;

        let lost_secs = (now - lost_at).num_seconds().max(0) as u64;
        let total = {
            let lost_time = self.data.values.entry("flt".to_string()).or_insert(0.0);
            *lost_time += lost_secs as f64;
            lost_time.max(0.0) as u64
        };
        let elapsed = self.data.elapsed_secs();

        self.log_event(
            EventKind::FocusRestored,
            json!({ "duration": lost_secs, "totalLostTime": total, "timeInSession": elapsed }),
            now,
        );
        self.persist(now);
        self.observer.on_focus_restored(lost_secs);
        Some(lost_secs)
    }

    /// Page visibility. Hidden and shown fold into blur and focus.
    pub fn visibility_changed(&mut self, hidden: bool, now: DateTime<Utc>) {
        if self.verifying() {
            self.log_event(EventKind::VisibilityChange, json!({ "hidden": hidden }), now);
            if hidden {
                self.log_suspicious(SuspiciousKind::TabHidden, json!({}), now);
            }
            self.persist(now);
        }

        if hidden {
            self.focus_lost(now);
        } else {
            self.focus_gained(now);
        }
    }

    /// Debounced window resize. Returns whether the change was large
    /// enough to be recorded as suspicious.
    pub fn window_resized(&mut self, size: WindowSize, now: DateTime<Utc>) -> bool {
        let previous = self.engagement.window.replace(size);
        if !self.verifying() {
            return false;
        }
        let Some(previous) = previous else {
            debug!("Recorded baseline window size {}x{}", size.width, size.height);
            return false;
        };

        let difference = previous.distance(&size);
        self.log_event(
            EventKind::WindowResize,
            json!({ "from": previous, "to": size, "difference": difference }),
            now,
        );

        let suspicious = difference > self.config.suspicious_resize_threshold_px;
        if suspicious {
            self.log_suspicious(
                SuspiciousKind::SuspiciousResize,
                json!({ "from": previous, "to": size, "difference": difference }),
                now,
            );
        }
        self.persist(now);
        suspicious
    }

    pub fn fullscreen_changed(&mut self, fullscreen: bool, now: DateTime<Utc>) {
        let was_fullscreen = std::mem::replace(&mut self.engagement.fullscreen, fullscreen);
        if !self.verifying() || !was_fullscreen || fullscreen {
            return;
        }

        self.log_event(EventKind::FullscreenExit, json!({}), now);
        self.log_suspicious(SuspiciousKind::FullscreenExit, json!({}), now);
        self.persist(now);
    }

    pub fn clipboard_used(&mut self, action: ClipboardAction, now: DateTime<Utc>) -> bool {
        if !self.verifying() {
            return false;
        }
        self.log_suspicious(action.suspicious_kind(), json!({}), now);
        self.persist(now);
        true
    }

    /// Feeds one devtools poll sample. Returns true only on the transition
    /// to "likely open".
    pub fn observe_window_dimensions(&mut self, dims: WindowDimensions, now: DateTime<Utc>) -> bool {
        if self.engagement.window.is_none() {
            self.engagement.window = Some(dims.inner());
        }
        if !self.verifying() || !dims.devtools_likely_open() {
            self.engagement.devtools_open = false;
            return false;
        }
        if self.engagement.devtools_open {
            return false;
        }

        self.engagement.devtools_open = true;
        self.log_suspicious(SuspiciousKind::DevtoolsOpen, json!({ "dimensions": dims }), now);
        self.persist(now);
        true
    }

    /// Page is going away. Records the exit in Verification mode and
    /// stamps the mode flags' close time.
    pub fn on_unload(&mut self, now: DateTime<Utc>) {
        if self.verifying() {
            self.log_event(EventKind::ExitAttempt, json!({}), now);
        }
        self.persist_modes(now);
        self.persist(now);
    }
}
