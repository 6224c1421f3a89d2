use chrono::{DateTime, Utc};
use log::info;
use serde_json::json;

use super::SessionStore;
use crate::{
    confirm::ConfirmPrompt,
    models::{EventKind, Session, TrackingMode},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied { from: TrackingMode, to: TrackingMode },
    /// Already in the requested mode.
    Unchanged,
    /// Moving directly between Classroom and Verification discards the
    /// current session; the caller must ask and retry with `confirmed`.
    NeedsConfirmation(ConfirmPrompt),
    /// The user answered the prompt with "no".
    Declined,
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }
}

fn enabled_event(mode: TrackingMode) -> EventKind {
    match mode {
        TrackingMode::Classroom => EventKind::ClassroomModeEnabled,
        TrackingMode::Verification => EventKind::VerificationModeEnabled,
        TrackingMode::Normal => EventKind::NormalModeEnabled,
    }
}

fn disabled_event(mode: TrackingMode) -> Option<EventKind> {
    match mode {
        TrackingMode::Classroom => Some(EventKind::ClassroomModeDisabled),
        TrackingMode::Verification => Some(EventKind::VerificationModeDisabled),
        TrackingMode::Normal => None,
    }
}

impl SessionStore {
    pub fn enter_classroom(&mut self, confirmed: bool, now: DateTime<Utc>) -> TransitionOutcome {
        self.set_mode(TrackingMode::Classroom, confirmed, now)
    }

    pub fn enter_verification(&mut self, confirmed: bool, now: DateTime<Utc>) -> TransitionOutcome {
        self.set_mode(TrackingMode::Verification, confirmed, now)
    }

    pub fn enter_normal(&mut self, now: DateTime<Utc>) -> TransitionOutcome {
        self.set_mode(TrackingMode::Normal, true, now)
    }

    /// Moves to `target`. Leaving a bounded mode closes and archives its
    /// session in the old slot before the new slot is loaded, so slots never
    /// share data.
    pub fn set_mode(
        &mut self,
        target: TrackingMode,
        confirmed: bool,
        now: DateTime<Utc>,
    ) -> TransitionOutcome {
        let from = self.mode;
        if from == target {
            return TransitionOutcome::Unchanged;
        }
        if from.is_bounded() && target.is_bounded() && !confirmed {
            return TransitionOutcome::NeedsConfirmation(ConfirmPrompt::switch_mode(from, target));
        }

        if from.is_bounded() {
            self.leave_bounded_mode(now);
        }
        match target {
            TrackingMode::Normal => self.enter_normal_slot(now),
            bounded => self.enter_bounded_slot(bounded, now),
        }

        self.persist_modes(now);
        info!("Tracking mode {from} -> {target}");
        self.observer.on_mode_change(from, target);
        TransitionOutcome::Applied { from, to: target }
    }

    fn leave_bounded_mode(&mut self, now: DateTime<Utc>) {
        let mode = self.mode;
        let duration = self
            .data
            .open_session()
            .map(|session| session.duration_secs(now))
            .unwrap_or(0);

        self.close_open_session(now);
        if let Some(kind) = disabled_event(mode) {
            self.log_event(kind, json!({ "duration": duration }), now);
        }
        self.persist(now);
        self.engagement.clear_heightened();
    }

    fn enter_normal_slot(&mut self, now: DateTime<Utc>) {
        self.mode = TrackingMode::Normal;
        self.data = self.load_or_create(TrackingMode::Normal, now);
        self.ensure_declared_fields();
        self.engagement.reset_focus(now);
        self.log_event(EventKind::NormalModeEnabled, json!({}), now);
        self.persist(now);
    }

    /// Bounded modes always start from zeroed values with a new session.
    /// Only the target slot's session history carries over; a session left
    /// open there by an earlier page is closed first.
    fn enter_bounded_slot(&mut self, mode: TrackingMode, now: DateTime<Utc>) {
        self.mode = mode;

        let mut history = Vec::new();
        if let Some(mut previous) = self.load_slot(mode, now).data {
            if let Some(mut stale) = previous.session.take().filter(Session::is_open) {
                info!("Closing stale {mode} session {}", stale.id);
                stale.end_time = Some(now);
                previous.session_history.push(stale);
            }
            history = previous.session_history;
        }

        self.data = self.empty_data(now);
        self.data.session_history = history;
        self.engagement.reset_focus(now);

        let session = Session::open(mode, now);
        self.data.session = Some(session.clone());
        self.log_event(
            enabled_event(mode),
            json!({ "sessionId": session.id, "strict": session.strict }),
            now,
        );
        self.persist(now);
        self.observer.on_session_start(&session);
    }
}
