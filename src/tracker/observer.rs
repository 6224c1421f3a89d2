use crate::models::{FieldValue, Session, SuspiciousActivity, TrackingMode};

/// Callbacks a host registers to mirror tracker state (render a panel,
/// flash a warning, and so on). Every method defaults to a no-op.
///
/// Callbacks run synchronously inside the mutation that triggered them and
/// must not call back into the tracker.
pub trait TrackerObserver: Send + Sync {
    fn on_timer_tick(&self, _elapsed_secs: u64) {}

    fn on_field_update(&self, _key: &str, _value: &FieldValue) {}

    fn on_reset(&self) {}

    fn on_session_start(&self, _session: &Session) {}

    fn on_session_end(&self, _session: &Session) {}

    fn on_mode_change(&self, _from: TrackingMode, _to: TrackingMode) {}

    fn on_focus_lost(&self, _count: u64) {}

    fn on_focus_restored(&self, _lost_secs: u64) {}

    fn on_suspicious_activity(&self, _activity: &SuspiciousActivity) {}

    /// Transient, user-facing warning (Verification mode).
    fn on_warning(&self, _message: &str) {}

    /// Reported once, when persistence fails and the tracker drops to
    /// memory-only operation.
    fn on_storage_error(&self, _error: &anyhow::Error) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TrackerObserver for NoopObserver {}
