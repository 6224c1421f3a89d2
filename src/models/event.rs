use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    PageLoad,
    ClassroomModeEnabled,
    ClassroomModeDisabled,
    VerificationModeEnabled,
    VerificationModeDisabled,
    NormalModeEnabled,
    SessionStarted,
    SessionEnded,
    FocusLost,
    FocusRestored,
    VisibilityChange,
    WindowResize,
    FullscreenExit,
    ExitAttempt,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PageLoad => "page_load",
            EventKind::ClassroomModeEnabled => "classroom_mode_enabled",
            EventKind::ClassroomModeDisabled => "classroom_mode_disabled",
            EventKind::VerificationModeEnabled => "verification_mode_enabled",
            EventKind::VerificationModeDisabled => "verification_mode_disabled",
            EventKind::NormalModeEnabled => "normal_mode_enabled",
            EventKind::SessionStarted => "session_started",
            EventKind::SessionEnded => "session_ended",
            EventKind::FocusLost => "focus_lost",
            EventKind::FocusRestored => "focus_restored",
            EventKind::VisibilityChange => "visibility_change",
            EventKind::WindowResize => "window_resize",
            EventKind::FullscreenExit => "fullscreen_exit",
            EventKind::ExitAttempt => "exit_attempt",
        }
    }
}

/// Diagnostic log entry. The type is kept as a string so records written by
/// older trackers with event types we no longer emit still load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind, data: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            data,
            timestamp,
        }
    }

    pub fn is(&self, kind: EventKind) -> bool {
        self.kind == kind.as_str()
    }
}

/// Policy violations recorded while in Verification mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspiciousKind {
    FocusLost,
    TabHidden,
    SuspiciousResize,
    FullscreenExit,
    CopyAttempt,
    PasteAttempt,
    DevtoolsOpen,
    ResetAttemptInVerification,
}

impl SuspiciousKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuspiciousKind::FocusLost => "focus_lost",
            SuspiciousKind::TabHidden => "tab_hidden",
            SuspiciousKind::SuspiciousResize => "suspicious_resize",
            SuspiciousKind::FullscreenExit => "fullscreen_exit",
            SuspiciousKind::CopyAttempt => "copy_attempt",
            SuspiciousKind::PasteAttempt => "paste_attempt",
            SuspiciousKind::DevtoolsOpen => "devtools_open",
            SuspiciousKind::ResetAttemptInVerification => "reset_attempt_in_verification",
        }
    }

    /// Text shown to the student in the transient warning.
    pub fn message(&self) -> &'static str {
        match self {
            SuspiciousKind::FocusLost => "Window left",
            SuspiciousKind::TabHidden => "Tab hidden",
            SuspiciousKind::SuspiciousResize => "Window resized",
            SuspiciousKind::FullscreenExit => "Left fullscreen",
            SuspiciousKind::CopyAttempt => "Copy attempt",
            SuspiciousKind::PasteAttempt => "Paste attempt",
            SuspiciousKind::DevtoolsOpen => "Developer tools opened",
            SuspiciousKind::ResetAttemptInVerification => "Reset during verification",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuspiciousActivity {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub details: Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl SuspiciousActivity {
    pub fn new(kind: SuspiciousKind, details: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            details,
            timestamp,
        }
    }

    pub fn is(&self, kind: SuspiciousKind) -> bool {
        self.kind == kind.as_str()
    }
}
