use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::TrackingMode;

/// Gap between outer and inner window size past which docked developer
/// tools are assumed open.
pub const DEVTOOLS_GAP_PX: i64 = 160;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

impl WindowSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Sum of absolute width and height deltas.
    pub fn distance(&self, other: &WindowSize) -> u32 {
        self.width
            .abs_diff(other.width)
            .saturating_add(self.height.abs_diff(other.height))
    }
}

/// Outer (browser chrome) and inner (viewport) dimensions sampled by the
/// devtools poll.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WindowDimensions {
    pub outer_width: u32,
    pub outer_height: u32,
    pub inner_width: u32,
    pub inner_height: u32,
}

impl WindowDimensions {
    pub fn devtools_likely_open(&self) -> bool {
        i64::from(self.outer_height) - i64::from(self.inner_height) > DEVTOOLS_GAP_PX
            || i64::from(self.outer_width) - i64::from(self.inner_width) > DEVTOOLS_GAP_PX
    }

    pub fn inner(&self) -> WindowSize {
        WindowSize::new(self.inner_width, self.inner_height)
    }
}

/// Volatile, in-memory engagement signals. None of this is persisted: a
/// reload starts focused with fresh activity.
#[derive(Debug, Clone, PartialEq)]
pub struct EngagementState {
    pub last_activity: DateTime<Utc>,
    pub focused: bool,
    pub focus_lost_at: Option<DateTime<Utc>>,
    pub window: Option<WindowSize>,
    pub fullscreen: bool,
    pub devtools_open: bool,
}

impl EngagementState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_activity: now,
            focused: true,
            focus_lost_at: None,
            window: None,
            fullscreen: false,
            devtools_open: false,
        }
    }

    /// Whether a one-second tick at `now` counts towards elapsed time.
    pub fn is_engaged(
        &self,
        mode: TrackingMode,
        inactivity_timeout: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        match mode {
            TrackingMode::Verification => true,
            TrackingMode::Classroom => self.focused,
            TrackingMode::Normal => self.focused && now - self.last_activity < inactivity_timeout,
        }
    }

    /// Clears focus bookkeeping when a fresh context starts.
    pub fn reset_focus(&mut self, now: DateTime<Utc>) {
        self.focused = true;
        self.focus_lost_at = None;
        self.last_activity = now;
    }

    /// Drops the Verification-only detectors' state.
    pub fn clear_heightened(&mut self) {
        self.fullscreen = false;
        self.devtools_open = false;
    }
}
