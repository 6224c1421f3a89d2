use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum TrackingMode {
    #[default]
    Normal,
    Classroom,
    Verification,
}

impl TrackingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingMode::Normal => "normal",
            TrackingMode::Classroom => "classroom",
            TrackingMode::Verification => "verification",
        }
    }

    /// Suffix appended to the base storage key for this mode's slot.
    pub fn slot_suffix(&self) -> &'static str {
        match self {
            TrackingMode::Normal => "",
            TrackingMode::Classroom => "_classroom",
            TrackingMode::Verification => "_verification",
        }
    }

    /// Classroom and Verification run bounded sessions.
    pub fn is_bounded(&self) -> bool {
        !matches!(self, TrackingMode::Normal)
    }
}

impl std::fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TrackingMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "normal" => Ok(TrackingMode::Normal),
            "classroom" => Ok(TrackingMode::Classroom),
            "verification" => Ok(TrackingMode::Verification),
            other => Err(anyhow::anyhow!("unknown tracking mode '{other}'")),
        }
    }
}

/// Mode flags persisted next to the data slots so a reload lands back in
/// the same mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModeFlags {
    #[serde(default)]
    pub classroom_mode: bool,
    #[serde(default)]
    pub verification_mode: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_closed: DateTime<Utc>,
}

impl ModeFlags {
    pub fn for_mode(mode: TrackingMode, now: DateTime<Utc>) -> Self {
        Self {
            classroom_mode: mode == TrackingMode::Classroom,
            verification_mode: mode == TrackingMode::Verification,
            last_closed: now,
        }
    }

    /// Verification wins if a hand-edited record has both flags set.
    pub fn mode(&self) -> TrackingMode {
        if self.verification_mode {
            TrackingMode::Verification
        } else if self.classroom_mode {
            TrackingMode::Classroom
        } else {
            TrackingMode::Normal
        }
    }
}
