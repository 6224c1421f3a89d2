mod event;
mod modes;
mod student;
mod tracked;

pub use event::{Event, EventKind, SuspiciousActivity, SuspiciousKind};
pub use modes::{ModeFlags, TrackingMode};
pub use student::StudentInfo;
pub use tracked::{
    json_number, serialize_values, AppMeta, FieldValue, Session, TrackedData, SCHEMA_VERSION,
};
