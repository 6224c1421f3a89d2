use chrono::{DateTime, Utc};
use log::{debug, warn};

use super::SessionStore;
use crate::models::FieldValue;

/// Elapsed time and focus-loss accumulators. Only the tracker changes them.
const TRACKER_OWNED_KEYS: [&str; 3] = ["t", "fl", "flt"];

fn is_tracker_owned(key: &str) -> bool {
    TRACKER_OWNED_KEYS.contains(&key)
}

impl SessionStore {
    /// Any user input. Only matters for Normal mode's inactivity cutoff.
    pub fn register_activity(&mut self, now: DateTime<Utc>) {
        self.engagement.last_activity = now;
    }

    /// One scheduler tick. Returns the new elapsed total when the tick
    /// counted.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<u64> {
        let timeout = self.config.inactivity_timeout();
        if !self.engagement.is_engaged(self.mode, timeout, now) {
            return None;
        }

        let elapsed = self.data.values.entry("t".to_string()).or_insert(0.0);
        *elapsed += 1.0;
        let total = elapsed.max(0.0) as u64;

        self.persist(now);
        self.observer.on_timer_tick(total);
        Some(total)
    }

    /// Adds `amount` to a numeric field. Keys that were never initialised
    /// and tracker-owned accumulators are ignored, as is any update whose
    /// result would not be finite.
    pub fn increment_field(&mut self, key: &str, amount: f64, now: DateTime<Utc>) -> Option<f64> {
        if is_tracker_owned(key) {
            debug!("Ignoring increment of tracker-owned field '{key}'");
            return None;
        }
        let Some(value) = self.data.values.get_mut(key) else {
            debug!("Ignoring increment of unknown field '{key}'");
            return None;
        };
        let updated = *value + amount;
        if !updated.is_finite() {
            warn!("Ignoring increment of '{key}' by {amount}: result is not finite");
            return None;
        }
        *value = updated;

        self.persist(now);
        self.observer
            .on_field_update(key, &FieldValue::Number(updated));
        Some(updated)
    }

    /// Replaces a field's value. Text goes to text fields, numbers to
    /// values; the kind must match the field's existing kind.
    pub fn set_field(&mut self, key: &str, value: FieldValue, now: DateTime<Utc>) -> bool {
        if is_tracker_owned(key) {
            debug!("Rejected update of tracker-owned field '{key}'");
            return false;
        }
        let accepted = match &value {
            FieldValue::Number(number) if number.is_finite() => {
                match self.data.values.get_mut(key) {
                    Some(slot) => {
                        *slot = *number;
                        true
                    }
                    None => false,
                }
            }
            FieldValue::Number(_) => false,
            FieldValue::Text(text) => match self.data.text_fields.get_mut(key) {
                Some(slot) => {
                    slot.clone_from(text);
                    true
                }
                None => false,
            },
        };

        if !accepted {
            debug!("Rejected update of field '{key}' to {value}");
            return false;
        }

        self.persist(now);
        self.observer.on_field_update(key, &value);
        true
    }

    /// Reads raw host input as the kind the field was declared with.
    /// Undeclared keys yield `None`.
    pub fn parse_field_input(&self, key: &str, raw: &str) -> Option<FieldValue> {
        let spec = self.config.field(key)?;
        if spec.is_text() {
            Some(FieldValue::Text(raw.to_string()))
        } else {
            raw.trim().parse().ok().map(FieldValue::Number)
        }
    }

    pub fn field(&self, key: &str) -> Option<FieldValue> {
        if let Some(number) = self.data.values.get(key) {
            return Some(FieldValue::Number(*number));
        }
        self.data
            .text_fields
            .get(key)
            .map(|text| FieldValue::Text(text.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::super::test_support::*;
    use super::*;
    use crate::{config::TrackerConfig, db::MemoryStore, tracker::ClipboardAction};

    #[test]
    fn normal_mode_stops_counting_after_inactivity() {
        let storage = Arc::new(MemoryStore::new());
        let mut store = resumed(config(), storage);

        assert_eq!(store.tick(at(1)), Some(1));
        assert_eq!(store.tick(at(119)), Some(2));
        assert_eq!(store.tick(at(120)), None);

        store.register_activity(at(121));
        assert_eq!(store.tick(at(122)), Some(3));
    }

    #[test]
    fn unfocused_classroom_does_not_count() {
        let storage = Arc::new(MemoryStore::new());
        let mut store = resumed(config(), storage);
        store.enter_classroom(false, at(0));

        store.focus_lost(at(1));
        assert_eq!(store.tick(at(2)), None);
        store.focus_gained(at(3));
        assert_eq!(store.tick(at(4)), Some(1));
        assert_eq!(store.tick(at(0) + Duration::hours(2)), Some(2));
    }

    #[test]
    fn verification_counts_while_blurred() {
        let storage = Arc::new(MemoryStore::new());
        let mut store = resumed(config(), storage);
        store.enter_verification(false, at(0));

        store.focus_lost(at(1));
        for second in 2..5 {
            store.tick(at(second));
        }
        assert_eq!(store.elapsed_secs(), 3);
    }

    #[test]
    fn field_updates_respect_kinds() {
        let storage = Arc::new(MemoryStore::new());
        let mut store = resumed(config(), storage);

        assert_eq!(store.increment_field("ex", 2.0, at(1)), Some(2.0));
        assert_eq!(store.increment_field("missing", 1.0, at(1)), None);
        assert_eq!(store.increment_field("ex", f64::NAN, at(1)), None);

        assert!(store.set_field("notes", FieldValue::Text("ok".into()), at(2)));
        assert!(!store.set_field("notes", FieldValue::Number(1.0), at(2)));
        assert!(!store.set_field("ex", FieldValue::Text("x".into()), at(2)));
        assert!(!store.set_field("ex", FieldValue::Number(f64::INFINITY), at(2)));
        assert!(store.set_field("ex", FieldValue::Number(7.0), at(2)));

        assert_eq!(store.field("ex"), Some(FieldValue::Number(7.0)));
        assert_eq!(store.field("notes"), Some(FieldValue::Text("ok".into())));
        assert_eq!(store.field("missing"), None);
    }

    #[test]
    fn tracker_owned_accumulators_reject_field_updates() {
        let storage = Arc::new(MemoryStore::new());
        let mut store = resumed(TrackerConfig { track_focus: true, ..config() }, storage);
        store.tick(at(1));
        store.tick(at(2));

        assert_eq!(store.increment_field("t", -1.0, at(3)), None);
        assert_eq!(store.increment_field("t", 10.0, at(3)), None);
        assert!(!store.set_field("t", FieldValue::Number(-10.0), at(3)));
        assert_eq!(store.increment_field("fl", -1.0, at(3)), None);
        assert!(!store.set_field("flt", FieldValue::Number(0.0), at(3)));

        assert_eq!(store.data().value("t"), 2.0);
        assert_eq!(store.elapsed_secs(), 2);
        assert_eq!(store.data().value("fl"), 0.0);
    }

    #[test]
    fn overflowing_increment_keeps_the_slot_loadable() {
        let storage = Arc::new(MemoryStore::new());
        let mut store = resumed(config(), storage.clone());
        store.enter_verification(false, at(0));
        store.tick(at(1));
        store.clipboard_used(ClipboardAction::Copy, at(2));

        assert_eq!(store.increment_field("ex", 1e308, at(3)), Some(1e308));
        assert_eq!(store.increment_field("ex", 1e308, at(4)), None);
        assert_eq!(store.data().value("ex"), 1e308);

        let mut reloaded = SessionStore::new(config(), storage);
        let report = reloaded.resume(at(5));
        assert!(!report.discarded_corrupt);
        assert!(report.session_resumed);
        assert_eq!(reloaded.data().value("ex"), 1e308);
        assert_eq!(reloaded.data().suspicious_activities.len(), 1);
        assert!(reloaded.certificate_link(at(6)).is_ok());
    }

    #[test]
    fn host_input_follows_declared_field_type() {
        let storage = Arc::new(MemoryStore::new());
        let store = resumed(config(), storage);

        assert_eq!(
            store.parse_field_input("notes", "42"),
            Some(FieldValue::Text("42".into()))
        );
        assert_eq!(
            store.parse_field_input("ex", " 4.5"),
            Some(FieldValue::Number(4.5))
        );
        assert_eq!(store.parse_field_input("ex", "tante"), None);
        assert_eq!(store.parse_field_input("missing", "1"), None);
    }

    #[test]
    fn tick_and_field_callbacks_reach_observer() {
        let storage = Arc::new(MemoryStore::new());
        let recorder = Arc::new(Recorder::default());
        let mut store = SessionStore::new(config(), storage).with_observer(recorder.clone());
        store.resume(at(0));

        store.tick(at(1));
        store.increment_field("ex", 1.0, at(1));
        assert_eq!(
            recorder.calls(),
            vec!["tick:1".to_string(), "field:ex=1".to_string()]
        );
    }
}
