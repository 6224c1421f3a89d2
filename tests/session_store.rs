use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use certtrack_lib::{
    certificate::decode_link,
    config::{FieldSpec, TrackerConfig},
    db::{KeyValueStore, MemoryStore},
    models::{EventKind, FieldValue, ModeFlags, TrackingMode},
    namespace::resolve_namespace,
    tracker::SessionStore,
};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_750_000_000 + secs, 0).unwrap()
}

fn quiz_config() -> TrackerConfig {
    TrackerConfig {
        app_name: "Quiz".into(),
        app_path: "/application/storia/quiz.html".into(),
        fields: vec![
            FieldSpec::number("score", "Score"),
            FieldSpec::text("answer", "Answer"),
        ],
        track_focus: true,
        ..TrackerConfig::default()
    }
}

fn open_store(storage: &Arc<MemoryStore>) -> SessionStore {
    let mut store = SessionStore::new(quiz_config(), storage.clone());
    store.resume(at(0));
    store
}

fn mode_flags(storage: &MemoryStore) -> ModeFlags {
    let raw = storage
        .get("storia_quiz_cert_data_modes")
        .unwrap()
        .expect("mode flags persisted");
    serde_json::from_str(&raw).unwrap()
}

#[test]
fn elapsed_time_counts_one_per_engaged_tick() {
    let storage = Arc::new(MemoryStore::new());
    let mut store = open_store(&storage);

    let mut last = store.elapsed_secs();
    for second in 1..=10 {
        if second == 4 {
            store.focus_lost(at(second));
        }
        if second == 7 {
            store.focus_gained(at(second));
        }

        let engaged = !(4..7).contains(&second);
        let counted = store.tick(at(second));
        assert_eq!(counted.is_some(), engaged, "tick at {second}s");

        let now = store.elapsed_secs();
        assert_eq!(now, last + u64::from(engaged));
        last = now;
    }
    assert_eq!(last, 7);
}

#[test]
fn at_most_one_bounded_mode_flag_is_ever_set() {
    let storage = Arc::new(MemoryStore::new());
    let mut store = open_store(&storage);

    let steps: [(TrackingMode, bool); 5] = [
        (TrackingMode::Classroom, false),
        (TrackingMode::Verification, true),
        (TrackingMode::Classroom, true),
        (TrackingMode::Normal, false),
        (TrackingMode::Verification, false),
    ];

    for (index, (target, confirmed)) in steps.into_iter().enumerate() {
        let now = at(index as i64 * 10 + 1);
        assert!(store.set_mode(target, confirmed, now).is_applied());

        let flags = mode_flags(&storage);
        assert!(!(flags.classroom_mode && flags.verification_mode));
        assert_eq!(flags.mode(), target);

        let open = store
            .data()
            .session
            .iter()
            .chain(store.data().session_history.iter())
            .filter(|session| session.is_open())
            .count();
        assert!(open <= 1);
    }
}

#[test]
fn switching_bounded_modes_closes_the_previous_session() {
    let storage = Arc::new(MemoryStore::new());
    let mut store = open_store(&storage);
    store.enter_classroom(false, at(1));
    store.enter_verification(true, at(30));

    let raw = storage
        .get("storia_quiz_cert_data_classroom")
        .unwrap()
        .unwrap();
    let classroom: certtrack_lib::TrackedData = serde_json::from_str(&raw).unwrap();
    let closed = classroom.session_history.last().unwrap();
    assert_eq!(closed.end_time, Some(at(30)));
    assert_eq!(closed.mode, TrackingMode::Classroom);
}

#[test]
fn namespace_examples() {
    assert_eq!(
        resolve_namespace("/application/matematica/frazioni.html", None, "App"),
        "matematica_frazioni"
    );
    assert_eq!(resolve_namespace("/", None, "Quiz"), "quiz");
    assert_eq!(
        resolve_namespace("/application/matematica/frazioni.html", None, "App"),
        resolve_namespace("/application/matematica/frazioni.html", None, "App")
    );
}

#[test]
fn certificate_link_preserves_values_and_text_fields() {
    let storage = Arc::new(MemoryStore::new());
    let mut store = open_store(&storage);
    store.increment_field("score", 8.5, at(1));
    store.set_field("answer", FieldValue::Text("Cesare, 44 a.C.".into()), at(2));
    store.tick(at(3));

    let link = store.certificate_link(at(4)).unwrap();
    assert!(link.starts_with("https://certificationsystem.netlify.app/?cert="));

    let cert = decode_link(&link).unwrap();
    assert_eq!(cert.values, store.data().values);
    assert_eq!(cert.text_fields, store.data().text_fields);
}

#[test]
fn double_reset_leaves_defaults() {
    let storage = Arc::new(MemoryStore::new());
    let mut store = open_store(&storage);
    store.increment_field("score", 3.0, at(1));
    store.focus_lost(at(2));
    store.focus_gained(at(4));

    store.apply_reset(at(5));
    let first = store.data().values.clone();
    store.apply_reset(at(5));

    assert_eq!(store.data().values, first);
    assert!(first.values().all(|value| *value == 0.0));
    assert_eq!(store.data().text_fields["answer"], "");
}

#[test]
fn ending_without_open_session_returns_no_link() {
    let storage = Arc::new(MemoryStore::new());
    let mut store = open_store(&storage);
    assert_eq!(store.end_session(at(1)).unwrap(), None);

    store.enter_classroom(false, at(2));
    assert!(store.end_session(at(3)).unwrap().is_some());
    assert_eq!(store.end_session(at(4)).unwrap(), None);
}

#[test]
fn blur_then_focus_after_five_seconds() {
    let storage = Arc::new(MemoryStore::new());
    let mut store = open_store(&storage);

    store.focus_lost(at(0));
    store.focus_gained(at(5));

    let data = store.data();
    assert_eq!(data.value("fl"), 1.0);
    assert_eq!(data.value("flt"), 5.0);
    assert_eq!(data.events.iter().filter(|e| e.is(EventKind::FocusLost)).count(), 1);
    assert_eq!(
        data.events
            .iter()
            .filter(|e| e.is(EventKind::FocusRestored))
            .count(),
        1
    );
}

#[test]
fn verification_time_ignores_focus() {
    let storage = Arc::new(MemoryStore::new());
    let mut store = open_store(&storage);
    store.enter_verification(false, at(0));
    store.focus_lost(at(0));

    for second in 1..=5 {
        assert!(store.tick(at(second)).is_some());
    }
    assert_eq!(store.elapsed_secs(), 5);
    assert_eq!(store.data().suspicious_activities.len(), 1);
}

#[test]
fn reload_lands_back_in_the_same_session() {
    let storage = Arc::new(MemoryStore::new());
    let mut first = open_store(&storage);
    first.enter_verification(false, at(1));
    first.tick(at(2));
    first.on_unload(at(3));
    let id = first.data().open_session().unwrap().id.clone();
    drop(first);

    let mut second = SessionStore::new(quiz_config(), storage.clone());
    let report = second.resume(at(3) + Duration::seconds(5));
    assert_eq!(report.mode, TrackingMode::Verification);
    assert!(report.session_resumed);
    assert_eq!(second.data().open_session().unwrap().id, id);
    assert_eq!(second.elapsed_secs(), 1);
    assert!(second
        .data()
        .events
        .iter()
        .any(|e| e.is(EventKind::ExitAttempt)));
}
