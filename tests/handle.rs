use std::{sync::Arc, time::Duration};

use certtrack_lib::{
    config::{FieldSpec, TrackerConfig},
    confirm::{ChannelConfirmer, StaticConfirmer},
    db::MemoryStore,
    models::{FieldValue, SuspiciousKind, TrackingMode},
    registry::TrackerRegistry,
    sensing::SharedWindowMetrics,
    timer::{
        commands::{dispatch, HostCommand},
        TrackerHandle, WindowDimensions,
    },
    tracker::{SessionStore, TransitionOutcome},
};

fn config(name: &str, path: &str) -> TrackerConfig {
    TrackerConfig {
        app_name: name.into(),
        app_path: path.into(),
        ..TrackerConfig::default()
    }
}

fn handle_with(confirm: bool) -> TrackerHandle {
    let store = SessionStore::new(
        config("Frazioni", "/application/matematica/frazioni.html"),
        Arc::new(MemoryStore::new()),
    );
    TrackerHandle::new(store, Arc::new(StaticConfirmer(confirm)))
        .with_tick_interval(Duration::from_millis(20))
}

#[tokio::test]
async fn ticker_accumulates_and_stops() {
    let handle = handle_with(true);
    handle.start().await.unwrap();
    assert!(handle.is_ticking().await);
    handle.start_ticker().await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.stop_ticker().await;
    let counted = handle.status().await.elapsed_secs;
    assert!(counted >= 2, "counted {counted} ticks");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.status().await.elapsed_secs, counted);
    assert!(!handle.is_ticking().await);
}

#[tokio::test]
async fn declined_switch_keeps_current_session() {
    let handle = handle_with(false);
    handle.start().await.unwrap();

    let outcome = handle.set_mode(TrackingMode::Classroom).await.unwrap();
    assert!(outcome.is_applied());
    let session = handle.status().await.session_id;

    let outcome = handle.set_mode(TrackingMode::Verification).await.unwrap();
    assert_eq!(outcome, TransitionOutcome::Declined);
    assert_eq!(handle.mode().await, TrackingMode::Classroom);
    assert_eq!(handle.status().await.session_id, session);

    assert!(!handle.reset().await);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn confirmation_arrives_through_the_channel() {
    let (confirmer, mut pending) = ChannelConfirmer::new();
    let store = SessionStore::new(
        TrackerConfig {
            fields: vec![FieldSpec::number("score", "Score")],
            ..config("Quiz", "/application/storia/quiz.html")
        },
        Arc::new(MemoryStore::new()),
    );
    let handle = TrackerHandle::new(store, Arc::new(confirmer));
    handle.start().await.unwrap();
    handle.set_mode(TrackingMode::Verification).await.unwrap();
    assert_eq!(handle.increment_field("score", 5.0).await, Some(5.0));
    assert_eq!(handle.increment_field("t", 5.0).await, None);

    let resetting = tokio::spawn({
        let handle = handle.clone();
        async move { handle.reset().await }
    });

    let request = pending.recv().await.unwrap();
    assert!(request.prompt.message.contains("suspicious"));
    request.answer(true);
    assert!(resetting.await.unwrap());

    let data = handle.snapshot().await;
    assert_eq!(data.value("score"), 0.0);
    assert!(data
        .suspicious_activities
        .iter()
        .any(|a| a.is(SuspiciousKind::ResetAttemptInVerification)));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn devtools_poll_runs_only_in_verification() {
    let metrics = Arc::new(SharedWindowMetrics::new());
    metrics.set(WindowDimensions {
        outer_width: 1280,
        outer_height: 900,
        inner_width: 1280,
        inner_height: 500,
    });

    let handle = handle_with(true).with_window_metrics(metrics.clone());
    handle.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(handle.snapshot().await.suspicious_activities.is_empty());

    handle.set_mode(TrackingMode::Verification).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let data = handle.snapshot().await;
    let opened = data
        .suspicious_activities
        .iter()
        .filter(|a| a.is(SuspiciousKind::DevtoolsOpen))
        .count();
    assert_eq!(opened, 1);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn registry_shuts_every_tracker_down() {
    let mut registry = TrackerRegistry::new();
    let first = handle_with(true);
    let second = handle_with(true);
    first.start().await.unwrap();
    second.start().await.unwrap();

    registry.register("frazioni", first.clone()).unwrap();
    assert!(registry.register("frazioni", second.clone()).is_err());
    registry.register("frazioni-bis", second.clone()).unwrap();
    assert_eq!(registry.ids(), vec!["frazioni", "frazioni-bis"]);

    registry.shutdown_all().await;
    assert!(registry.is_empty());
    assert!(!first.is_ticking().await);
    assert!(!second.is_ticking().await);
}

#[tokio::test]
async fn set_command_reads_input_as_the_declared_kind() {
    let store = SessionStore::new(
        TrackerConfig {
            fields: vec![
                FieldSpec::number("ex", "Exercises"),
                FieldSpec::text("notes", "Notes"),
            ],
            ..config("Frazioni", "/application/matematica/frazioni.html")
        },
        Arc::new(MemoryStore::new()),
    );
    let handle = TrackerHandle::new(store, Arc::new(StaticConfirmer(true)));
    handle.start().await.unwrap();

    let command: HostCommand = "set notes 42".parse().unwrap();
    let reply = dispatch(&handle, command).await.unwrap();
    assert_eq!(reply["accepted"], true);
    assert_eq!(handle.field("notes").await, Some(FieldValue::Text("42".into())));

    let reply = dispatch(&handle, "set ex 3".parse().unwrap()).await.unwrap();
    assert_eq!(reply["accepted"], true);
    assert_eq!(handle.field("ex").await, Some(FieldValue::Number(3.0)));

    let reply = dispatch(&handle, "set ex tre".parse().unwrap()).await.unwrap();
    assert_eq!(reply["accepted"], false);
    let reply = dispatch(&handle, "set t 0".parse().unwrap()).await.unwrap();
    assert_eq!(reply["accepted"], false);
    handle.shutdown().await.unwrap();
}
