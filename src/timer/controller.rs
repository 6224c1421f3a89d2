use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

use crate::{
    confirm::{await_answer, Confirmer},
    models::{FieldValue, StudentInfo, TrackedData, TrackingMode},
    sensing::{DevtoolsMonitor, WindowMetrics},
    tracker::{ClipboardAction, ResumeReport, SessionStore, TrackerStatus, TransitionOutcome},
};

use super::{WindowDimensions, WindowSize};

/// Async front for one [`SessionStore`]: owns the one-second ticker, the
/// Verification devtools poll, and the confirmation round trips.
#[derive(Clone)]
pub struct TrackerHandle {
    store: Arc<Mutex<SessionStore>>,
    confirmer: Arc<dyn Confirmer>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    tick_interval: Duration,
    devtools: Arc<Mutex<DevtoolsMonitor>>,
    metrics: Option<Arc<dyn WindowMetrics>>,
}

impl TrackerHandle {
    pub fn new(store: SessionStore, confirmer: Arc<dyn Confirmer>) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            confirmer,
            ticker: Arc::new(Mutex::new(None)),
            tick_interval: Duration::from_secs(1),
            devtools: Arc::new(Mutex::new(DevtoolsMonitor::new())),
            metrics: None,
        }
    }

    pub fn with_window_metrics(mut self, metrics: Arc<dyn WindowMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    /// Resumes persisted state and starts the ticker.
    pub async fn start(&self) -> Result<ResumeReport> {
        let report = self.store.lock().await.resume(Utc::now());
        info!(
            "Tracker resumed in {} mode (session resumed: {})",
            report.mode, report.session_resumed
        );
        self.start_ticker().await;
        self.sync_devtools().await?;
        Ok(report)
    }

    /// Stops background work and records the page going away.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop_ticker().await;
        self.devtools.lock().await.stop().await?;
        self.store.lock().await.on_unload(Utc::now());
        Ok(())
    }

    /// Starting an already running ticker does nothing.
    pub async fn start_ticker(&self) {
        let mut ticker_guard = self.ticker.lock().await;
        if ticker_guard.is_some() {
            debug!("Ticker already running");
            return;
        }

        let store = self.store.clone();
        let tick_interval = self.tick_interval;

        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + tick_interval, tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                store.lock().await.tick(Utc::now());
            }
        });

        *ticker_guard = Some(handle);
    }

    pub async fn stop_ticker(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
    }

    pub async fn is_ticking(&self) -> bool {
        self.ticker.lock().await.is_some()
    }

    /// Switches mode, asking the confirmer first when leaving one bounded
    /// mode for the other.
    pub async fn set_mode(&self, target: TrackingMode) -> Result<TransitionOutcome> {
        let outcome = self.store.lock().await.set_mode(target, false, Utc::now());

        let outcome = match outcome {
            TransitionOutcome::NeedsConfirmation(prompt) => {
                let answer = self.confirmer.request(prompt);
                if await_answer(answer).await {
                    self.store.lock().await.set_mode(target, true, Utc::now())
                } else {
                    info!("Switch to {target} mode declined");
                    TransitionOutcome::Declined
                }
            }
            other => other,
        };

        self.sync_devtools().await?;
        Ok(outcome)
    }

    /// Two-phase reset. Returns whether the reset was applied.
    pub async fn reset(&self) -> bool {
        let prompt = self.store.lock().await.request_reset(Utc::now());
        let answer = self.confirmer.request(prompt);
        if !await_answer(answer).await {
            info!("Reset declined");
            return false;
        }
        self.store.lock().await.apply_reset(Utc::now());
        true
    }

    pub async fn start_session(&self) -> Option<String> {
        self.update(|store, now| store.start_session(now).map(|s| s.id))
            .await
    }

    pub async fn end_session(&self) -> Result<Option<String>> {
        self.update(|store, now| store.end_session(now)).await
    }

    pub async fn register_activity(&self) {
        self.update(|store, now| store.register_activity(now)).await
    }

    pub async fn focus_lost(&self) -> bool {
        self.update(|store, now| store.focus_lost(now)).await
    }

    pub async fn focus_gained(&self) -> Option<u64> {
        self.update(|store, now| store.focus_gained(now)).await
    }

    pub async fn visibility_changed(&self, hidden: bool) {
        self.update(|store, now| store.visibility_changed(hidden, now))
            .await
    }

    pub async fn window_resized(&self, size: WindowSize) -> bool {
        self.update(|store, now| store.window_resized(size, now)).await
    }

    pub async fn fullscreen_changed(&self, fullscreen: bool) {
        self.update(|store, now| store.fullscreen_changed(fullscreen, now))
            .await
    }

    pub async fn clipboard_used(&self, action: ClipboardAction) -> bool {
        self.update(|store, now| store.clipboard_used(action, now))
            .await
    }

    pub async fn observe_window_dimensions(&self, dims: WindowDimensions) -> bool {
        self.update(|store, now| store.observe_window_dimensions(dims, now))
            .await
    }

    pub async fn increment_field(&self, key: &str, amount: f64) -> Option<f64> {
        self.update(|store, now| store.increment_field(key, amount, now))
            .await
    }

    pub async fn set_field(&self, key: &str, value: FieldValue) -> bool {
        self.update(|store, now| store.set_field(key, value, now))
            .await
    }

    /// Sets a field from raw host text, read as the field's declared kind.
    pub async fn set_field_input(&self, key: &str, raw: &str) -> bool {
        self.update(|store, now| match store.parse_field_input(key, raw) {
            Some(value) => store.set_field(key, value, now),
            None => false,
        })
        .await
    }

    pub async fn save_student_info(&self, info: StudentInfo) -> bool {
        self.update(|store, now| store.save_student_info(info, now))
            .await
    }

    pub async fn certificate_link(&self) -> Result<String> {
        self.store.lock().await.certificate_link(Utc::now())
    }

    pub async fn field(&self, key: &str) -> Option<FieldValue> {
        self.store.lock().await.field(key)
    }

    pub async fn status(&self) -> TrackerStatus {
        self.store.lock().await.status()
    }

    pub async fn snapshot(&self) -> TrackedData {
        self.store.lock().await.snapshot()
    }

    pub async fn mode(&self) -> TrackingMode {
        self.store.lock().await.mode()
    }

    async fn update<T>(&self, apply: impl FnOnce(&mut SessionStore, DateTime<Utc>) -> T) -> T {
        let mut guard = self.store.lock().await;
        apply(&mut guard, Utc::now())
    }

    /// The devtools poll only runs in Verification mode and only when the
    /// host can report window dimensions.
    async fn sync_devtools(&self) -> Result<()> {
        let Some(metrics) = self.metrics.clone() else {
            return Ok(());
        };
        let verifying = self.mode().await == TrackingMode::Verification;

        let mut monitor = self.devtools.lock().await;
        match (verifying, monitor.is_active()) {
            (true, false) => monitor.start(self.store.clone(), metrics),
            (false, true) => monitor.stop().await.map_err(|err| {
                error!("Failed to stop devtools monitor: {err:#}");
                err
            }),
            _ => Ok(()),
        }
    }
}
