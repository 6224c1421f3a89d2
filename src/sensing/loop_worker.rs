use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};
use tokio::{
    sync::Mutex,
    time::{Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::tracker::SessionStore;

use super::WindowMetrics;

const POLL_INTERVAL_MS: u64 = 500;

pub async fn devtools_loop(
    store: Arc<Mutex<SessionStore>>,
    metrics: Arc<dyn WindowMetrics>,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(POLL_INTERVAL_MS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(dimensions) = metrics.dimensions() {
                    if store.lock().await.observe_window_dimensions(dimensions, Utc::now()) {
                        warn!(
                            "Developer tools likely open (outer {}x{}, inner {}x{})",
                            dimensions.outer_width,
                            dimensions.outer_height,
                            dimensions.inner_width,
                            dimensions.inner_height
                        );
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                debug!("devtools monitor shutting down");
                break;
            }
        }
    }
}
