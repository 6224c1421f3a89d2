use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::tracker::SessionStore;

use super::{loop_worker::devtools_loop, WindowMetrics};

#[derive(Default)]
pub struct DevtoolsMonitor {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl DevtoolsMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(
        &mut self,
        store: Arc<Mutex<SessionStore>>,
        metrics: Arc<dyn WindowMetrics>,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("devtools monitor already active");
        }

        info!("Starting devtools monitor");
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(devtools_loop(store, metrics, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("devtools monitor task failed to join")
        } else {
            Ok(())
        }
    }
}
