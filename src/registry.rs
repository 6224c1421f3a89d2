//! Several trackers can share one storage origin; each keeps its own
//! namespace. The registry owns their handles by id.

use std::collections::HashMap;

use anyhow::{bail, Result};
use log::{error, info};

use crate::timer::TrackerHandle;

#[derive(Default)]
pub struct TrackerRegistry {
    trackers: HashMap<String, TrackerHandle>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, handle: TrackerHandle) -> Result<()> {
        let id = id.into();
        if self.trackers.contains_key(&id) {
            bail!("tracker '{id}' already registered");
        }
        info!("Registered tracker '{id}'");
        self.trackers.insert(id, handle);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&TrackerHandle> {
        self.trackers.get(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<TrackerHandle> {
        self.trackers.remove(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.trackers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    /// Shuts every tracker down; failures are logged and do not stop the
    /// rest.
    pub async fn shutdown_all(&mut self) {
        for (id, handle) in self.trackers.drain() {
            if let Err(err) = handle.shutdown().await {
                error!("Failed to shut down tracker '{id}': {err:#}");
            }
        }
    }
}
