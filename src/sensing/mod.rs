//! Window-geometry sampling for the Verification devtools heuristic.

pub mod controller;
mod loop_worker;

use std::sync::Mutex;

pub use controller::DevtoolsMonitor;

use crate::timer::WindowDimensions;

/// Source of the current outer/inner window dimensions.
pub trait WindowMetrics: Send + Sync {
    /// `None` when the host cannot measure right now.
    fn dimensions(&self) -> Option<WindowDimensions>;
}

/// Metrics pushed by the host whenever it learns new dimensions.
#[derive(Debug, Default)]
pub struct SharedWindowMetrics {
    latest: Mutex<Option<WindowDimensions>>,
}

impl SharedWindowMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, dimensions: WindowDimensions) {
        if let Ok(mut guard) = self.latest.lock() {
            *guard = Some(dimensions);
        }
    }
}

impl WindowMetrics for SharedWindowMetrics {
    fn dimensions(&self) -> Option<WindowDimensions> {
        self.latest.lock().ok().and_then(|guard| *guard)
    }
}
