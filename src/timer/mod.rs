pub mod commands;
pub mod controller;
pub mod state;

pub use controller::TrackerHandle;
pub use state::{EngagementState, WindowDimensions, WindowSize, DEVTOOLS_GAP_PX};
