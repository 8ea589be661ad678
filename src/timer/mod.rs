pub mod controller;
pub mod events;
pub mod state;
pub mod tracker;

pub use controller::TimerController;
pub use events::{FinalizeReason, HostEvent, TrackerEvent};
pub use state::{TimerState, TimerStatus};
pub use tracker::{TimerSnapshot, Tracker, TrackerError};
