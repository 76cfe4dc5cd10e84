//! Deadline notifier
//!
//! Connected sockets register in the [`ConnectionRegistry`]; the
//! [`DeadlineNotifier`] sweeps their pending tasks on a timer and pushes
//! [`PushEvent::TaskEndingSoon`] through the registered handle.

pub mod events;
pub mod registry;
pub mod sweep;

pub use events::{ClientMessage, PushEvent};
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use sweep::{minute_of_day, DeadlineNotifier, SweepReport};
