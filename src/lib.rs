//! Pomodoro server - task tracking with points, streaks and deadline pushes
//!
//! Tasks are owned by users and completed through the gamification ledger,
//! which awards points, levels and daily streaks. Connected clients hold a
//! push socket; a periodic sweep warns them about tasks due in the next
//! few minutes.

pub mod auth;
pub mod config;
pub mod db;
pub mod gamification;
pub mod notifier;
pub mod routes;
pub mod server;
pub mod store;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{PomodoroError, Result};
