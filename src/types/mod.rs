//! Shared types for the pomodoro server

pub mod error;

pub use error::{PomodoroError, Result};
