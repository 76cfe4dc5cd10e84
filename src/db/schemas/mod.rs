//! Database schemas
//!
//! MongoDB document structures for users, pomodoro tasks and point ledgers,
//! plus the JSON views returned by the API.

mod ledger;
mod metadata;
mod task;
mod user;

pub use ledger::{LedgerDoc, LedgerView, LEDGER_COLLECTION};
pub use metadata::Metadata;
pub use task::{Priority, TaskDoc, TaskPatch, TaskView, TASK_COLLECTION};
pub use user::{AuthMethod, UserDoc, UserView, USER_COLLECTION};
