//! Persistence seams
//!
//! Handlers, the ledger service and the notifier only talk to these traits.
//! [`MongoStore`] backs production; [`MemoryStore`] backs dev mode without a
//! database and the test suite.

pub mod memory;
pub mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

use async_trait::async_trait;
use bson::{oid::ObjectId, DateTime};

use crate::db::schemas::{LedgerDoc, TaskDoc, TaskPatch, UserDoc};
use crate::types::Result;

/// Result of a get-or-create lookup
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerLookup {
    Existing(LedgerDoc),
    Created(LedgerDoc),
}

impl LedgerLookup {
    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    pub fn ledger(&self) -> &LedgerDoc {
        match self {
            Self::Existing(ledger) | Self::Created(ledger) => ledger,
        }
    }

    pub fn into_inner(self) -> LedgerDoc {
        match self {
            Self::Existing(ledger) | Self::Created(ledger) => ledger,
        }
    }
}

/// Task and ledger writes for one completion, committed together.
///
/// `expected_last_streak_update` and `expected_points` guard the ledger
/// write: if another completion moved the ledger in between, the commit
/// fails with `Conflict` and nothing is written. Points grow on every
/// completion, so two completions stamped with the same instant still
/// conflict.
#[derive(Debug, Clone)]
pub struct CompletionCommit {
    pub user_id: ObjectId,
    pub task_id: ObjectId,
    pub expected_last_streak_update: DateTime,
    pub expected_points: i64,
    pub points: i64,
    pub level: i64,
    pub streak: i64,
    pub last_streak_update: DateTime,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user; `Conflict` when the email (or phone) is taken
    async fn insert_user(&self, user: UserDoc) -> Result<UserDoc>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserDoc>>;

    async fn find_user(&self, user_id: &ObjectId) -> Result<Option<UserDoc>>;

    async fn record_login(&self, user_id: &ObjectId, at: DateTime) -> Result<()>;

    /// All users, highest `totalPoints` first
    async fn list_users_by_points(&self) -> Result<Vec<UserDoc>>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert_task(&self, task: TaskDoc) -> Result<TaskDoc>;

    async fn list_tasks(&self, user_id: &ObjectId) -> Result<Vec<TaskDoc>>;

    async fn find_task(&self, user_id: &ObjectId, task_id: &ObjectId) -> Result<Option<TaskDoc>>;

    /// Apply a partial update; `None` when the task is not the caller's
    async fn patch_task(
        &self,
        user_id: &ObjectId,
        task_id: &ObjectId,
        patch: &TaskPatch,
    ) -> Result<Option<TaskDoc>>;

    /// Soft delete; `false` when nothing matched
    async fn delete_task(&self, user_id: &ObjectId, task_id: &ObjectId) -> Result<bool>;

    /// Tasks the notifier may still push for: not completed, not past due,
    /// not read and not yet notified
    async fn pending_notification_tasks(&self, user_id: &ObjectId) -> Result<Vec<TaskDoc>>;

    /// Latch `notified`; `false` when the task vanished meanwhile
    async fn mark_notified(&self, task_id: &ObjectId) -> Result<bool>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn find_ledger(&self, user_id: &ObjectId) -> Result<Option<LedgerDoc>>;

    /// Insert `fresh` unless the user already has a ledger
    async fn create_ledger_if_absent(&self, fresh: LedgerDoc) -> Result<LedgerLookup>;

    /// Mark the task completed (progress 100) and write the ledger in one
    /// logical step. `None` when the task is missing; neither write happens.
    async fn commit_completion(&self, commit: CompletionCommit) -> Result<Option<TaskDoc>>;
}

/// Everything the server needs from persistence
pub trait Store: UserStore + TaskStore + LedgerStore {
    /// Backend label for health output
    fn backend(&self) -> &'static str;
}
