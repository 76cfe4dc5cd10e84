//! In-memory store
//!
//! Used in dev mode when MongoDB is unreachable and by the test suite.
//! Mirrors the MongoDB semantics: soft deletes, unique email/phone and one
//! ledger per user.

use async_trait::async_trait;
use bson::{oid::ObjectId, DateTime};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{CompletionCommit, LedgerLookup, LedgerStore, Store, TaskStore, UserStore};
use crate::db::schemas::{LedgerDoc, TaskDoc, TaskPatch, UserDoc};
use crate::types::{PomodoroError, Result};

#[derive(Default)]
struct Tables {
    users: HashMap<ObjectId, UserDoc>,
    tasks: HashMap<ObjectId, TaskDoc>,
    /// Keyed by owning user
    ledgers: HashMap<ObjectId, LedgerDoc>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_live_task(task: &TaskDoc) -> bool {
    !task.metadata.is_deleted
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(&self, mut user: UserDoc) -> Result<UserDoc> {
        let mut tables = self.tables.write().await;

        if tables.users.values().any(|existing| existing.email == user.email) {
            return Err(PomodoroError::Conflict(format!(
                "User with email {} already exists",
                user.email
            )));
        }
        if let Some(phone) = user.phone.as_deref() {
            if tables
                .users
                .values()
                .any(|existing| existing.phone.as_deref() == Some(phone))
            {
                return Err(PomodoroError::Conflict(format!(
                    "User with phone number {} already exists",
                    phone
                )));
            }
        }

        let id = ObjectId::new();
        user._id = Some(id);
        user.recompute_total_points();
        tables.users.insert(id, user.clone());
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserDoc>> {
        let email = email.trim().to_lowercase();
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.email == email && !u.metadata.is_deleted)
            .cloned())
    }

    async fn find_user(&self, user_id: &ObjectId) -> Result<Option<UserDoc>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .get(user_id)
            .filter(|u| !u.metadata.is_deleted)
            .cloned())
    }

    async fn record_login(&self, user_id: &ObjectId, at: DateTime) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(user) = tables.users.get_mut(user_id) {
            user.last_login = Some(at);
            user.recompute_total_points();
            user.metadata.touch();
        }
        Ok(())
    }

    async fn list_users_by_points(&self) -> Result<Vec<UserDoc>> {
        let tables = self.tables.read().await;
        let mut users: Vec<UserDoc> = tables
            .users
            .values()
            .filter(|u| !u.metadata.is_deleted)
            .cloned()
            .collect();
        users.sort_by(|a, b| b.total_points.cmp(&a.total_points));
        Ok(users)
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert_task(&self, mut task: TaskDoc) -> Result<TaskDoc> {
        let id = ObjectId::new();
        task._id = Some(id);
        task.metadata.is_deleted = false;
        self.tables.write().await.tasks.insert(id, task.clone());
        Ok(task)
    }

    async fn list_tasks(&self, user_id: &ObjectId) -> Result<Vec<TaskDoc>> {
        let tables = self.tables.read().await;
        let mut tasks: Vec<TaskDoc> = tables
            .tasks
            .values()
            .filter(|t| t.user_id == *user_id && is_live_task(t))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t._id);
        Ok(tasks)
    }

    async fn find_task(&self, user_id: &ObjectId, task_id: &ObjectId) -> Result<Option<TaskDoc>> {
        let tables = self.tables.read().await;
        Ok(tables
            .tasks
            .get(task_id)
            .filter(|t| t.user_id == *user_id && is_live_task(t))
            .cloned())
    }

    async fn patch_task(
        &self,
        user_id: &ObjectId,
        task_id: &ObjectId,
        patch: &TaskPatch,
    ) -> Result<Option<TaskDoc>> {
        let mut tables = self.tables.write().await;
        match tables.tasks.get_mut(task_id) {
            Some(task) if task.user_id == *user_id && is_live_task(task) => {
                patch.apply(task);
                Ok(Some(task.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_task(&self, user_id: &ObjectId, task_id: &ObjectId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.tasks.get_mut(task_id) {
            Some(task) if task.user_id == *user_id && is_live_task(task) => {
                task.metadata.mark_deleted();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn pending_notification_tasks(&self, user_id: &ObjectId) -> Result<Vec<TaskDoc>> {
        let tables = self.tables.read().await;
        Ok(tables
            .tasks
            .values()
            .filter(|t| {
                t.user_id == *user_id
                    && is_live_task(t)
                    && !t.completed
                    && !t.has_exceeded_time
                    && !t.is_read
                    && !t.notified
            })
            .cloned()
            .collect())
    }

    async fn mark_notified(&self, task_id: &ObjectId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.tasks.get_mut(task_id) {
            Some(task) if is_live_task(task) => {
                task.notified = true;
                task.metadata.touch();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn find_ledger(&self, user_id: &ObjectId) -> Result<Option<LedgerDoc>> {
        Ok(self.tables.read().await.ledgers.get(user_id).cloned())
    }

    async fn create_ledger_if_absent(&self, mut fresh: LedgerDoc) -> Result<LedgerLookup> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.ledgers.get(&fresh.user_id) {
            return Ok(LedgerLookup::Existing(existing.clone()));
        }
        fresh._id = Some(ObjectId::new());
        tables.ledgers.insert(fresh.user_id, fresh.clone());
        Ok(LedgerLookup::Created(fresh))
    }

    async fn commit_completion(&self, commit: CompletionCommit) -> Result<Option<TaskDoc>> {
        // Single write lock: both writes land or neither does
        let mut tables = self.tables.write().await;

        let task_exists = tables
            .tasks
            .get(&commit.task_id)
            .is_some_and(|t| t.user_id == commit.user_id && is_live_task(t));
        if !task_exists {
            return Ok(None);
        }

        let ledger = tables.ledgers.get_mut(&commit.user_id).ok_or_else(|| {
            PomodoroError::NotFound("Pomodoro points not found".into())
        })?;
        if ledger.last_streak_update != commit.expected_last_streak_update
            || ledger.points != commit.expected_points
        {
            return Err(PomodoroError::Conflict(
                "Points ledger changed concurrently, please retry".into(),
            ));
        }
        ledger.points = commit.points;
        ledger.level = commit.level;
        ledger.streak = commit.streak;
        ledger.last_streak_update = commit.last_streak_update;
        ledger.metadata.touch();

        let task = match tables.tasks.get_mut(&commit.task_id) {
            Some(task) => task,
            None => return Ok(None),
        };
        task.completed = true;
        task.progress = 100;
        task.metadata.touch();
        Ok(Some(task.clone()))
    }
}

impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }
}
