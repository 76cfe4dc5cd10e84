//! MongoDB-backed store

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::ReturnDocument;
use tracing::{debug, error, info, warn};

use super::{CompletionCommit, LedgerLookup, LedgerStore, Store, TaskStore, UserStore};
use crate::db::mongo::{is_duplicate_key, is_write_conflict, live};
use crate::db::schemas::{
    LedgerDoc, TaskDoc, TaskPatch, UserDoc, LEDGER_COLLECTION, TASK_COLLECTION, USER_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::types::{PomodoroError, Result};

pub struct MongoStore {
    client: MongoClient,
    users: MongoCollection<UserDoc>,
    tasks: MongoCollection<TaskDoc>,
    ledgers: MongoCollection<LedgerDoc>,
    /// Commit completions inside a multi-document transaction (replica set only)
    transactions: bool,
}

impl MongoStore {
    /// Open the three collections, creating their indexes
    pub async fn connect(client: MongoClient, transactions: bool) -> Result<Self> {
        let users = client.collection::<UserDoc>(USER_COLLECTION).await?;
        let tasks = client.collection::<TaskDoc>(TASK_COLLECTION).await?;
        let ledgers = client.collection::<LedgerDoc>(LEDGER_COLLECTION).await?;

        info!(
            db = client.db_name(),
            transactions, "MongoDB store ready"
        );

        Ok(Self {
            client,
            users,
            tasks,
            ledgers,
            transactions,
        })
    }

    fn ledger_set(commit: &CompletionCommit) -> Document {
        doc! {
            "$set": {
                "points": commit.points,
                "level": commit.level,
                "streak": commit.streak,
                "lastStreakUpdate": commit.last_streak_update,
                "metadata.updatedAt": DateTime::now(),
            }
        }
    }

    fn ledger_guard(commit: &CompletionCommit) -> Document {
        live(doc! {
            "userId": commit.user_id,
            "lastStreakUpdate": commit.expected_last_streak_update,
            "points": commit.expected_points,
        })
    }

    fn task_filter(commit: &CompletionCommit) -> Document {
        live(doc! { "_id": commit.task_id, "userId": commit.user_id })
    }

    fn task_completed_set() -> Document {
        doc! {
            "$set": {
                "completed": true,
                "progress": 100,
                "metadata.updatedAt": DateTime::now(),
            }
        }
    }

    async fn commit_in_transaction(&self, commit: CompletionCommit) -> Result<Option<TaskDoc>> {
        let mut session = self.client.inner().start_session().await?;
        session.start_transaction().await?;

        let task = self
            .tasks
            .inner()
            .find_one_and_update(Self::task_filter(&commit), Self::task_completed_set())
            .return_document(ReturnDocument::After)
            .session(&mut session)
            .await;

        let task = match task {
            Ok(Some(task)) => task,
            Ok(None) => {
                session.abort_transaction().await?;
                return Ok(None);
            }
            Err(e) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    warn!("Failed to abort completion transaction: {}", abort_err);
                }
                return Err(completion_error(e));
            }
        };

        let ledger = self
            .ledgers
            .inner()
            .update_one(Self::ledger_guard(&commit), Self::ledger_set(&commit))
            .session(&mut session)
            .await;

        match ledger {
            Ok(result) if result.matched_count == 1 => {
                session
                    .commit_transaction()
                    .await
                    .map_err(completion_error)?;
                Ok(Some(task))
            }
            Ok(_) => {
                session.abort_transaction().await?;
                Err(stale_ledger())
            }
            Err(e) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    warn!("Failed to abort completion transaction: {}", abort_err);
                }
                Err(completion_error(e))
            }
        }
    }

    /// Task first, then ledger; a failed ledger write restores the task's
    /// previous `completed`/`progress`.
    async fn commit_with_compensation(&self, commit: CompletionCommit) -> Result<Option<TaskDoc>> {
        let before = self
            .tasks
            .inner()
            .find_one_and_update(Self::task_filter(&commit), Self::task_completed_set())
            .return_document(ReturnDocument::Before)
            .await?;

        let Some(mut task) = before else {
            return Ok(None);
        };

        let ledger_result = self
            .ledgers
            .inner()
            .update_one(Self::ledger_guard(&commit), Self::ledger_set(&commit))
            .await;

        let failure = match ledger_result {
            Ok(result) if result.matched_count == 1 => None,
            Ok(_) => Some(stale_ledger()),
            Err(e) => Some(PomodoroError::from(e)),
        };

        if let Some(err) = failure {
            let revert = doc! {
                "$set": {
                    "completed": task.completed,
                    "progress": task.progress,
                    "metadata.updatedAt": DateTime::now(),
                }
            };
            if let Err(revert_err) = self
                .tasks
                .update_one(doc! { "_id": commit.task_id }, revert)
                .await
            {
                error!(
                    task_id = %commit.task_id,
                    "Failed to revert task after ledger write failed: {}", revert_err
                );
            }
            return Err(err);
        }

        task.completed = true;
        task.progress = 100;
        task.metadata.touch();
        Ok(Some(task))
    }
}

fn stale_ledger() -> PomodoroError {
    PomodoroError::Conflict("Points ledger changed concurrently, please retry".into())
}

/// A write conflict with a concurrent completion is retried like a stale
/// guard; anything else is a database failure.
fn completion_error(err: mongodb::error::Error) -> PomodoroError {
    if is_write_conflict(&err) {
        debug!("Completion transaction hit a write conflict: {}", err);
        stale_ledger()
    } else {
        err.into()
    }
}

#[async_trait]
impl UserStore for MongoStore {
    async fn insert_user(&self, mut user: UserDoc) -> Result<UserDoc> {
        user.recompute_total_points();
        let id = self
            .users
            .insert_one(user.clone())
            .await
            .map_err(|e| match e {
                PomodoroError::Conflict(detail) => duplicate_user(&user, &detail),
                other => other,
            })?;
        user._id = Some(id);
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserDoc>> {
        self.users
            .find_one(doc! { "email": email.trim().to_lowercase() })
            .await
    }

    async fn find_user(&self, user_id: &ObjectId) -> Result<Option<UserDoc>> {
        self.users.find_one(doc! { "_id": *user_id }).await
    }

    async fn record_login(&self, user_id: &ObjectId, at: DateTime) -> Result<()> {
        self.users
            .find_one_and_set(doc! { "_id": *user_id }, doc! { "lastLogin": at })
            .await?;
        Ok(())
    }

    async fn list_users_by_points(&self) -> Result<Vec<UserDoc>> {
        self.users
            .find_many(doc! {}, Some(doc! { "totalPoints": -1 }))
            .await
    }
}

#[async_trait]
impl TaskStore for MongoStore {
    async fn insert_task(&self, mut task: TaskDoc) -> Result<TaskDoc> {
        let id = self.tasks.insert_one(task.clone()).await?;
        task._id = Some(id);
        Ok(task)
    }

    async fn list_tasks(&self, user_id: &ObjectId) -> Result<Vec<TaskDoc>> {
        self.tasks
            .find_many(doc! { "userId": *user_id }, Some(doc! { "_id": 1 }))
            .await
    }

    async fn find_task(&self, user_id: &ObjectId, task_id: &ObjectId) -> Result<Option<TaskDoc>> {
        self.tasks
            .find_one(doc! { "_id": *task_id, "userId": *user_id })
            .await
    }

    async fn patch_task(
        &self,
        user_id: &ObjectId,
        task_id: &ObjectId,
        patch: &TaskPatch,
    ) -> Result<Option<TaskDoc>> {
        self.tasks
            .find_one_and_set(
                doc! { "_id": *task_id, "userId": *user_id },
                patch.to_set_document()?,
            )
            .await
    }

    async fn delete_task(&self, user_id: &ObjectId, task_id: &ObjectId) -> Result<bool> {
        let result = self
            .tasks
            .soft_delete(doc! { "_id": *task_id, "userId": *user_id })
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn pending_notification_tasks(&self, user_id: &ObjectId) -> Result<Vec<TaskDoc>> {
        self.tasks
            .find_many(
                doc! {
                    "userId": *user_id,
                    "completed": { "$ne": true },
                    "hasExceededTime": { "$ne": true },
                    "isRead": { "$ne": true },
                    "notified": { "$ne": true },
                },
                None,
            )
            .await
    }

    async fn mark_notified(&self, task_id: &ObjectId) -> Result<bool> {
        let result = self
            .tasks
            .update_one(
                live(doc! { "_id": *task_id }),
                doc! {
                    "$set": {
                        "notified": true,
                        "metadata.updatedAt": DateTime::now(),
                    }
                },
            )
            .await?;
        Ok(result.matched_count > 0)
    }
}

#[async_trait]
impl LedgerStore for MongoStore {
    async fn find_ledger(&self, user_id: &ObjectId) -> Result<Option<LedgerDoc>> {
        self.ledgers.find_one(doc! { "userId": *user_id }).await
    }

    async fn create_ledger_if_absent(&self, fresh: LedgerDoc) -> Result<LedgerLookup> {
        let filter = doc! { "userId": fresh.user_id };

        let mut on_insert = bson::to_document(&fresh)
            .map_err(|e| PomodoroError::Internal(format!("Failed to encode ledger: {e}")))?;
        // Upsert copies the equality filter into the new document
        on_insert.remove("userId");
        on_insert.remove("_id");

        let created = match self
            .ledgers
            .inner()
            .update_one(filter.clone(), doc! { "$setOnInsert": on_insert })
            .upsert(true)
            .await
        {
            Ok(result) => result.upserted_id.is_some(),
            // Lost the race to a concurrent first completion
            Err(e) if is_duplicate_key(&e) => false,
            Err(e) => return Err(e.into()),
        };

        let ledger = self.ledgers.find_one(filter).await?.ok_or_else(|| {
            PomodoroError::NotFound("Pomodoro points not found".into())
        })?;

        if created {
            debug!(user_id = %fresh.user_id, "Created points ledger");
            Ok(LedgerLookup::Created(ledger))
        } else {
            Ok(LedgerLookup::Existing(ledger))
        }
    }

    async fn commit_completion(&self, commit: CompletionCommit) -> Result<Option<TaskDoc>> {
        if self.transactions {
            self.commit_in_transaction(commit).await
        } else {
            self.commit_with_compensation(commit).await
        }
    }
}

impl Store for MongoStore {
    fn backend(&self) -> &'static str {
        "mongodb"
    }
}

/// Name the field behind a unique index violation on the users collection
fn duplicate_user(user: &UserDoc, detail: &str) -> PomodoroError {
    match user.phone.as_deref() {
        Some(phone) if detail.contains("phone_unique") => PomodoroError::Conflict(format!(
            "User with phone number {} already exists",
            phone
        )),
        _ => PomodoroError::Conflict(format!("User with email {} already exists", user.email)),
    }
}
