//! Ledger service: get-or-create and task completion against a store

use bson::{oid::ObjectId, DateTime};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{apply_completion, StreakTransition};
use crate::db::schemas::{LedgerDoc, LedgerView, TaskDoc, TaskView};
use crate::store::{CompletionCommit, LedgerLookup, Store};
use crate::types::{PomodoroError, Result};

/// Attempts before a completion that keeps losing the ledger guard gives up
const MAX_COMPLETION_ATTEMPTS: usize = 3;

/// Outcome of `complete_task`
#[derive(Debug, Clone)]
pub struct CompletionReport {
    pub task: TaskDoc,
    pub ledger: LedgerDoc,
    pub streak_bonus: i64,
    pub level_up: bool,
    pub transition: StreakTransition,
    /// The ledger did not exist before this completion
    pub ledger_created: bool,
}

/// `data` payload of `PATCH /tasks/{id}/complete`
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CompletionBody {
    pub task: TaskView,
    pub points: LedgerView,
    pub streak_bonus: i64,
    pub level_up: bool,
}

impl From<&CompletionReport> for CompletionBody {
    fn from(report: &CompletionReport) -> Self {
        Self {
            task: TaskView::from(&report.task),
            points: LedgerView::from(&report.ledger),
            streak_bonus: report.streak_bonus,
            level_up: report.level_up,
        }
    }
}

pub struct LedgerService {
    store: Arc<dyn Store>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn get_or_create(&self, user_id: &ObjectId) -> Result<LedgerLookup> {
        self.get_or_create_at(user_id, Utc::now()).await
    }

    /// Read the user's ledger, creating a zeroed one stamped `now` if absent
    pub async fn get_or_create_at(
        &self,
        user_id: &ObjectId,
        now: chrono::DateTime<Utc>,
    ) -> Result<LedgerLookup> {
        if let Some(ledger) = self.store.find_ledger(user_id).await? {
            return Ok(LedgerLookup::Existing(ledger));
        }
        let lookup = self
            .store
            .create_ledger_if_absent(LedgerDoc::new(*user_id, now))
            .await?;
        if lookup.was_created() {
            info!(user_id = %user_id, "Initialized points ledger");
        }
        Ok(lookup)
    }

    pub async fn complete_task(
        &self,
        user_id: &ObjectId,
        task_id: &ObjectId,
    ) -> Result<CompletionReport> {
        self.complete_task_at(user_id, task_id, Utc::now()).await
    }

    /// Mark a task completed and credit the user's ledger as of `now`.
    pub async fn complete_task_at(
        &self,
        user_id: &ObjectId,
        task_id: &ObjectId,
        now: chrono::DateTime<Utc>,
    ) -> Result<CompletionReport> {
        // Stored timestamps have millisecond precision
        let now = DateTime::from_chrono(now);

        if self.store.find_task(user_id, task_id).await?.is_none() {
            return Err(task_not_found());
        }

        let mut ledger_created = false;
        let mut attempt = 0;
        loop {
            attempt += 1;

            let lookup = self.get_or_create_at(user_id, now.to_chrono()).await?;
            ledger_created |= lookup.was_created();
            let mut ledger = lookup.into_inner();

            let outcome = apply_completion(&ledger.state(), now.to_chrono());
            let commit = CompletionCommit {
                user_id: *user_id,
                task_id: *task_id,
                expected_last_streak_update: ledger.last_streak_update,
                expected_points: ledger.points,
                points: outcome.next.points,
                level: outcome.next.level,
                streak: outcome.next.streak,
                last_streak_update: now,
            };

            match self.commit_detached(commit).await? {
                Ok(Some(task)) => {
                    ledger.apply_state(&outcome.next);
                    info!(
                        user_id = %user_id,
                        task_id = %task_id,
                        points = ledger.points,
                        level = ledger.level,
                        streak = ledger.streak,
                        streak_bonus = outcome.streak_bonus,
                        level_up = outcome.level_up,
                        "Task completed"
                    );
                    return Ok(CompletionReport {
                        task,
                        ledger,
                        streak_bonus: outcome.streak_bonus,
                        level_up: outcome.level_up,
                        transition: outcome.transition,
                        ledger_created,
                    });
                }
                // Deleted between the lookup and the commit
                Ok(None) => return Err(task_not_found()),
                Err(PomodoroError::Conflict(msg)) if attempt < MAX_COMPLETION_ATTEMPTS => {
                    debug!(user_id = %user_id, attempt, "Retrying completion: {}", msg);
                }
                Err(err) => {
                    warn!(user_id = %user_id, task_id = %task_id, "Completion failed: {}", err);
                    return Err(err);
                }
            }
        }
    }

    /// Run the task + ledger write on its own task so that dropping the
    /// caller (request timeout, client gone) cannot stop it halfway.
    async fn commit_detached(&self, commit: CompletionCommit) -> Result<Result<Option<TaskDoc>>> {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move { store.commit_completion(commit).await })
            .await
            .map_err(|e| PomodoroError::Internal(format!("Completion write aborted: {}", e)))
    }
}

fn task_not_found() -> PomodoroError {
    PomodoroError::NotFound("Pomodoro task not found".into())
}
