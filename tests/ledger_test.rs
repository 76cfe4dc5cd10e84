//! Points ledger integration tests
//!
//! Drives completions through `LedgerService` on the in-memory store with
//! injected clocks:
//! - first completion and lazy ledger creation
//! - streak extension, the every-seventh-day bonus and level-up
//! - same-bucket and skipped-bucket completions
//! - concurrent completions for one user
//! - a completion whose caller is dropped mid-commit

use async_trait::async_trait;
use bson::oid::ObjectId;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

use pomodoro_server::db::schemas::{LedgerDoc, TaskDoc, TaskPatch, UserDoc};
use pomodoro_server::gamification::{LedgerService, StreakTransition};
use pomodoro_server::store::{
    CompletionCommit, LedgerLookup, LedgerStore, MemoryStore, Store, TaskStore, UserStore,
};
use pomodoro_server::{PomodoroError, Result};

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, day, hour, minute, 0).unwrap()
}

struct Fixture {
    store: Arc<MemoryStore>,
    service: LedgerService,
    user_id: ObjectId,
}

impl Fixture {
    async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let user = store
            .insert_user(UserDoc::new(
                "Ada".into(),
                "ada@example.com".into(),
                "hash".into(),
                "0123456789".into(),
            ))
            .await
            .unwrap();
        let service = LedgerService::new(Arc::clone(&store) as Arc<dyn Store>);
        Self {
            store,
            service,
            user_id: user._id.unwrap(),
        }
    }

    async fn task(&self, text: &str) -> ObjectId {
        self.store
            .insert_task(TaskDoc::new(self.user_id, text.into()))
            .await
            .unwrap()
            ._id
            .unwrap()
    }

    async fn seed_ledger(&self, points: i64, level: i64, streak: i64, last: DateTime<Utc>) {
        let mut ledger = LedgerDoc::new(self.user_id, last);
        ledger.points = points;
        ledger.level = level;
        ledger.streak = streak;
        let lookup = self.store.create_ledger_if_absent(ledger).await.unwrap();
        assert!(lookup.was_created());
    }
}

// =============================================================================
// First completion
// =============================================================================

#[tokio::test]
async fn test_first_completion_starts_ledger() {
    let fx = Fixture::new().await;
    let task_id = fx.task("Write report").await;
    let now = at(10, 9, 0);

    let report = fx
        .service
        .complete_task_at(&fx.user_id, &task_id, now)
        .await
        .unwrap();

    assert!(report.ledger_created);
    assert!(report.task.completed);
    assert_eq!(report.task.progress, 100);
    assert_eq!(report.ledger.points, 20);
    assert_eq!(report.ledger.level, 1);
    assert_eq!(report.ledger.streak, 0);
    assert_eq!(report.streak_bonus, 0);
    assert!(!report.level_up);
    assert_eq!(report.ledger.last_streak_update.to_chrono(), now);

    let stored = fx.store.find_ledger(&fx.user_id).await.unwrap().unwrap();
    assert_eq!(stored.points, 20);
}

#[tokio::test]
async fn test_missing_task_leaves_ledger_untouched() {
    let fx = Fixture::new().await;
    let err = assert_err!(
        fx.service
            .complete_task_at(&fx.user_id, &ObjectId::new(), at(10, 9, 0))
            .await
    );

    assert!(matches!(err, PomodoroError::NotFound(_)));
    assert!(fx.store.find_ledger(&fx.user_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_other_users_task_is_not_found() {
    let fx = Fixture::new().await;
    let foreign = fx
        .store
        .insert_task(TaskDoc::new(ObjectId::new(), "Not mine".into()))
        .await
        .unwrap()
        ._id
        .unwrap();

    let err = fx
        .service
        .complete_task_at(&fx.user_id, &foreign, at(10, 9, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, PomodoroError::NotFound(_)));
}

// =============================================================================
// Streaks
// =============================================================================

#[tokio::test]
async fn test_seventh_day_bonus_and_level_up() {
    let fx = Fixture::new().await;
    let last = at(10, 9, 0);
    fx.seed_ledger(480, 5, 6, last).await;

    let first = fx.task("Day seven").await;
    let report = fx
        .service
        .complete_task_at(&fx.user_id, &first, last + Duration::hours(25))
        .await
        .unwrap();

    assert_eq!(report.transition, StreakTransition::Extended);
    assert_eq!(report.ledger.points, 530);
    assert_eq!(report.ledger.streak, 7);
    assert_eq!(report.ledger.level, 6);
    assert_eq!(report.streak_bonus, 30);
    assert!(report.level_up);

    // Again within the same bucket: plain points, streak held
    let second = fx.task("Day seven, again").await;
    let report = fx
        .service
        .complete_task_at(&fx.user_id, &second, last + Duration::hours(26))
        .await
        .unwrap();

    assert_eq!(report.transition, StreakTransition::Unchanged);
    assert_eq!(report.ledger.points, 550);
    assert_eq!(report.ledger.streak, 7);
    assert_eq!(report.streak_bonus, 0);
    assert!(!report.level_up);
}

#[tokio::test]
async fn test_skipped_bucket_resets_streak() {
    let fx = Fixture::new().await;
    let last = at(10, 9, 0);
    fx.seed_ledger(200, 3, 4, last).await;

    let task_id = fx.task("Back again").await;
    let report = fx
        .service
        .complete_task_at(&fx.user_id, &task_id, last + Duration::hours(49))
        .await
        .unwrap();

    assert_eq!(report.transition, StreakTransition::Reset);
    assert_eq!(report.ledger.streak, 1);
    assert_eq!(report.ledger.points, 220);
    assert_eq!(report.streak_bonus, 0);
}

#[tokio::test]
async fn test_same_bucket_moves_window_forward() {
    let fx = Fixture::new().await;
    let last = at(10, 9, 0);
    fx.seed_ledger(0, 1, 2, last).await;

    // 23h later: same bucket, but lastStreakUpdate still moves to now
    let first = fx.task("Late").await;
    let now = last + Duration::hours(23);
    fx.service
        .complete_task_at(&fx.user_id, &first, now)
        .await
        .unwrap();

    // 23h after that is still inside the moved window
    let second = fx.task("Later").await;
    let report = fx
        .service
        .complete_task_at(&fx.user_id, &second, now + Duration::hours(23))
        .await
        .unwrap();

    assert_eq!(report.transition, StreakTransition::Unchanged);
    assert_eq!(report.ledger.streak, 2);
    assert_eq!(report.ledger.points, 40);
}

#[tokio::test]
async fn test_clock_moving_backwards_keeps_streak() {
    let fx = Fixture::new().await;
    let last = at(10, 9, 0);
    fx.seed_ledger(100, 2, 3, last).await;

    let task_id = fx.task("Skewed").await;
    let report = fx
        .service
        .complete_task_at(&fx.user_id, &task_id, last - Duration::hours(2))
        .await
        .unwrap();

    assert_eq!(report.transition, StreakTransition::Unchanged);
    assert_eq!(report.ledger.streak, 3);
    assert_eq!(report.ledger.points, 120);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_concurrent_completions_both_credit() {
    let fx = Arc::new(Fixture::new().await);
    let a = fx.task("A").await;
    let b = fx.task("B").await;
    let now = at(11, 12, 0);

    let (ra, rb) = tokio::join!(
        fx.service.complete_task_at(&fx.user_id, &a, now),
        fx.service.complete_task_at(&fx.user_id, &b, now),
    );
    assert_ok!(ra);
    assert_ok!(rb);

    let ledger = fx.store.find_ledger(&fx.user_id).await.unwrap().unwrap();
    assert_eq!(ledger.points, 40);
}

#[tokio::test]
async fn test_get_or_create_is_idempotent() {
    let fx = Fixture::new().await;
    let now = at(12, 8, 30);

    let first = fx.service.get_or_create_at(&fx.user_id, now).await.unwrap();
    let second = fx
        .service
        .get_or_create_at(&fx.user_id, now + Duration::hours(1))
        .await
        .unwrap();

    assert!(first.was_created());
    assert!(!second.was_created());
    assert_eq!(second.ledger().points, 0);
    assert_eq!(second.ledger().level, 1);
    assert_eq!(second.ledger().last_streak_update.to_chrono(), now);
}

// =============================================================================
// Cancellation
// =============================================================================

/// Delegates to a `MemoryStore` but takes a while to commit a completion
struct SlowCommitStore {
    inner: Arc<MemoryStore>,
    delay: std::time::Duration,
}

#[async_trait]
impl UserStore for SlowCommitStore {
    async fn insert_user(&self, user: UserDoc) -> Result<UserDoc> {
        self.inner.insert_user(user).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserDoc>> {
        self.inner.find_user_by_email(email).await
    }

    async fn find_user(&self, user_id: &ObjectId) -> Result<Option<UserDoc>> {
        self.inner.find_user(user_id).await
    }

    async fn record_login(&self, user_id: &ObjectId, at: bson::DateTime) -> Result<()> {
        self.inner.record_login(user_id, at).await
    }

    async fn list_users_by_points(&self) -> Result<Vec<UserDoc>> {
        self.inner.list_users_by_points().await
    }
}

#[async_trait]
impl TaskStore for SlowCommitStore {
    async fn insert_task(&self, task: TaskDoc) -> Result<TaskDoc> {
        self.inner.insert_task(task).await
    }

    async fn list_tasks(&self, user_id: &ObjectId) -> Result<Vec<TaskDoc>> {
        self.inner.list_tasks(user_id).await
    }

    async fn find_task(&self, user_id: &ObjectId, task_id: &ObjectId) -> Result<Option<TaskDoc>> {
        self.inner.find_task(user_id, task_id).await
    }

    async fn patch_task(
        &self,
        user_id: &ObjectId,
        task_id: &ObjectId,
        patch: &TaskPatch,
    ) -> Result<Option<TaskDoc>> {
        self.inner.patch_task(user_id, task_id, patch).await
    }

    async fn delete_task(&self, user_id: &ObjectId, task_id: &ObjectId) -> Result<bool> {
        self.inner.delete_task(user_id, task_id).await
    }

    async fn pending_notification_tasks(&self, user_id: &ObjectId) -> Result<Vec<TaskDoc>> {
        self.inner.pending_notification_tasks(user_id).await
    }

    async fn mark_notified(&self, task_id: &ObjectId) -> Result<bool> {
        self.inner.mark_notified(task_id).await
    }
}

#[async_trait]
impl LedgerStore for SlowCommitStore {
    async fn find_ledger(&self, user_id: &ObjectId) -> Result<Option<LedgerDoc>> {
        self.inner.find_ledger(user_id).await
    }

    async fn create_ledger_if_absent(&self, fresh: LedgerDoc) -> Result<LedgerLookup> {
        self.inner.create_ledger_if_absent(fresh).await
    }

    async fn commit_completion(&self, commit: CompletionCommit) -> Result<Option<TaskDoc>> {
        tokio::time::sleep(self.delay).await;
        self.inner.commit_completion(commit).await
    }
}

impl Store for SlowCommitStore {
    fn backend(&self) -> &'static str {
        "slow-commit"
    }
}

#[tokio::test]
async fn test_dropped_caller_still_commits_task_and_points() {
    let fx = Fixture::new().await;
    let task_id = fx.task("Interrupted").await;
    let slow = Arc::new(SlowCommitStore {
        inner: Arc::clone(&fx.store),
        delay: std::time::Duration::from_millis(50),
    });
    let service = LedgerService::new(slow as Arc<dyn Store>);

    // The caller gives up while the commit is still sleeping
    let outcome = tokio::time::timeout(
        std::time::Duration::from_millis(10),
        service.complete_task_at(&fx.user_id, &task_id, at(13, 10, 0)),
    )
    .await;
    assert!(outcome.is_err());

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let task = fx.store.find_task(&fx.user_id, &task_id).await.unwrap().unwrap();
    assert!(task.completed);
    let ledger = fx.store.find_ledger(&fx.user_id).await.unwrap().unwrap();
    assert_eq!(ledger.points, 20);
}
