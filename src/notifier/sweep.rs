//! Periodic deadline sweep
//!
//! Every tick scans the pending tasks of each connected user and pushes a
//! one-shot `task-ending-soon` event for tasks due within the window.
//! Deadlines are compared as minute-of-day with no midnight wraparound: a
//! task due at 00:03 is never matched at 23:58.

use bson::oid::ObjectId;
use chrono::{Local, NaiveTime, Timelike};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::events::PushEvent;
use super::registry::ConnectionRegistry;
use crate::store::Store;
use crate::types::{PomodoroError, Result};

/// Upper bound on each store call made for one user during a sweep
const USER_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Minutes since midnight
pub fn minute_of_day(time: NaiveTime) -> i64 {
    i64::from(time.hour()) * 60 + i64::from(time.minute())
}

/// Counters for one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub users_scanned: usize,
    pub notified: usize,
    pub failed_users: usize,
}

pub struct DeadlineNotifier {
    store: Arc<dyn Store>,
    registry: Arc<ConnectionRegistry>,
    window_minutes: i64,
    period: Duration,
    query_timeout: Duration,
}

impl DeadlineNotifier {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<ConnectionRegistry>,
        window_minutes: u32,
        period: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            window_minutes: i64::from(window_minutes),
            period,
            query_timeout: USER_QUERY_TIMEOUT,
        }
    }

    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    /// Run one sweep as of `now` (local time of day).
    ///
    /// A failing user is logged and skipped; the rest of the sweep goes on.
    pub async fn sweep(&self, now: NaiveTime) -> SweepReport {
        let current = minute_of_day(now);
        let mut report = SweepReport::default();

        for user_id in self.registry.connected_users() {
            report.users_scanned += 1;
            match self.sweep_user(&user_id, current).await {
                Ok(sent) => report.notified += sent,
                Err(e) => {
                    report.failed_users += 1;
                    warn!(user_id = %user_id, "Deadline sweep failed for user: {}", e);
                }
            }
        }

        report
    }

    async fn sweep_user(&self, user_id: &ObjectId, current: i64) -> Result<usize> {
        let tasks = self
            .bounded(self.store.pending_notification_tasks(user_id))
            .await?;

        let mut sent = 0;
        for task in tasks {
            let Some(task_id) = task._id else {
                continue;
            };
            let Some(due) = task.due_time_of_day() else {
                continue;
            };

            let minutes_remaining = minute_of_day(due) - current;
            if !(0..=self.window_minutes).contains(&minutes_remaining) {
                continue;
            }

            // The user may have disconnected since the sweep started
            let Some(handle) = self.registry.lookup(user_id) else {
                break;
            };
            let delivered = handle.send(PushEvent::TaskEndingSoon {
                task_id: task_id.to_hex(),
                title: task.text.clone(),
                end_time: task.due_label(),
                minutes_remaining,
            });
            if !delivered {
                debug!(user_id = %user_id, "Push channel closed mid-sweep");
                break;
            }

            if self.bounded(self.store.mark_notified(&task_id)).await? {
                debug!(user_id = %user_id, task_id = %task_id, minutes_remaining, "Sent ending-soon push");
                sent += 1;
            } else {
                // Completed or deleted while we were pushing
                debug!(task_id = %task_id, "Task vanished before notified latch");
            }
        }

        Ok(sent)
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        timeout(self.query_timeout, call)
            .await
            .map_err(|_| PomodoroError::Timeout(self.query_timeout.as_millis() as u64))?
    }

    /// Start the periodic sweep. Ticks never overlap; a slow sweep skips
    /// the ticks it missed.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        info!(
            period_secs = self.period.as_secs(),
            window_minutes = self.window_minutes,
            "Deadline notifier started"
        );
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if self.registry.is_empty() {
                    continue;
                }
                let report = self.sweep(Local::now().time()).await;
                if report.notified > 0 || report.failed_users > 0 {
                    info!(
                        users = report.users_scanned,
                        notified = report.notified,
                        failed = report.failed_users,
                        "Deadline sweep finished"
                    );
                } else {
                    debug!(users = report.users_scanned, "Deadline sweep found nothing due");
                }
            }
        })
    }
}
