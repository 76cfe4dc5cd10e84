//! Gamification ledger rules
//!
//! Pure points/level/streak transitions applied when a task is completed.
//! Persistence and the get-or-create flow live in [`service`].

pub mod service;

pub use service::{CompletionBody, CompletionReport, LedgerService};

use chrono::{DateTime, Duration, Utc};

/// Points awarded for every completed task
pub const POINTS_PER_TASK: i64 = 20;

/// Bonus awarded when the streak reaches a multiple of [`STREAK_BONUS_EVERY`]
pub const STREAK_BONUS: i64 = 30;

pub const STREAK_BONUS_EVERY: i64 = 7;

pub const POINTS_PER_LEVEL: i64 = 100;

/// `level = floor(points / 100) + 1`
pub fn level_for_points(points: i64) -> i64 {
    points.max(0).div_euclid(POINTS_PER_LEVEL) + 1
}

/// Whole 24-hour buckets elapsed since `since`.
///
/// Buckets are rolling windows of elapsed time, not calendar days. A clock
/// that moved backwards yields a negative count.
pub fn streak_buckets_elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let elapsed = now.signed_duration_since(since).num_milliseconds();
    elapsed.div_euclid(Duration::days(1).num_milliseconds())
}

/// How the streak moved on a completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakTransition {
    /// Completed again inside the current bucket
    Unchanged,
    /// Completed in the next bucket
    Extended,
    /// More than one bucket was skipped; streak restarts at 1
    Reset,
}

/// Points/level/streak snapshot of a ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerState {
    pub points: i64,
    pub level: i64,
    pub streak: i64,
    pub last_streak_update: DateTime<Utc>,
}

/// Result of applying one completion to a ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionOutcome {
    pub next: LedgerState,
    pub streak_bonus: i64,
    pub level_up: bool,
    pub transition: StreakTransition,
}

/// Apply a single task completion at `now`.
pub fn apply_completion(prev: &LedgerState, now: DateTime<Utc>) -> CompletionOutcome {
    let base_points = prev.points + POINTS_PER_TASK;
    let days = streak_buckets_elapsed(prev.last_streak_update, now);

    let (streak, streak_bonus, transition) = match days {
        1 => {
            let streak = prev.streak + 1;
            let bonus = if streak % STREAK_BONUS_EVERY == 0 {
                STREAK_BONUS
            } else {
                0
            };
            (streak, bonus, StreakTransition::Extended)
        }
        d if d > 1 => (1, 0, StreakTransition::Reset),
        _ => (prev.streak, 0, StreakTransition::Unchanged),
    };

    let points = base_points + streak_bonus;
    let level = level_for_points(points);

    CompletionOutcome {
        next: LedgerState {
            points,
            level,
            streak,
            last_streak_update: now,
        },
        streak_bonus,
        level_up: level > prev.level,
        transition,
    }
}
