//! Point ledger document schema
//!
//! One ledger per user holding pomodoro points, level and streak.

use bson::{doc, oid::ObjectId, DateTime, Document};
use chrono::Utc;
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::gamification::{level_for_points, LedgerState};

/// Collection name for point ledgers
pub const LEDGER_COLLECTION: &str = "pomodoropoints";

/// Per-user point ledger stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerDoc {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Owning user (unique)
    pub user_id: ObjectId,

    #[serde(default)]
    pub points: i64,

    /// Always `points / 100 + 1`
    #[serde(default = "default_level")]
    pub level: i64,

    #[serde(default)]
    pub streak: i64,

    pub last_streak_update: DateTime,
}

fn default_level() -> i64 {
    1
}

impl LedgerDoc {
    /// Fresh ledger: no points, level 1, no streak
    pub fn new(user_id: ObjectId, now: chrono::DateTime<Utc>) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            user_id,
            points: 0,
            level: level_for_points(0),
            streak: 0,
            last_streak_update: DateTime::from_chrono(now),
        }
    }

    pub fn state(&self) -> LedgerState {
        LedgerState {
            points: self.points,
            level: self.level,
            streak: self.streak,
            last_streak_update: self.last_streak_update.to_chrono(),
        }
    }

    pub fn apply_state(&mut self, state: &LedgerState) {
        self.points = state.points;
        self.level = state.level;
        self.streak = state.streak;
        self.last_streak_update = DateTime::from_chrono(state.last_streak_update);
        self.metadata.touch();
    }
}

impl IntoIndexes for LedgerDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "userId": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("user_id_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for LedgerDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

/// Ledger as returned by the API
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LedgerView {
    pub user_id: String,
    pub points: i64,
    pub level: i64,
    pub streak: i64,
    pub last_streak_update: chrono::DateTime<Utc>,
}

impl From<&LedgerDoc> for LedgerView {
    fn from(ledger: &LedgerDoc) -> Self {
        Self {
            user_id: ledger.user_id.to_hex(),
            points: ledger.points,
            level: ledger.level,
            streak: ledger.streak,
            last_streak_update: ledger.last_streak_update.to_chrono(),
        }
    }
}
