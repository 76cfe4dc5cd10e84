//! Pomodoro task document schema

use bson::{doc, oid::ObjectId, DateTime, Document};
use chrono::{NaiveTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::types::PomodoroError;

/// Collection name for pomodoro tasks
pub const TASK_COLLECTION: &str = "pomodoros";

/// Task priority
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// Pomodoro task stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskDoc {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Owning user
    pub user_id: ObjectId,

    /// Task name
    pub text: String,

    #[serde(default)]
    pub completed: bool,

    /// Percent complete, always within [0, 100]
    #[serde(default)]
    pub progress: i32,

    #[serde(default)]
    pub priority: Priority,

    /// Absolute deadline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime>,

    /// Time-of-day deadline ("HH:MM"); takes precedence over `deadline`
    /// for ending-soon notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,

    /// Latched once an ending-soon push has fired
    #[serde(default)]
    pub notified: bool,

    #[serde(default)]
    pub is_read: bool,

    #[serde(default)]
    pub has_exceeded_time: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_interval: Option<String>,
}

impl TaskDoc {
    /// Create a new, incomplete task
    pub fn new(user_id: ObjectId, text: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            user_id,
            text,
            completed: false,
            progress: 0,
            priority: Priority::default(),
            deadline: None,
            end_time: None,
            notified: false,
            is_read: false,
            has_exceeded_time: false,
            reminder_interval: None,
        }
    }

    /// The time of day this task is due, if it has a usable deadline.
    ///
    /// `endTime` wins over the absolute `deadline`; the latter is read in the
    /// server's local time zone.
    pub fn due_time_of_day(&self) -> Option<NaiveTime> {
        if let Some(end_time) = &self.end_time {
            return parse_time_of_day(end_time);
        }
        self.deadline
            .map(|d| d.to_chrono().with_timezone(&chrono::Local).time())
    }

    /// Deadline label used in push payloads
    pub fn due_label(&self) -> Option<String> {
        match (&self.end_time, self.deadline) {
            (Some(end_time), _) => Some(end_time.clone()),
            (None, Some(deadline)) => Some(deadline.to_chrono().to_rfc3339()),
            (None, None) => None,
        }
    }
}

/// Parse an "HH:MM" (or "HH:MM:SS") time of day
pub fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

impl IntoIndexes for TaskDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "userId": 1 },
                Some(IndexOptions::builder().name("user_id_index".to_string()).build()),
            ),
            // Notifier scan: pending, un-notified tasks per user
            (
                doc! { "userId": 1, "completed": 1, "notified": 1 },
                Some(
                    IndexOptions::builder()
                        .name("pending_notification_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for TaskDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

/// Partial update accepted by `PATCH /tasks/{id}`.
///
/// `userId`, `_id`, `completed` and `notified` are deliberately absent:
/// completion goes through the points ledger and `notified` belongs to the
/// deadline notifier.
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub text: Option<String>,
    pub priority: Option<Priority>,
    pub progress: Option<i32>,
    pub deadline: Option<chrono::DateTime<Utc>>,
    pub end_time: Option<String>,
    pub reminder_interval: Option<String>,
    pub is_read: Option<bool>,
    pub has_exceeded_time: Option<bool>,
}

impl TaskPatch {
    pub fn progress(progress: i32) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }

    pub fn deadline(deadline: Option<chrono::DateTime<Utc>>) -> Self {
        Self {
            deadline,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), PomodoroError> {
        if let Some(text) = &self.text {
            if text.trim().is_empty() {
                return Err(PomodoroError::Validation("Task name is required".into()));
            }
        }
        if let Some(progress) = self.progress {
            validate_progress(progress)?;
        }
        if let Some(end_time) = &self.end_time {
            validate_end_time(end_time)?;
        }
        Ok(())
    }

    /// `$set` document for MongoDB
    pub fn to_set_document(&self) -> Result<Document, PomodoroError> {
        let mut set = Document::new();
        if let Some(text) = &self.text {
            set.insert("text", text.trim());
        }
        if let Some(priority) = self.priority {
            let value = bson::to_bson(&priority)
                .map_err(|e| PomodoroError::Internal(format!("Failed to encode priority: {e}")))?;
            set.insert("priority", value);
        }
        if let Some(progress) = self.progress {
            set.insert("progress", progress);
        }
        if let Some(deadline) = self.deadline {
            set.insert("deadline", DateTime::from_chrono(deadline));
        }
        if let Some(end_time) = &self.end_time {
            set.insert("endTime", end_time.trim());
        }
        if let Some(reminder) = &self.reminder_interval {
            set.insert("reminderInterval", reminder);
        }
        if let Some(is_read) = self.is_read {
            set.insert("isRead", is_read);
        }
        if let Some(exceeded) = self.has_exceeded_time {
            set.insert("hasExceededTime", exceeded);
        }
        Ok(set)
    }

    /// Apply the patch to an in-memory document
    pub fn apply(&self, task: &mut TaskDoc) {
        if let Some(text) = &self.text {
            task.text = text.trim().to_string();
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(progress) = self.progress {
            task.progress = progress;
        }
        if let Some(deadline) = self.deadline {
            task.deadline = Some(DateTime::from_chrono(deadline));
        }
        if let Some(end_time) = &self.end_time {
            task.end_time = Some(end_time.trim().to_string());
        }
        if let Some(reminder) = &self.reminder_interval {
            task.reminder_interval = Some(reminder.clone());
        }
        if let Some(is_read) = self.is_read {
            task.is_read = is_read;
        }
        if let Some(exceeded) = self.has_exceeded_time {
            task.has_exceeded_time = exceeded;
        }
        task.metadata.touch();
    }
}

pub fn validate_progress(progress: i32) -> Result<(), PomodoroError> {
    if (0..=100).contains(&progress) {
        Ok(())
    } else {
        Err(PomodoroError::Validation(
            "Progress must be between 0 and 100".into(),
        ))
    }
}

pub fn validate_end_time(end_time: &str) -> Result<(), PomodoroError> {
    parse_time_of_day(end_time)
        .map(|_| ())
        .ok_or_else(|| PomodoroError::Validation("endTime must be formatted as HH:MM".into()))
}

/// Task as returned by the API
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub text: String,
    pub completed: bool,
    pub progress: i32,
    pub priority: Priority,
    pub deadline: Option<chrono::DateTime<Utc>>,
    pub end_time: Option<String>,
    pub notified: bool,
    pub is_read: bool,
    pub has_exceeded_time: bool,
    pub reminder_interval: Option<String>,
    pub created_at: Option<chrono::DateTime<Utc>>,
    pub updated_at: Option<chrono::DateTime<Utc>>,
}

impl From<&TaskDoc> for TaskView {
    fn from(task: &TaskDoc) -> Self {
        Self {
            id: task._id.map(|id| id.to_hex()).unwrap_or_default(),
            user_id: task.user_id.to_hex(),
            text: task.text.clone(),
            completed: task.completed,
            progress: task.progress,
            priority: task.priority,
            deadline: task.deadline.map(|d| d.to_chrono()),
            end_time: task.end_time.clone(),
            notified: task.notified,
            is_read: task.is_read,
            has_exceeded_time: task.has_exceeded_time,
            reminder_interval: task.reminder_interval.clone(),
            created_at: task.metadata.created_at_utc(),
            updated_at: task.metadata.updated_at_utc(),
        }
    }
}
