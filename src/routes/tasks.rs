//! Task routes
//!
//! All handlers are scoped to the authenticated caller. A malformed task id
//! is reported the same way as a task owned by someone else: 404.

use bson::oid::ObjectId;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use hyper::{Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::response::{parse_json, success, BoxBody};
use crate::auth::AuthUser;
use crate::db::schemas::{Priority, TaskDoc, TaskPatch, TaskView};
use crate::gamification::CompletionBody;
use crate::server::AppState;
use crate::types::{PomodoroError, Result};

/// Minimum lead time for `PATCH /tasks/{id}/deadline`
pub const MIN_DEADLINE_LEAD_MINUTES: i64 = 5;

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub reminder_interval: Option<String>,
}

impl CreateTaskRequest {
    pub fn into_task(self, user_id: ObjectId) -> Result<TaskDoc> {
        let text = self
            .text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PomodoroError::Validation("Task name is required".into()))?;

        let patch = TaskPatch {
            priority: self.priority,
            deadline: self.deadline,
            end_time: self.end_time,
            reminder_interval: self.reminder_interval,
            ..TaskPatch::default()
        };
        patch.validate()?;

        let mut task = TaskDoc::new(user_id, text);
        patch.apply(&mut task);
        Ok(task)
    }
}

#[derive(Debug, Deserialize)]
struct ProgressRequest {
    progress: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct DeadlineRequest {
    deadline: Option<DateTime<Utc>>,
}

fn parse_task_id(raw: &str) -> Result<ObjectId> {
    ObjectId::parse_str(raw).map_err(|_| task_not_found())
}

fn task_not_found() -> PomodoroError {
    PomodoroError::NotFound("Pomodoro task not found".into())
}

/// Deadlines must leave at least [`MIN_DEADLINE_LEAD_MINUTES`]
pub fn check_deadline_lead(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
    if deadline < now + Duration::minutes(MIN_DEADLINE_LEAD_MINUTES) {
        return Err(PomodoroError::Validation(
            "Deadline must be at least 5 minutes in the future".into(),
        ));
    }
    Ok(())
}

/// POST /tasks
pub async fn create(state: &AppState, caller: &AuthUser, body: &Bytes) -> Result<Response<BoxBody>> {
    let request: CreateTaskRequest = parse_json(body)?;
    let task = state
        .store
        .insert_task(request.into_task(caller.user_id)?)
        .await?;

    info!(user_id = %caller.user_id, task_id = ?task._id, "Task created");
    Ok(success(
        StatusCode::CREATED,
        TaskView::from(&task),
        "Pomodoro task created successfully",
    ))
}

/// GET /tasks
pub async fn list(state: &AppState, caller: &AuthUser) -> Result<Response<BoxBody>> {
    let tasks = state.store.list_tasks(&caller.user_id).await?;
    let views: Vec<TaskView> = tasks.iter().map(TaskView::from).collect();
    Ok(success(
        StatusCode::OK,
        views,
        "Pomodoro tasks retrieved successfully",
    ))
}

/// GET /tasks/{id}
pub async fn get(state: &AppState, caller: &AuthUser, raw_id: &str) -> Result<Response<BoxBody>> {
    let task_id = parse_task_id(raw_id)?;
    let task = state
        .store
        .find_task(&caller.user_id, &task_id)
        .await?
        .ok_or_else(task_not_found)?;
    Ok(success(
        StatusCode::OK,
        TaskView::from(&task),
        "Pomodoro task retrieved successfully",
    ))
}

/// PATCH|PUT /tasks/{id}
pub async fn update(
    state: &AppState,
    caller: &AuthUser,
    raw_id: &str,
    body: &Bytes,
) -> Result<Response<BoxBody>> {
    let task_id = parse_task_id(raw_id)?;
    let patch: TaskPatch = parse_json(body)?;
    patch.validate()?;
    apply_patch(state, caller, &task_id, &patch, "Pomodoro task updated successfully").await
}

/// DELETE /tasks/{id}
pub async fn delete(state: &AppState, caller: &AuthUser, raw_id: &str) -> Result<Response<BoxBody>> {
    let task_id = parse_task_id(raw_id)?;
    if !state.store.delete_task(&caller.user_id, &task_id).await? {
        return Err(task_not_found());
    }
    info!(user_id = %caller.user_id, task_id = %task_id, "Task deleted");
    Ok(success(
        StatusCode::OK,
        json!({}),
        "Pomodoro task deleted successfully",
    ))
}

/// PATCH /tasks/{id}/progress
pub async fn update_progress(
    state: &AppState,
    caller: &AuthUser,
    raw_id: &str,
    body: &Bytes,
) -> Result<Response<BoxBody>> {
    let task_id = parse_task_id(raw_id)?;
    let request: ProgressRequest = parse_json(body)?;
    let progress = request.progress.ok_or_else(|| {
        PomodoroError::Validation("Progress must be between 0 and 100".into())
    })?;
    let patch = TaskPatch::progress(progress);
    patch.validate()?;
    apply_patch(state, caller, &task_id, &patch, "Progress updated successfully").await
}

/// PATCH /tasks/{id}/complete
pub async fn complete(state: &AppState, caller: &AuthUser, raw_id: &str) -> Result<Response<BoxBody>> {
    let task_id = parse_task_id(raw_id)?;
    let report = state.ledger.complete_task(&caller.user_id, &task_id).await?;
    Ok(success(
        StatusCode::OK,
        CompletionBody::from(&report),
        "Pomodoro marked as completed",
    ))
}

/// PATCH /tasks/{id}/deadline
pub async fn update_deadline(
    state: &AppState,
    caller: &AuthUser,
    raw_id: &str,
    body: &Bytes,
) -> Result<Response<BoxBody>> {
    let task_id = parse_task_id(raw_id)?;
    let request: DeadlineRequest = parse_json(body)?;
    let deadline = request
        .deadline
        .ok_or_else(|| PomodoroError::Validation("Deadline is required".into()))?;
    check_deadline_lead(deadline, Utc::now())?;

    let patch = TaskPatch::deadline(Some(deadline));
    apply_patch(state, caller, &task_id, &patch, "Deadline updated successfully").await
}

async fn apply_patch(
    state: &AppState,
    caller: &AuthUser,
    task_id: &ObjectId,
    patch: &TaskPatch,
    message: &str,
) -> Result<Response<BoxBody>> {
    let task = state
        .store
        .patch_task(&caller.user_id, task_id, patch)
        .await?
        .ok_or_else(task_not_found)?;
    Ok(success(StatusCode::OK, TaskView::from(&task), message))
}
