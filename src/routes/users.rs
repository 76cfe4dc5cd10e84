//! User routes: signup, login, logout and the points leaderboard

use bson::DateTime;
use bytes::Bytes;
use hyper::{Response, StatusCode};
use serde::Deserialize;
use tracing::info;

use super::response::{json_response, message_only, parse_json, success, BoxBody, Envelope};
use crate::auth::{check_password_policy, hash_password, verify_password, AuthUser};
use crate::db::schemas::{UserDoc, UserView};
use crate::server::AppState;
use crate::types::{PomodoroError, Result};

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
    #[serde(default)]
    pub phone: String,
}

impl SignupRequest {
    pub fn validate(&self) -> Result<()> {
        let fields = [
            &self.name,
            &self.email,
            &self.password,
            &self.confirm_password,
            &self.phone,
        ];
        if fields.iter().any(|f| f.trim().is_empty()) {
            return Err(PomodoroError::Validation("All fields are required".into()));
        }
        if !self.email.contains('@') {
            return Err(PomodoroError::Validation("Invalid email format".into()));
        }
        if self.password != self.confirm_password {
            return Err(PomodoroError::Validation("Passwords do not match".into()));
        }
        check_password_policy(&self.password)?;
        let phone = self.phone.trim();
        if phone.len() != 10 || !phone.chars().all(|c| c.is_ascii_digit()) {
            return Err(PomodoroError::Validation(
                "Phone number must be 10 digits".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// POST /users/signup
pub async fn signup(state: &AppState, body: &Bytes) -> Result<Response<BoxBody>> {
    let request: SignupRequest = parse_json(body)?;
    request.validate()?;

    if state
        .store
        .find_user_by_email(&request.email)
        .await?
        .is_some()
    {
        return Err(PomodoroError::Validation(
            "User with this email already exists".into(),
        ));
    }

    let password_hash = hash_password(&request.password)?;
    let user = state
        .store
        .insert_user(UserDoc::new(
            request.name,
            request.email,
            password_hash,
            request.phone,
        ))
        .await?;
    let user_id = user
        ._id
        .ok_or_else(|| PomodoroError::Internal("Created user has no id".into()))?;

    let token = state.jwt.generate_token(&user_id.to_hex())?;
    info!(user_id = %user_id, "User registered");

    Ok(json_response(
        StatusCode::CREATED,
        &Envelope::ok(UserView::from(&user), "User registered successfully").with_token(token),
    ))
}

/// POST /users/login
pub async fn login(state: &AppState, body: &Bytes) -> Result<Response<BoxBody>> {
    let request: LoginRequest = parse_json(body)?;
    if request.email.trim().is_empty() || request.password.is_empty() {
        return Err(PomodoroError::Validation(
            "Email and password are required".into(),
        ));
    }

    let mut user = state
        .store
        .find_user_by_email(&request.email)
        .await?
        .ok_or_else(|| PomodoroError::NotFound("User not found".into()))?;

    let password_ok = match &user.password_hash {
        Some(hash) => verify_password(&request.password, hash)?,
        None => false,
    };
    if !password_ok {
        return Err(PomodoroError::Unauthorized("Invalid credentials".into()));
    }

    let user_id = user
        ._id
        .ok_or_else(|| PomodoroError::Internal("Stored user has no id".into()))?;
    let now = DateTime::now();
    state.store.record_login(&user_id, now).await?;
    user.last_login = Some(now);

    let token = state.jwt.generate_token(&user_id.to_hex())?;
    info!(user_id = %user_id, "User logged in");

    Ok(json_response(
        StatusCode::OK,
        &Envelope::ok(UserView::from(&user), "User logged in successfully").with_token(token),
    ))
}

/// POST /users/logout
///
/// Tokens are stateless; the client drops its copy.
pub fn logout(caller: &AuthUser) -> Response<BoxBody> {
    info!(user_id = %caller.user_id, "User logged out");
    message_only(StatusCode::OK, "User logged out successfully")
}

/// GET /users: everyone ranked by total points
pub async fn leaderboard(state: &AppState) -> Result<Response<BoxBody>> {
    let users = state.store.list_users_by_points().await?;
    let ranked: Vec<UserView> = users
        .iter()
        .enumerate()
        .map(|(index, user)| UserView {
            position: Some(index + 1),
            ..UserView::from(user)
        })
        .collect();

    Ok(success(StatusCode::OK, ranked, "Users fetched successfully"))
}
