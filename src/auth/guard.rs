//! Bearer-token guard for protected routes

use bson::oid::ObjectId;
use hyper::header::AUTHORIZATION;
use hyper::HeaderMap;
use tracing::debug;

use super::jwt::{extract_token_from_header, JwtValidator};
use crate::db::schemas::UserDoc;
use crate::store::Store;
use crate::types::{PomodoroError, Result};

/// Caller resolved from a valid access token
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: ObjectId,
    pub user: UserDoc,
}

/// Resolve the caller from `Authorization: Bearer <token>`.
pub async fn authenticate(
    headers: &HeaderMap,
    jwt: &JwtValidator,
    store: &dyn Store,
) -> Result<AuthUser> {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let token = extract_token_from_header(header).ok_or_else(|| {
        PomodoroError::Unauthorized("Unauthorized request - No token provided".into())
    })?;

    let user_id = user_id_from_token(jwt, token)?;

    let user = store.find_user(&user_id).await?.ok_or_else(|| {
        debug!(user_id = %user_id, "Token refers to a missing user");
        PomodoroError::Unauthorized("Invalid Access Token - User not found".into())
    })?;

    Ok(AuthUser { user_id, user })
}

/// Verify a token and parse its `userId` claim
pub fn user_id_from_token(jwt: &JwtValidator, token: &str) -> Result<ObjectId> {
    let result = jwt.verify_token(token);
    if result.expired {
        return Err(PomodoroError::TokenExpired);
    }
    let claims = result
        .claims
        .filter(|_| result.valid)
        .ok_or_else(|| PomodoroError::Unauthorized("Invalid access token".into()))?;

    ObjectId::parse_str(&claims.user_id)
        .map_err(|_| PomodoroError::Unauthorized("Invalid access token".into()))
}
