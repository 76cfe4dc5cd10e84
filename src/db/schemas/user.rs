//! User document schema

use bson::{doc, oid::ObjectId, DateTime, Document};
use chrono::Utc;
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for users
pub const USER_COLLECTION: &str = "users";

/// Points every new account starts with
pub const STARTING_POSITIVE_POINTS: i64 = 10;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    Email,
    Google,
}

/// User document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserDoc {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub name: String,

    /// Lower-cased, unique
    pub email: String,

    #[serde(default)]
    pub auth_method: AuthMethod,

    /// Argon2 PHC hash; absent for federated sign-in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    #[serde(default = "default_positive_points")]
    pub positive_points: i64,

    #[serde(default)]
    pub negative_points: i64,

    /// `max(0, positive - negative)`, recomputed on every save
    #[serde(default = "default_positive_points")]
    pub total_points: i64,

    #[serde(default)]
    pub streak: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime>,

    #[serde(default)]
    pub is_verified: bool,
}

fn default_positive_points() -> i64 {
    STARTING_POSITIVE_POINTS
}

impl UserDoc {
    /// Create a new email/password user
    pub fn new(name: String, email: String, password_hash: String, phone: String) -> Self {
        let mut user = Self {
            _id: None,
            metadata: Metadata::new(),
            name: name.trim().to_string(),
            email: email.trim().to_lowercase(),
            auth_method: AuthMethod::Email,
            password_hash: Some(password_hash),
            phone: Some(phone.trim().to_string()),
            positive_points: STARTING_POSITIVE_POINTS,
            negative_points: 0,
            total_points: 0,
            streak: 0,
            last_login: Some(DateTime::now()),
            is_verified: false,
        };
        user.recompute_total_points();
        user
    }

    /// Must run before every save
    pub fn recompute_total_points(&mut self) {
        self.total_points = (self.positive_points - self.negative_points).max(0);
    }
}

impl IntoIndexes for UserDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "email": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("email_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "phone": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .sparse(true)
                        .name("phone_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "totalPoints": -1 },
                Some(
                    IndexOptions::builder()
                        .name("total_points_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for UserDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

/// User as returned by the API (never includes the password hash)
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    pub auth_method: AuthMethod,
    pub phone: Option<String>,
    pub positive_points: i64,
    pub negative_points: i64,
    pub total_points: i64,
    pub streak: i64,
    pub last_login: Option<chrono::DateTime<Utc>>,
    pub is_verified: bool,
    /// 1-based leaderboard rank, only set on listings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

impl From<&UserDoc> for UserView {
    fn from(user: &UserDoc) -> Self {
        Self {
            id: user._id.map(|id| id.to_hex()).unwrap_or_default(),
            name: user.name.clone(),
            email: user.email.clone(),
            auth_method: user.auth_method,
            phone: user.phone.clone(),
            positive_points: user.positive_points,
            negative_points: user.negative_points,
            total_points: user.total_points,
            streak: user.streak,
            last_login: user.last_login.map(|d| d.to_chrono()),
            is_verified: user.is_verified,
            position: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_normalizes_and_totals() {
        let user = UserDoc::new(
            " Ada ".into(),
            " Ada@Example.COM ".into(),
            "$argon2id$hash".into(),
            "0123456789".into(),
        );
        assert_eq!(user.name, "Ada");
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.total_points, STARTING_POSITIVE_POINTS);
    }

    #[test]
    fn test_total_points_never_negative() {
        let mut user = UserDoc::new("a".into(), "a@b.c".into(), "h".into(), "0123456789".into());
        user.negative_points = 50;
        user.recompute_total_points();
        assert_eq!(user.total_points, 0);
    }

    #[test]
    fn test_view_hides_password() {
        let user = UserDoc::new("a".into(), "a@b.c".into(), "secret-hash".into(), "0123456789".into());
        let json = serde_json::to_string(&UserView::from(&user)).unwrap();
        assert!(!json.contains("secret-hash"));
        assert!(!json.contains("position"));
    }
}
