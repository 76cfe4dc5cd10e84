//! Common metadata for all documents
//!
//! Tracks creation, update, and soft deletion timestamps.

use bson::DateTime;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Common metadata for all documents
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Whether this document has been soft-deleted
    #[serde(default)]
    pub is_deleted: bool,

    /// When the document was soft-deleted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime>,

    /// When the document was last updated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,

    /// When the document was created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
}

impl Metadata {
    /// Create new metadata with current timestamp
    pub fn new() -> Self {
        Self {
            is_deleted: false,
            deleted_at: None,
            updated_at: Some(DateTime::now()),
            created_at: Some(DateTime::now()),
        }
    }

    /// Bump `updated_at` to now
    pub fn touch(&mut self) {
        self.updated_at = Some(DateTime::now());
    }

    /// Mark as soft-deleted
    pub fn mark_deleted(&mut self) {
        let now = DateTime::now();
        self.is_deleted = true;
        self.deleted_at = Some(now);
        self.updated_at = Some(now);
    }

    pub fn created_at_utc(&self) -> Option<chrono::DateTime<Utc>> {
        self.created_at.map(|d| d.to_chrono())
    }

    pub fn updated_at_utc(&self) -> Option<chrono::DateTime<Utc>> {
        self.updated_at.map(|d| d.to_chrono())
    }
}
