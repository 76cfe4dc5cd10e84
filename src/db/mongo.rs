//! MongoDB client and collection wrapper

use bson::{doc, oid::ObjectId, DateTime, Document};
use futures_util::StreamExt;
use mongodb::{
    error::{ErrorKind, WriteFailure, TRANSIENT_TRANSACTION_ERROR},
    options::{FindOptions, IndexOptions, ReturnDocument, UpdateModifications},
    results::UpdateResult,
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{error, info};

use crate::db::schemas::Metadata;
use crate::types::PomodoroError;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, PomodoroError> {
        info!("Connecting to MongoDB at {}", uri);

        // Fail fast instead of hanging on an unreachable server
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}/?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri.trim_end_matches('/'))
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| PomodoroError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| PomodoroError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, PomodoroError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

    /// Get the raw MongoDB client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the database name
    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Typed MongoDB collection with automatic indexing and soft deletes
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
{
    /// Create a new collection and apply indexes
    pub async fn new(
        client: &Client,
        db_name: &str,
        collection_name: &str,
    ) -> Result<Self, PomodoroError> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    /// Apply schema-defined indexes
    async fn apply_indexes(&self) -> Result<(), PomodoroError> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| PomodoroError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Insert a document, setting metadata timestamps
    pub async fn insert_one(&self, mut item: T) -> Result<ObjectId, PomodoroError> {
        let metadata = item.mut_metadata();
        metadata.is_deleted = false;
        metadata.created_at = Some(DateTime::now());
        metadata.updated_at = Some(DateTime::now());

        let result = self.inner.insert_one(item).await.map_err(|e| {
            if is_duplicate_key(&e) {
                PomodoroError::Conflict(format!("Duplicate key: {}", e))
            } else {
                PomodoroError::Database(format!("Insert failed: {}", e))
            }
        })?;

        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| PomodoroError::Database("Failed to get inserted ID".into()))
    }

    /// Find one live document by filter
    pub async fn find_one(&self, filter: Document) -> Result<Option<T>, PomodoroError> {
        self.inner
            .find_one(live(filter))
            .await
            .map_err(|e| PomodoroError::Database(format!("Find failed: {}", e)))
    }

    /// Find many live documents by filter
    pub async fn find_many(
        &self,
        filter: Document,
        sort: Option<Document>,
    ) -> Result<Vec<T>, PomodoroError> {
        let options = FindOptions::builder().sort(sort).build();

        let cursor = self
            .inner
            .find(live(filter))
            .with_options(options)
            .await
            .map_err(|e| PomodoroError::Database(format!("Find failed: {}", e)))?;

        let results: Vec<T> = cursor
            .filter_map(|doc| async {
                match doc {
                    Ok(d) => Some(d),
                    Err(e) => {
                        error!("Error reading document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(results)
    }

    /// Update one live document and return it after the update
    pub async fn find_one_and_set(
        &self,
        filter: Document,
        mut set: Document,
    ) -> Result<Option<T>, PomodoroError> {
        set.insert("metadata.updatedAt", DateTime::now());

        self.inner
            .find_one_and_update(live(filter), doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| PomodoroError::Database(format!("Update failed: {}", e)))
    }

    /// Update one document
    pub async fn update_one(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<UpdateResult, PomodoroError> {
        self.inner
            .update_one(filter, update.into())
            .await
            .map_err(|e| PomodoroError::Database(format!("Update failed: {}", e)))
    }

    /// Soft delete a document
    pub async fn soft_delete(&self, filter: Document) -> Result<UpdateResult, PomodoroError> {
        let update = doc! {
            "$set": {
                "metadata.isDeleted": true,
                "metadata.deletedAt": DateTime::now(),
                "metadata.updatedAt": DateTime::now(),
            }
        };

        self.update_one(live(filter), update).await
    }

    /// Get the underlying collection for advanced operations
    pub fn inner(&self) -> &Collection<T> {
        &self.inner
    }
}

/// Restrict a filter to documents that have not been soft-deleted
pub fn live(mut filter: Document) -> Document {
    filter.insert("metadata.isDeleted", doc! { "$ne": true });
    filter
}

/// Whether a driver error is a unique index violation (E11000)
pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    let message = err.to_string();
    message.contains("E11000") || message.contains("duplicate key")
}

/// Server code for a write conflict between concurrent transactions
pub const WRITE_CONFLICT_CODE: i32 = 112;

/// Whether a driver error means a concurrent transaction touched the same
/// document. Such errors carry the `TransientTransactionError` label or
/// code 112.
pub fn is_write_conflict(err: &mongodb::error::Error) -> bool {
    conflict_signalled(err.contains_label(TRANSIENT_TRANSACTION_ERROR), server_code(err))
}

fn server_code(err: &mongodb::error::Error) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        ErrorKind::Write(WriteFailure::WriteError(write)) => Some(write.code),
        _ => None,
    }
}

fn conflict_signalled(transient: bool, code: Option<i32>) -> bool {
    transient || code == Some(WRITE_CONFLICT_CODE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_filter_excludes_deleted() {
        let filter = live(doc! { "userId": "abc" });
        assert_eq!(filter.get_str("userId").unwrap(), "abc");
        assert_eq!(
            filter.get_document("metadata.isDeleted").unwrap(),
            &doc! { "$ne": true }
        );
    }

    #[test]
    fn test_write_conflict_signals() {
        assert!(conflict_signalled(true, None));
        assert!(conflict_signalled(false, Some(WRITE_CONFLICT_CODE)));
        assert!(conflict_signalled(true, Some(11000)));
        assert!(!conflict_signalled(false, Some(11000)));
        assert!(!conflict_signalled(false, None));
    }
}
