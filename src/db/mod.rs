//! Database layer
//!
//! MongoDB client wrapper plus the document schemas for users, tasks and
//! point ledgers.

pub mod mongo;
pub mod schemas;

pub use mongo::{IntoIndexes, MongoClient, MongoCollection, MutMetadata};
pub use schemas::{LedgerDoc, Metadata, Priority, TaskDoc, TaskPatch, UserDoc};
