//! Storage Layer
//!
//! Persistence collaborator for finalized refuel diagnoses, with an
//! in-memory repository implementation.

mod record;
mod repository;

pub use record::RefuelRecord;
pub use repository::{RefuelStore, Repository};

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Record not found")]
    NotFound,
    #[error("Serialization error: {0}")]
    SerializationError(String),
}
