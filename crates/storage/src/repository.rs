//! Repository Implementation

use crate::{RefuelRecord, StorageError};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

/// Where finalized refuels go. Callers do not retry failures.
pub trait RefuelStore: Send + Sync {
    fn save_refuel(&self, record: RefuelRecord) -> Result<(), StorageError>;
}

/// In-memory refuel history with a retention limit
pub struct Repository {
    refuels: Mutex<VecDeque<RefuelRecord>>,
    max_records: usize,
}

impl Repository {
    pub fn new() -> Self {
        Self::with_capacity(1_000)
    }

    /// Keep at most `max_records`, dropping the oldest
    pub fn with_capacity(max_records: usize) -> Self {
        info!("Creating in-memory refuel repository (max {} records)", max_records);
        Self {
            refuels: Mutex::new(VecDeque::new()),
            max_records: max_records.max(1),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, VecDeque<RefuelRecord>>, StorageError> {
        self.refuels
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))
    }

    pub fn insert(&self, record: RefuelRecord) -> Result<(), StorageError> {
        let mut refuels = self.lock()?;

        if refuels.iter().any(|r| r.id == record.id) {
            return Err(StorageError::DatabaseError(format!(
                "Duplicate refuel id {}",
                record.id
            )));
        }

        while refuels.len() >= self.max_records {
            refuels.pop_front();
        }

        debug!("Stored refuel {} ({})", record.id, record.diagnosis.state);
        refuels.push_back(record);
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<RefuelRecord, StorageError> {
        self.lock()?
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    /// Most recent first
    pub fn recent(&self, limit: usize) -> Result<Vec<RefuelRecord>, StorageError> {
        Ok(self.lock()?.iter().rev().take(limit).cloned().collect())
    }

    /// Refuels for one vehicle, most recent first
    pub fn for_vin(&self, vin: &str) -> Result<Vec<RefuelRecord>, StorageError> {
        Ok(self
            .lock()?
            .iter()
            .rev()
            .filter(|r| r.vin.as_deref() == Some(vin))
            .cloned()
            .collect())
    }

    pub fn count(&self) -> usize {
        self.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// The whole history as a JSON array, oldest first
    pub fn export_json(&self) -> Result<String, StorageError> {
        let refuels = self.lock()?;
        let records: Vec<&RefuelRecord> = refuels.iter().collect();
        serde_json::to_string_pretty(&records)
            .map_err(|e| StorageError::SerializationError(e.to_string()))
    }
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}

impl RefuelStore for Repository {
    fn save_refuel(&self, record: RefuelRecord) -> Result<(), StorageError> {
        self.insert(record)
    }
}
