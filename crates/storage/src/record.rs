//! Refuel record

use chrono::{DateTime, Utc};
use fuel_forensics::{FuelChangeContext, FuelDiagnosticResult, FuelMonitoringData};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One completed real refuel: declared inputs, raw monitoring data and
/// the final diagnosis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefuelRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub context: FuelChangeContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vin: Option<String>,
    /// Tank level before refueling (%)
    pub fuel_level_before: Option<f64>,
    /// Tank level after refueling (%)
    pub fuel_level_after: Option<f64>,
    pub price_per_liter: Option<f64>,
    pub liters: Option<f64>,
    pub distance_km: f64,
    pub data: FuelMonitoringData,
    pub diagnosis: FuelDiagnosticResult,
}

impl RefuelRecord {
    /// Total paid, when both price and volume are known
    pub fn total_cost(&self) -> Option<f64> {
        Some(self.price_per_liter? * self.liters?)
    }
}
