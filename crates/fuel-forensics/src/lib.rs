//! Fuel Quality Forensics
//!
//! Classifies fuel-trim behavior after a refuel into a [`FuelState`] with
//! a confidence score, telling sensor noise, normal flex-fuel adaptation,
//! contamination and mechanical faults apart. No I/O.

mod confidence;
mod config;
mod engine;
mod o2;
mod recommendation;
mod statistics;
mod types;

pub use confidence::ConfidenceInputs;
pub use config::ForensicsThresholds;
pub use engine::evaluate;
pub use o2::{analyze as analyze_o2, O2Analysis};
pub use statistics::{rolling_average, trend, TrimStatistics};
pub use types::{
    AdaptationProgress, Confidence, Evidence, FuelChangeContext, FuelDiagnosticResult,
    FuelMonitoringData, FuelState, O2Bias, O2Reading, Trend, TrimDirection,
};
