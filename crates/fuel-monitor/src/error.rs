//! Fuel monitor errors

use thiserror::Error;

use crate::monitor::RefuelMode;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    /// The vehicle does not report STFT/LTFT
    #[error("Vehicle does not report fuel trims; fuel quality test unavailable")]
    TrimNotSupported,

    #[error("Cannot {action} while {mode}")]
    InvalidTransition { action: &'static str, mode: RefuelMode },

    #[error("No refuel session active")]
    NotActive,
}
