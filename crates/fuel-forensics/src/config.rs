//! Forensics thresholds
//!
//! The same-fuel memory and critical thresholds are hand-tuned and may
//! not generalize to every engine; everything here is configurable.

use serde::{Deserialize, Serialize};

/// Thresholds used by [`evaluate`](crate::evaluate). Trims in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForensicsThresholds {
    /// Early STFT samples discarded while the ECU stabilizes
    pub warmup_samples: usize,
    /// Samples in the rolling STFT average
    pub rolling_window: usize,
    /// STFT considered back to normal
    pub stft_near_zero_pct: f64,

    /// Same-fuel total trim for `Suspicious`
    pub warning_total_pct: f64,
    /// Same-fuel total trim that calls for the O2 check
    pub critical_total_pct: f64,
    /// LTFT still holding an earlier fuel
    pub ltft_memory_pct: f64,
    /// LTFT change that counts as adaptation
    pub ltft_movement_pct: f64,

    /// STFT expected right after a fuel switch
    pub flex_expected_stft_pct: f64,
    /// STFT too large even for a fuel switch
    pub flex_max_stft_pct: f64,
    /// LTFT shift of a complete fuel switch
    pub flex_expected_ltft_shift_pct: f64,
    /// STFT tolerance when the context is unknown
    pub unknown_tolerance_pct: f64,

    pub min_o2_samples: usize,
    /// Lean or rich run that counts as a frozen sensor (seconds)
    pub o2_frozen_secs: f64,
    /// Stoichiometric switching point (volts)
    pub o2_midpoint_v: f64,
    /// Relative dead band around the midpoint
    pub o2_margin: f64,

    pub min_analysis_distance_km: f64,
    pub recommended_distance_km: f64,
    pub min_samples: usize,
    pub high_confidence_samples: usize,

    /// STFT variance bands for the stability score
    pub variance_stable: f64,
    pub variance_moderate: f64,
    pub variance_noisy: f64,

    pub trend_margin_pct: f64,
}

impl Default for ForensicsThresholds {
    fn default() -> Self {
        Self {
            warmup_samples: 5,
            rolling_window: 20,
            stft_near_zero_pct: 5.0,
            warning_total_pct: 10.0,
            critical_total_pct: 15.0,
            ltft_memory_pct: 15.0,
            ltft_movement_pct: 5.0,
            flex_expected_stft_pct: 25.0,
            flex_max_stft_pct: 40.0,
            flex_expected_ltft_shift_pct: 20.0,
            unknown_tolerance_pct: 10.0,
            min_o2_samples: 10,
            o2_frozen_secs: 10.0,
            o2_midpoint_v: 0.45,
            o2_margin: 0.1,
            min_analysis_distance_km: 5.0,
            recommended_distance_km: 20.0,
            min_samples: 20,
            high_confidence_samples: 60,
            variance_stable: 4.0,
            variance_moderate: 16.0,
            variance_noisy: 36.0,
            trend_margin_pct: 1.0,
        }
    }
}
