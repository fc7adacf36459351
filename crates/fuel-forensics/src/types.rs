//! Forensics data model

use serde::{Deserialize, Serialize};
use std::fmt;

/// What the user declared about the refuel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FuelChangeContext {
    /// Same fuel as before
    SameFuel,
    /// Gasoline to ethanol
    GasToEthanol,
    /// Ethanol to gasoline
    EthanolToGas,
    #[default]
    Unknown,
}

impl FuelChangeContext {
    /// Whether the ECU is expected to re-learn the mixture
    pub fn is_fuel_switch(&self) -> bool {
        matches!(self, FuelChangeContext::GasToEthanol | FuelChangeContext::EthanolToGas)
    }

    /// Expected trim drift. Ethanol carries less energy per liter, so
    /// switching to it makes the ECU add fuel.
    pub fn expected_direction(&self) -> Option<TrimDirection> {
        match self {
            FuelChangeContext::GasToEthanol => Some(TrimDirection::Positive),
            FuelChangeContext::EthanolToGas => Some(TrimDirection::Negative),
            FuelChangeContext::SameFuel | FuelChangeContext::Unknown => None,
        }
    }
}

impl fmt::Display for FuelChangeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FuelChangeContext::SameFuel => "same fuel",
            FuelChangeContext::GasToEthanol => "gasoline to ethanol",
            FuelChangeContext::EthanolToGas => "ethanol to gasoline",
            FuelChangeContext::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Terminal classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FuelState {
    /// Trims within normal bounds
    Stable,
    /// Normal ECU re-learning after a fuel switch
    Adapting,
    /// Something is off but the evidence is not conclusive
    Suspicious,
    /// Fuel quality problem (O2 sensor still switching)
    Contaminated,
    /// Sensor, vacuum or injector fault (O2 sensor frozen)
    Mechanical,
}

impl fmt::Display for FuelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FuelState::Stable => "stable",
            FuelState::Adapting => "adapting",
            FuelState::Suspicious => "suspicious",
            FuelState::Contaminated => "contaminated",
            FuelState::Mechanical => "mechanical",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Map a 0-100 score
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=39 => Confidence::Low,
            40..=69 => Confidence::Medium,
            _ => Confidence::High,
        }
    }
}

/// Sign of a trim correction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrimDirection {
    /// ECU adding fuel
    Positive,
    /// ECU removing fuel
    Negative,
    Neutral,
}

impl TrimDirection {
    /// Direction of `value`, `Neutral` inside `±dead_band`
    pub fn of(value: f64, dead_band: f64) -> Self {
        if value > dead_band {
            TrimDirection::Positive
        } else if value < -dead_band {
            TrimDirection::Negative
        } else {
            TrimDirection::Neutral
        }
    }
}

/// Recent STFT magnitude trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Trend {
    Improving,
    #[default]
    Stable,
    Worsening,
}

/// Bias of a frozen O2 sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum O2Bias {
    Lean,
    Rich,
}

/// One narrowband O2 sensor sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct O2Reading {
    pub timestamp_ms: u64,
    pub voltage: f64,
    pub is_lean: bool,
    pub is_rich: bool,
}

impl O2Reading {
    /// Classify against `midpoint` with a relative `margin`: lean below
    /// `midpoint * (1 - margin)`, rich above `midpoint * (1 + margin)`.
    pub fn classify(timestamp_ms: u64, voltage: f64, midpoint: f64, margin: f64) -> Self {
        Self {
            timestamp_ms,
            voltage,
            is_lean: voltage < midpoint * (1.0 - margin),
            is_rich: voltage > midpoint * (1.0 + margin),
        }
    }

    pub fn bias(&self) -> Option<O2Bias> {
        if self.is_lean {
            Some(O2Bias::Lean)
        } else if self.is_rich {
            Some(O2Bias::Rich)
        } else {
            None
        }
    }
}

/// Everything one monitoring session accumulates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FuelMonitoringData {
    pub stft_samples: Vec<f64>,
    /// LTFT before the new fuel reached the engine
    pub ltft_initial: Option<f64>,
    pub ltft_current: Option<f64>,
    /// `ltft_current - ltft_initial`
    pub ltft_delta: f64,
    pub o2_readings: Vec<O2Reading>,
    pub distance_monitored_km: f64,
    pub monitoring_started_at_ms: u64,
}

impl FuelMonitoringData {
    pub fn new(ltft_initial: Option<f64>, started_at_ms: u64) -> Self {
        Self {
            ltft_initial,
            monitoring_started_at_ms: started_at_ms,
            ..Default::default()
        }
    }

    pub fn push_stft(&mut self, value: f64) {
        self.stft_samples.push(value);
    }

    /// Record an LTFT read. The first read becomes the baseline when none
    /// was captured before monitoring.
    pub fn record_ltft(&mut self, value: f64) {
        let initial = *self.ltft_initial.get_or_insert(value);
        self.ltft_current = Some(value);
        self.ltft_delta = value - initial;
    }

    pub fn push_o2(&mut self, reading: O2Reading) {
        self.o2_readings.push(reading);
    }

    pub fn add_distance(&mut self, km: f64) {
        self.distance_monitored_km += km;
    }

    pub fn sample_count(&self) -> usize {
        self.stft_samples.len()
    }
}

/// Which thresholds were crossed and why
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// `|rolling STFT| + |LTFT|`
    pub total_trim_abs: f64,
    pub warning_exceeded: bool,
    pub critical_exceeded: bool,
    /// LTFT still carries an earlier fuel while STFT is back near zero
    pub ltft_memory_warning: bool,
    pub o2_frozen: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub o2_frozen_bias: Option<O2Bias>,
    /// Longest consistently lean or rich run
    pub o2_frozen_secs: f64,
    /// Too few O2 samples to tell fuel from hardware
    pub insufficient_o2: bool,
    /// Fewer STFT samples than the warm-up
    pub insufficient_samples: bool,
    /// LTFT moved by at least the movement threshold
    pub ltft_moved: bool,
    /// STFT beyond the fuel-switch absolute maximum
    pub flex_max_exceeded: bool,
}

/// Fuel-switch adaptation progress
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptationProgress {
    /// 0-100
    pub progress_pct: f64,
    pub complete: bool,
    pub expected_direction: TrimDirection,
    pub observed_direction: TrimDirection,
}

/// Engine output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuelDiagnosticResult {
    pub state: FuelState,
    pub confidence: Confidence,
    /// 0-100
    pub confidence_score: u8,
    /// Rolling STFT average
    pub stft_average: f64,
    pub ltft_delta: f64,
    pub o2_average: Option<f64>,
    pub distance_km: f64,
    pub context: FuelChangeContext,
    pub sample_count: usize,
    pub trend: Trend,
    pub evidence: Evidence,
    pub recommendation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adaptation: Option<AdaptationProgress>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_o2_classification_margins() {
        // lean < 0.405, rich > 0.495
        assert!(O2Reading::classify(0, 0.40, 0.45, 0.1).is_lean);
        assert_eq!(O2Reading::classify(0, 0.45, 0.45, 0.1).bias(), None);
        assert_eq!(O2Reading::classify(0, 0.5, 0.45, 0.1).bias(), Some(O2Bias::Rich));
    }

    #[test]
    fn test_first_ltft_becomes_baseline() {
        let mut data = FuelMonitoringData::new(None, 0);
        data.record_ltft(3.1);
        data.record_ltft(8.6);
        assert_eq!(data.ltft_initial, Some(3.1));
        assert!((data.ltft_delta - 5.5).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_bands() {
        assert_eq!(Confidence::from_score(39), Confidence::Low);
        assert_eq!(Confidence::from_score(40), Confidence::Medium);
        assert_eq!(Confidence::from_score(70), Confidence::High);
    }

    #[test]
    fn test_expected_direction() {
        assert_eq!(
            FuelChangeContext::GasToEthanol.expected_direction(),
            Some(TrimDirection::Positive)
        );
        assert_eq!(FuelChangeContext::SameFuel.expected_direction(), None);
    }
}
