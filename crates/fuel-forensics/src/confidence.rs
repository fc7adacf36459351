//! Confidence scoring
//!
//! Additive 0-100 score from four independent signals: distance (30),
//! STFT sample count (30), O2 sample count (20) and STFT stability (20).

use crate::config::ForensicsThresholds;
use crate::types::Confidence;

/// Signals the score is computed from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceInputs {
    pub distance_km: f64,
    pub stft_samples: usize,
    pub o2_samples: usize,
    /// Population variance of the STFT samples; `None` without samples
    pub stft_variance: Option<f64>,
}

pub fn distance_points(distance_km: f64, t: &ForensicsThresholds) -> f64 {
    let distance = distance_km.max(0.0);
    let min = t.min_analysis_distance_km;
    let recommended = t.recommended_distance_km;

    if min > 0.0 && distance < min {
        15.0 * distance / min
    } else if distance < recommended && recommended > min {
        15.0 + 15.0 * (distance - min) / (recommended - min)
    } else {
        30.0
    }
}

pub fn sample_points(samples: usize, t: &ForensicsThresholds) -> f64 {
    let n = samples as f64;
    let min = t.min_samples as f64;

    if n < min / 2.0 {
        0.0
    } else if samples < t.min_samples {
        10.0
    } else if samples < t.high_confidence_samples {
        20.0
    } else {
        30.0
    }
}

pub fn o2_points(samples: usize, t: &ForensicsThresholds) -> f64 {
    if samples < t.min_o2_samples {
        0.0
    } else if samples < 2 * t.min_o2_samples {
        10.0
    } else {
        20.0
    }
}

pub fn variance_points(variance: Option<f64>, t: &ForensicsThresholds) -> f64 {
    match variance {
        None => 0.0,
        Some(v) if v < t.variance_stable => 20.0,
        Some(v) if v < t.variance_moderate => 10.0,
        Some(v) if v < t.variance_noisy => 5.0,
        Some(_) => 0.0,
    }
}

/// Total score, clamped to 0-100
pub fn score(inputs: &ConfidenceInputs, t: &ForensicsThresholds) -> u8 {
    let total = distance_points(inputs.distance_km, t)
        + sample_points(inputs.stft_samples, t)
        + o2_points(inputs.o2_samples, t)
        + variance_points(inputs.stft_variance, t);

    total.round().clamp(0.0, 100.0) as u8
}

pub fn assess(inputs: &ConfidenceInputs, t: &ForensicsThresholds) -> (u8, Confidence) {
    let score = score(inputs, t);
    (score, Confidence::from_score(score))
}
