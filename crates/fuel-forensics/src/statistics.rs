//! Trim statistics

use crate::types::Trend;

/// Summary of a trim series
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrimStatistics {
    pub mean: f64,
    /// Population variance
    pub variance: f64,
    pub min: f64,
    pub max: f64,
}

impl TrimStatistics {
    pub fn compute(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let min = values.iter().cloned().fold(f64::MAX, f64::min);
        let max = values.iter().cloned().fold(f64::MIN, f64::max);

        let variance = values
            .iter()
            .map(|v| {
                let d = v - mean;
                d * d
            })
            .sum::<f64>()
            / n;

        Self {
            mean,
            variance,
            min,
            max,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn mean_abs(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|v| v.abs()).sum::<f64>() / values.len() as f64
}

/// Average of the last `window` samples after the first `warmup` are
/// discarded. With `warmup` or fewer samples, all of them are averaged.
pub fn rolling_average(samples: &[f64], warmup: usize, window: usize) -> f64 {
    if samples.len() <= warmup {
        return mean(samples);
    }

    let settled = &samples[warmup..];
    let start = settled.len().saturating_sub(window.max(1));
    mean(&settled[start..])
}

/// Compare mean |STFT| of the two halves of the last ten samples
pub fn trend(samples: &[f64], margin: f64) -> Trend {
    let recent = &samples[samples.len().saturating_sub(10)..];
    if recent.len() < 2 {
        return Trend::Stable;
    }

    let (older, newer) = recent.split_at(recent.len() / 2);
    let before = mean_abs(older);
    let after = mean_abs(newer);

    if after < before - margin {
        Trend::Improving
    } else if after > before + margin {
        Trend::Worsening
    } else {
        Trend::Stable
    }
}
