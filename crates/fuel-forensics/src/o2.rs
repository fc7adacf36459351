//! O2 sensor analysis
//!
//! A healthy narrowband sensor keeps switching across the midpoint. One
//! that stays lean or rich for longer than the frozen threshold (by real
//! elapsed time, not sample count) points at hardware, not fuel.

use crate::types::{O2Bias, O2Reading};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct O2Analysis {
    pub frozen: bool,
    /// Bias of the longest run
    pub bias: Option<O2Bias>,
    pub longest_run_secs: f64,
    pub average_voltage: Option<f64>,
    pub sample_count: usize,
}

/// Longest continuous lean or rich run in seconds, with its bias
fn longest_run(readings: &[O2Reading]) -> (f64, Option<O2Bias>) {
    let mut best = (0.0, None);
    let mut run: Option<(O2Bias, u64)> = None;

    for reading in readings {
        run = match (run, reading.bias()) {
            (Some((bias, started)), Some(current)) if bias == current => Some((bias, started)),
            (_, Some(current)) => Some((current, reading.timestamp_ms)),
            (_, None) => None,
        };

        if let Some((bias, started)) = run {
            let secs = reading.timestamp_ms.saturating_sub(started) as f64 / 1000.0;
            if secs > best.0 {
                best = (secs, Some(bias));
            }
        }
    }

    best
}

pub fn analyze(readings: &[O2Reading], frozen_secs: f64) -> O2Analysis {
    let (longest_run_secs, bias) = longest_run(readings);

    let average_voltage = if readings.is_empty() {
        None
    } else {
        Some(readings.iter().map(|r| r.voltage).sum::<f64>() / readings.len() as f64)
    };

    O2Analysis {
        frozen: longest_run_secs >= frozen_secs,
        bias,
        longest_run_secs,
        average_voltage,
        sample_count: readings.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(voltages: &[f64], step_ms: u64) -> Vec<O2Reading> {
        voltages
            .iter()
            .enumerate()
            .map(|(i, v)| O2Reading::classify(i as u64 * step_ms, *v, 0.45, 0.1))
            .collect()
    }

    #[test]
    fn test_switching_sensor_is_not_frozen() {
        let voltages: Vec<f64> = (0..40).map(|i| if i % 2 == 0 { 0.15 } else { 0.8 }).collect();
        let analysis = analyze(&series(&voltages, 500), 10.0);
        assert!(!analysis.frozen);
        assert!(analysis.longest_run_secs < 1.0);
        assert_eq!(analysis.sample_count, 40);
    }

    #[test]
    fn test_frozen_rich() {
        let analysis = analyze(&series(&[0.82; 30], 500), 10.0);
        assert!(analysis.frozen);
        assert_eq!(analysis.bias, Some(O2Bias::Rich));
        assert!((analysis.longest_run_secs - 14.5).abs() < 1e-9);
    }

    #[test]
    fn test_run_measured_by_time_not_count() {
        // Many samples over a short span
        let analysis = analyze(&series(&[0.1; 100], 50), 10.0);
        assert!(!analysis.frozen);
        assert_eq!(analysis.bias, Some(O2Bias::Lean));

        // Few samples over a long span
        let analysis = analyze(&series(&[0.1; 4], 5000), 10.0);
        assert!(analysis.frozen);
    }

    #[test]
    fn test_midpoint_reading_breaks_run() {
        let mut voltages = vec![0.8; 10];
        voltages.push(0.45);
        voltages.extend([0.8; 10]);
        let analysis = analyze(&series(&voltages, 1000), 10.0);
        assert!(!analysis.frozen);
        assert!((analysis.longest_run_secs - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_stream() {
        let analysis = analyze(&[], 10.0);
        assert_eq!(analysis, O2Analysis::default());
    }
}
