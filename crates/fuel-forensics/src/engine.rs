//! Classification
//!
//! Pure and infallible: thin evidence degrades confidence or yields
//! `Suspicious`, never a stronger claim.

use tracing::debug;

use crate::confidence::{self, ConfidenceInputs};
use crate::config::ForensicsThresholds;
use crate::o2::{self, O2Analysis};
use crate::recommendation::recommendation;
use crate::statistics::{self, TrimStatistics};
use crate::types::{
    AdaptationProgress, Confidence, Evidence, FuelChangeContext, FuelDiagnosticResult,
    FuelMonitoringData, FuelState, TrimDirection,
};

/// Classify one monitoring session
pub fn evaluate(
    data: &FuelMonitoringData,
    context: FuelChangeContext,
    thresholds: &ForensicsThresholds,
) -> FuelDiagnosticResult {
    let t = thresholds;
    let samples = &data.stft_samples;
    let stats = TrimStatistics::compute(samples);
    let stft_average = statistics::rolling_average(samples, t.warmup_samples, t.rolling_window);
    let ltft_current = data.ltft_current.unwrap_or(0.0);
    let ltft_delta = data.ltft_delta;
    let distance_km = data.distance_monitored_km;

    let o2 = o2::analyze(&data.o2_readings, t.o2_frozen_secs);
    let total_trim_abs = stft_average.abs() + ltft_current.abs();

    let mut evidence = Evidence {
        total_trim_abs,
        warning_exceeded: total_trim_abs > t.warning_total_pct,
        critical_exceeded: total_trim_abs > t.critical_total_pct,
        o2_frozen: o2.frozen,
        o2_frozen_bias: if o2.frozen { o2.bias } else { None },
        o2_frozen_secs: o2.longest_run_secs,
        insufficient_o2: o2.sample_count < t.min_o2_samples,
        ltft_moved: ltft_delta.abs() >= t.ltft_movement_pct,
        flex_max_exceeded: stft_average.abs() > t.flex_max_stft_pct,
        ..Default::default()
    };

    let adaptation = context
        .expected_direction()
        .map(|expected| adaptation_progress(stft_average, ltft_delta, distance_km, expected, t));

    let (mut confidence_score, mut confidence) = confidence::assess(
        &ConfidenceInputs {
            distance_km,
            stft_samples: samples.len(),
            o2_samples: o2.sample_count,
            stft_variance: (!samples.is_empty()).then_some(stats.variance),
        },
        t,
    );

    let state = if samples.len() < t.warmup_samples {
        evidence.insufficient_samples = true;
        confidence = Confidence::Low;
        confidence_score = confidence_score.min(39);
        FuelState::Suspicious
    } else {
        match (context, adaptation.as_ref()) {
            (FuelChangeContext::SameFuel, _) => {
                classify_same_fuel(stft_average, ltft_current, &o2, &mut evidence, t)
            }
            (FuelChangeContext::GasToEthanol | FuelChangeContext::EthanolToGas, Some(progress)) => {
                classify_fuel_switch(stft_average, distance_km, progress, &evidence, t)
            }
            _ => classify_unknown(stft_average, &evidence, t),
        }
    };

    debug!(
        "Forensics ({}): {} with {:?} confidence ({}), STFT avg {:.1}%, LTFT delta {:.1}%, {} samples",
        context, state, confidence, confidence_score, stft_average, ltft_delta, samples.len()
    );

    FuelDiagnosticResult {
        recommendation: recommendation(state, context, &evidence, adaptation.as_ref()),
        state,
        confidence,
        confidence_score,
        stft_average,
        ltft_delta,
        o2_average: o2.average_voltage,
        distance_km,
        context,
        sample_count: samples.len(),
        trend: statistics::trend(samples, t.trend_margin_pct),
        evidence,
        adaptation,
    }
}

fn classify_same_fuel(
    stft_average: f64,
    ltft_current: f64,
    o2: &O2Analysis,
    evidence: &mut Evidence,
    t: &ForensicsThresholds,
) -> FuelState {
    if ltft_current.abs() > t.ltft_memory_pct && stft_average.abs() <= t.stft_near_zero_pct {
        evidence.ltft_memory_warning = true;
        return FuelState::Suspicious;
    }

    if evidence.critical_exceeded {
        // Telling fuel from hardware needs enough O2 evidence
        if o2.sample_count < t.min_o2_samples {
            FuelState::Suspicious
        } else if o2.frozen {
            FuelState::Mechanical
        } else {
            FuelState::Contaminated
        }
    } else if evidence.warning_exceeded {
        FuelState::Suspicious
    } else {
        FuelState::Stable
    }
}

fn adaptation_progress(
    stft_average: f64,
    ltft_delta: f64,
    distance_km: f64,
    expected: TrimDirection,
    t: &ForensicsThresholds,
) -> AdaptationProgress {
    let stft_settled = stft_average.abs() <= t.stft_near_zero_pct;
    let ltft_moved = ltft_delta.abs() >= t.ltft_movement_pct;

    let observed = if ltft_moved {
        TrimDirection::of(ltft_delta, 0.0)
    } else {
        TrimDirection::of(stft_average, t.stft_near_zero_pct)
    };

    let (progress_pct, complete) = if stft_settled && ltft_moved {
        (100.0, true)
    } else if ltft_moved {
        let shift = t.flex_expected_ltft_shift_pct.max(f64::EPSILON);
        ((ltft_delta.abs() / shift * 90.0).min(90.0), false)
    } else {
        let recommended = t.recommended_distance_km.max(f64::EPSILON);
        ((distance_km.max(0.0) / recommended * 50.0).min(50.0), false)
    };

    AdaptationProgress {
        progress_pct,
        complete,
        expected_direction: expected,
        observed_direction: observed,
    }
}

fn classify_fuel_switch(
    stft_average: f64,
    distance_km: f64,
    progress: &AdaptationProgress,
    evidence: &Evidence,
    t: &ForensicsThresholds,
) -> FuelState {
    if progress.complete {
        return FuelState::Stable;
    }

    let observed = progress.observed_direction;
    if observed != TrimDirection::Neutral && observed != progress.expected_direction {
        return FuelState::Suspicious;
    }

    let stft = stft_average.abs();
    if evidence.flex_max_exceeded {
        if !evidence.ltft_moved && distance_km >= t.min_analysis_distance_km {
            FuelState::Mechanical
        } else {
            FuelState::Suspicious
        }
    } else if stft > t.flex_expected_stft_pct
        && !evidence.ltft_moved
        && distance_km >= 2.0 * t.min_analysis_distance_km
    {
        FuelState::Mechanical
    } else {
        FuelState::Adapting
    }
}

fn classify_unknown(stft_average: f64, evidence: &Evidence, t: &ForensicsThresholds) -> FuelState {
    if stft_average.abs() <= t.unknown_tolerance_pct {
        FuelState::Stable
    } else if evidence.ltft_moved {
        // Probably an undeclared fuel switch
        FuelState::Adapting
    } else {
        FuelState::Suspicious
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{O2Reading, Trend};
    use proptest::prelude::*;

    const T0: u64 = 1_700_000_000_000;

    fn session_data(stft: &[f64], ltft_initial: f64, ltft_current: f64, distance_km: f64) -> FuelMonitoringData {
        let mut data = FuelMonitoringData::new(Some(ltft_initial), T0);
        data.stft_samples = stft.to_vec();
        data.record_ltft(ltft_current);
        data.distance_monitored_km = distance_km;
        data
    }

    fn with_o2(mut data: FuelMonitoringData, voltages: impl Iterator<Item = f64>) -> FuelMonitoringData {
        for (i, v) in voltages.enumerate() {
            data.push_o2(O2Reading::classify(T0 + i as u64 * 500, v, 0.45, 0.1));
        }
        data
    }

    fn oscillating(n: usize) -> impl Iterator<Item = f64> {
        (0..n).map(|i| if i % 2 == 0 { 0.2 } else { 0.75 })
    }

    /// STFT hovering around +18%
    fn high_stft() -> Vec<f64> {
        (0..40).map(|i| if i % 2 == 0 { 17.0 } else { 19.0 }).collect()
    }

    #[test]
    fn test_same_fuel_contaminated() {
        let data = with_o2(session_data(&high_stft(), 0.0, 2.0, 12.0), oscillating(30));
        let result = evaluate(&data, FuelChangeContext::SameFuel, &ForensicsThresholds::default());

        assert_eq!(result.state, FuelState::Contaminated);
        assert!((result.stft_average - 18.0).abs() < 1e-9);
        assert!(result.evidence.critical_exceeded);
        assert!(!result.evidence.o2_frozen);
        assert!(result.adaptation.is_none());
    }

    #[test]
    fn test_same_fuel_frozen_rich_is_mechanical() {
        let data = with_o2(session_data(&high_stft(), 0.0, 2.0, 12.0), std::iter::repeat(0.8).take(30));
        let result = evaluate(&data, FuelChangeContext::SameFuel, &ForensicsThresholds::default());

        assert_eq!(result.state, FuelState::Mechanical);
        assert!(result.evidence.o2_frozen);
        assert_eq!(result.evidence.o2_frozen_bias, Some(crate::types::O2Bias::Rich));
        assert!(result.evidence.o2_frozen_secs >= 10.0);
        assert!(result.recommendation.contains("stuck rich"));
    }

    #[test]
    fn test_same_fuel_without_o2_evidence_stays_suspicious() {
        let data = with_o2(session_data(&high_stft(), 0.0, 2.0, 12.0), std::iter::repeat(0.8).take(5));
        let result = evaluate(&data, FuelChangeContext::SameFuel, &ForensicsThresholds::default());

        assert_eq!(result.state, FuelState::Suspicious);
        assert!(result.evidence.insufficient_o2);
    }

    #[test]
    fn test_same_fuel_ltft_memory() {
        let stft = vec![1.0; 30];
        let data = with_o2(session_data(&stft, 18.0, 18.0, 12.0), oscillating(30));
        let result = evaluate(&data, FuelChangeContext::SameFuel, &ForensicsThresholds::default());

        assert_eq!(result.state, FuelState::Suspicious);
        assert!(result.evidence.ltft_memory_warning);
    }

    #[test]
    fn test_same_fuel_warning_and_stable() {
        let t = ForensicsThresholds::default();

        let data = with_o2(session_data(&[9.0; 30], 0.0, 3.0, 12.0), oscillating(30));
        assert_eq!(evaluate(&data, FuelChangeContext::SameFuel, &t).state, FuelState::Suspicious);

        let data = with_o2(session_data(&[2.0; 30], 0.0, 1.0, 12.0), oscillating(30));
        let result = evaluate(&data, FuelChangeContext::SameFuel, &t);
        assert_eq!(result.state, FuelState::Stable);
        assert_eq!(result.trend, Trend::Stable);
    }

    #[test]
    fn test_gas_to_ethanol_adaptation_complete() {
        // STFT falls from +35% and settles near +4% while LTFT absorbs +30%
        let mut stft: Vec<f64> = (0..10).map(|i| 35.0 - 3.0 * i as f64).collect();
        stft.extend((0..30).map(|i| if i % 2 == 0 { 3.5 } else { 4.5 }));
        let data = with_o2(session_data(&stft, 0.0, 30.0, 20.0), oscillating(40));

        let result = evaluate(&data, FuelChangeContext::GasToEthanol, &ForensicsThresholds::default());
        assert_eq!(result.state, FuelState::Stable);
        let adaptation = result.adaptation.unwrap();
        assert!(adaptation.complete);
        assert_eq!(adaptation.progress_pct, 100.0);
        assert_eq!(adaptation.observed_direction, TrimDirection::Positive);
    }

    #[test]
    fn test_fuel_switch_in_progress_is_adapting() {
        let data = session_data(&[22.0; 30], 0.0, 2.0, 3.0);
        let result = evaluate(&data, FuelChangeContext::GasToEthanol, &ForensicsThresholds::default());

        assert_eq!(result.state, FuelState::Adapting);
        let adaptation = result.adaptation.unwrap();
        assert!(!adaptation.complete);
        assert!(adaptation.progress_pct <= 50.0);
    }

    #[test]
    fn test_fuel_switch_progress_scales_with_ltft() {
        let data = session_data(&[15.0; 30], 0.0, 10.0, 8.0);
        let result = evaluate(&data, FuelChangeContext::GasToEthanol, &ForensicsThresholds::default());

        assert_eq!(result.state, FuelState::Adapting);
        assert!((result.adaptation.unwrap().progress_pct - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_fuel_switch_wrong_direction_is_suspicious() {
        let data = session_data(&[20.0; 30], 0.0, 0.0, 8.0);
        let result = evaluate(&data, FuelChangeContext::EthanolToGas, &ForensicsThresholds::default());

        assert_eq!(result.state, FuelState::Suspicious);
        let adaptation = result.adaptation.unwrap();
        assert_eq!(adaptation.expected_direction, TrimDirection::Negative);
        assert_eq!(adaptation.observed_direction, TrimDirection::Positive);
    }

    #[test]
    fn test_fuel_switch_beyond_max() {
        let t = ForensicsThresholds::default();

        // LTFT not absorbing it after the minimum distance
        let result = evaluate(&session_data(&[45.0; 30], 0.0, 0.0, 6.0), FuelChangeContext::GasToEthanol, &t);
        assert_eq!(result.state, FuelState::Mechanical);

        // Too early to blame hardware
        let result = evaluate(&session_data(&[45.0; 30], 0.0, 0.0, 2.0), FuelChangeContext::GasToEthanol, &t);
        assert_eq!(result.state, FuelState::Suspicious);
    }

    #[test]
    fn test_fuel_switch_stalled_ltft() {
        let t = ForensicsThresholds::default();

        let result = evaluate(&session_data(&[30.0; 30], 0.0, 0.0, 12.0), FuelChangeContext::GasToEthanol, &t);
        assert_eq!(result.state, FuelState::Mechanical);

        let result = evaluate(&session_data(&[30.0; 30], 0.0, 0.0, 8.0), FuelChangeContext::GasToEthanol, &t);
        assert_eq!(result.state, FuelState::Adapting);
    }

    #[test]
    fn test_unknown_context() {
        let t = ForensicsThresholds::default();

        let result = evaluate(&session_data(&[20.0; 30], 0.0, 12.0, 10.0), FuelChangeContext::Unknown, &t);
        assert_eq!(result.state, FuelState::Adapting);

        let result = evaluate(&session_data(&[20.0; 30], 0.0, 1.0, 10.0), FuelChangeContext::Unknown, &t);
        assert_eq!(result.state, FuelState::Suspicious);

        let result = evaluate(&session_data(&[6.0; 30], 0.0, 1.0, 10.0), FuelChangeContext::Unknown, &t);
        assert_eq!(result.state, FuelState::Stable);
        assert!(result.adaptation.is_none());
    }

    #[test]
    fn test_too_few_samples() {
        let data = with_o2(session_data(&[25.0, 26.0, 24.0], 0.0, 2.0, 30.0), std::iter::repeat(0.8).take(40));
        let result = evaluate(&data, FuelChangeContext::SameFuel, &ForensicsThresholds::default());

        assert_eq!(result.state, FuelState::Suspicious);
        assert_eq!(result.confidence, Confidence::Low);
        assert!(result.evidence.insufficient_samples);
    }

    #[test]
    fn test_empty_data_does_not_panic() {
        let result = evaluate(
            &FuelMonitoringData::default(),
            FuelChangeContext::GasToEthanol,
            &ForensicsThresholds::default(),
        );
        assert_eq!(result.state, FuelState::Suspicious);
        assert_eq!(result.o2_average, None);
        assert_eq!(result.sample_count, 0);
    }

    #[test]
    fn test_result_serializes() {
        let data = with_o2(session_data(&high_stft(), 0.0, 2.0, 12.0), oscillating(30));
        let result = evaluate(&data, FuelChangeContext::SameFuel, &ForensicsThresholds::default());
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"state\":\"Contaminated\""));
    }

    proptest! {
        #[test]
        fn test_strong_claims_need_o2_evidence(
            stft in proptest::collection::vec(-60.0f64..60.0, 0..80),
            ltft in -40.0f64..40.0,
            o2 in 0usize..10,
            distance in 0.0f64..50.0,
        ) {
            let data = with_o2(session_data(&stft, 0.0, ltft, distance), std::iter::repeat(0.8).take(o2));
            let result = evaluate(&data, FuelChangeContext::SameFuel, &ForensicsThresholds::default());
            prop_assert_ne!(result.state, FuelState::Contaminated);
            prop_assert_ne!(result.state, FuelState::Mechanical);
        }

        #[test]
        fn test_evaluation_confidence_monotonic_in_distance(a in 0.0f64..40.0, b in 0.0f64..40.0) {
            let t = ForensicsThresholds::default();
            let (near, far) = if a <= b { (a, b) } else { (b, a) };
            let near = evaluate(&with_o2(session_data(&high_stft(), 0.0, 2.0, near), oscillating(30)), FuelChangeContext::SameFuel, &t);
            let far = evaluate(&with_o2(session_data(&high_stft(), 0.0, 2.0, far), oscillating(30)), FuelChangeContext::SameFuel, &t);
            prop_assert!(near.confidence_score <= far.confidence_score);
        }
    }
}
