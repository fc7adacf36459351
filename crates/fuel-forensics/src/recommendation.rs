//! Human-readable recommendations

use crate::types::{AdaptationProgress, Evidence, FuelChangeContext, FuelState, O2Bias};

pub fn recommendation(
    state: FuelState,
    context: FuelChangeContext,
    evidence: &Evidence,
    adaptation: Option<&AdaptationProgress>,
) -> String {
    match state {
        FuelState::Stable if context.is_fuel_switch() => {
            "Fuel switch complete: the engine has fully adapted to the new fuel.".to_string()
        }
        FuelState::Stable => "Fuel trims are normal. No sign of fuel quality problems.".to_string(),
        FuelState::Adapting => match adaptation {
            Some(progress) => format!(
                "The engine is adapting to the new fuel ({:.0}% done). Keep driving normally; \
                 adaptation usually completes within a few dozen kilometers.",
                progress.progress_pct
            ),
            None => "Trims suggest the engine is adapting to a different fuel. \
                     Keep driving normally and check again later."
                .to_string(),
        },
        FuelState::Suspicious if evidence.insufficient_samples => {
            "Not enough data yet for a diagnosis. Drive longer and run the analysis again.".to_string()
        }
        FuelState::Suspicious if evidence.ltft_memory_warning => {
            "Long-term trim still reflects an earlier fuel while short-term trim looks normal. \
             Drive a few more tanks or reset the ECU adaptation before judging this fuel."
                .to_string()
        }
        FuelState::Suspicious if evidence.insufficient_o2 && evidence.critical_exceeded => {
            "Fuel trims are high, but there is too little O2 sensor data to tell fuel from \
             hardware. Drive longer and repeat the test."
                .to_string()
        }
        FuelState::Suspicious => {
            "Fuel trims are outside the expected range. Keep the receipt and monitor the next \
             refuel at a different station."
                .to_string()
        }
        FuelState::Contaminated => {
            "Trims are strongly corrected while the O2 sensor responds normally: the fuel is \
             likely adulterated. Keep the receipt, avoid this station and consider draining the tank."
                .to_string()
        }
        FuelState::Mechanical => {
            let sensor = match evidence.o2_frozen_bias {
                Some(O2Bias::Lean) => " The O2 sensor is stuck lean (possible vacuum leak or weak fuel pump).",
                Some(O2Bias::Rich) => " The O2 sensor is stuck rich (possible leaking injector or faulty sensor).",
                None => "",
            };
            format!(
                "The trim pattern points to a mechanical or sensor fault rather than fuel.{} \
                 Have the vehicle inspected.",
                sensor
            )
        }
    }
}
