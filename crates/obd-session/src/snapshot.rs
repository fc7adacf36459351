//! Vehicle snapshot published by the polling loop

use obd_protocol::{Pid, PidResponse};
use serde::{Deserialize, Serialize};

/// Latest known value of every polled PID. `None` means never read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    /// Engine RPM
    pub rpm: Option<f64>,
    /// Vehicle speed (km/h)
    pub speed_kmh: Option<f64>,
    /// Coolant temperature (°C)
    pub coolant_temp_c: Option<f64>,
    /// Control module voltage (V)
    pub battery_voltage: Option<f64>,
    /// Fuel tank level (%)
    pub fuel_level_pct: Option<f64>,
    /// Calculated engine load (%)
    pub engine_load_pct: Option<f64>,
}

impl VehicleSnapshot {
    /// Update the field for a decoded response. Returns false for PIDs
    /// the snapshot does not track.
    pub fn apply(&mut self, response: &PidResponse) -> bool {
        let field = match Pid::from_hex(response.pid) {
            Some(Pid::Rpm) => &mut self.rpm,
            Some(Pid::Speed) => &mut self.speed_kmh,
            Some(Pid::CoolantTemp) => &mut self.coolant_temp_c,
            Some(Pid::ControlModuleVoltage) => &mut self.battery_voltage,
            Some(Pid::FuelLevel) => &mut self.fuel_level_pct,
            Some(Pid::EngineLoad) => &mut self.engine_load_pct,
            _ => return false,
        };
        *field = Some(response.value);
        true
    }

    /// Whether the engine is running
    pub fn engine_running(&self) -> bool {
        self.rpm.is_some_and(|rpm| rpm > 0.0)
    }
}
