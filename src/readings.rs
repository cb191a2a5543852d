//! Data processor: turns raw register words into scaled, typed readings
//! (spec.md §4.5, §3 "Data Model").

use serde::{Deserialize, Serialize};

use crate::modbus::{u32_from_regs, u64_from_regs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatingCondition {
    Fault,
    Off,
    Ok,
    Warning,
    Invalid,
}

impl OperatingCondition {
    pub fn from_code(code: u32) -> Self {
        match code {
            35 => Self::Fault,
            303 => Self::Off,
            307 => Self::Ok,
            455 => Self::Warning,
            _ => Self::Invalid,
        }
    }

    pub fn as_code(self) -> Option<u32> {
        match self {
            Self::Fault => Some(35),
            Self::Off => Some(303),
            Self::Ok => Some(307),
            Self::Warning => Some(455),
            Self::Invalid => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatingState {
    Stop,
    Starting,
    Mpp,
    Derating,
    Shutdown,
    WaitAc,
    WaitPv,
    Fault,
    ConstVolt,
    StandAlone,
    Invalid,
}

impl OperatingState {
    pub fn from_code(code: u32) -> Self {
        match code {
            381 => Self::Stop,
            1467 => Self::Starting,
            295 => Self::Mpp,
            2119 => Self::Derating,
            1469 => Self::Shutdown,
            1480 => Self::WaitAc,
            1393 => Self::WaitPv,
            1392 => Self::Fault,
            443 => Self::ConstVolt,
            1855 => Self::StandAlone,
            _ => Self::Invalid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatingMode {
    Off,
    Watt,
    Percent,
    Invalid,
}

impl OperatingMode {
    pub fn from_code(code: u32) -> Self {
        match code {
            303 => Self::Off,
            1077 => Self::Watt,
            1078 => Self::Percent,
            _ => Self::Invalid,
        }
    }

    pub fn as_code(self) -> Option<u32> {
        match self {
            Self::Off => Some(303),
            Self::Watt => Some(1077),
            Self::Percent => Some(1078),
            Self::Invalid => None,
        }
    }
}

/// One phase's AC measurements, or all-`NaN` when the inverter does not
/// supply that phase (spec.md §4.5 "missing phases propagate as NaN").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PhaseReading {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
}

impl PhaseReading {
    pub const MISSING: Self = Self {
        voltage: f64::NAN,
        current: f64::NAN,
        power: f64::NAN,
    };
}

/// One DC string's measurements.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StringReading {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Readings {
    pub frequency_hz: f64,
    pub total_power_w: f64,
    pub phases: [PhaseReading; 3],
    pub strings: Vec<StringReading>,
    pub energy_total_wh: u64,
    pub energy_today_wh: u64,
    pub temperature_c: f64,
    pub operating_condition: OperatingCondition,
    pub operating_state: OperatingState,
    pub operating_mode: OperatingMode,
    pub logged_in: bool,
    pub status_code: u32,
    pub error_code: u32,
}

/// Scale a raw register value by `divisor`, yielding the physical unit.
fn scale(raw: u32, divisor: f64) -> f64 {
    raw as f64 / divisor
}

/// Decode the 10-register `ReadACPowerAndVoltage` block: three 32-bit phase
/// powers (L1/L2/L3), two reserved registers, then a 32-bit grid voltage
/// (spec.md §4.3, `register map` open question resolution).
pub fn decode_ac_power_and_voltage(regs: &[u16], phase_count: u8) -> (f64, [f64; 3]) {
    debug_assert!(regs.len() >= 10);
    let p1 = u32_from_regs(&regs[0..2]) as i32 as f64;
    let p2 = u32_from_regs(&regs[2..4]) as i32 as f64;
    let p3 = u32_from_regs(&regs[4..6]) as i32 as f64;
    let voltage = scale(u32_from_regs(&regs[8..10]), 100.0);

    let powers = match phase_count {
        1 => [p1, f64::NAN, f64::NAN],
        2 => [p1, p2, f64::NAN],
        _ => [p1, p2, p3],
    };
    (voltage, powers)
}

/// Decode the `ReadACCurrent` block: a single 32-bit current reading,
/// scaled by 1000 (mA -> A).
pub fn decode_ac_current(regs: &[u16]) -> f64 {
    scale(u32_from_regs(&regs[0..2]), 1000.0)
}

/// Sum per-string currents and average per-string voltages into a single
/// DC aggregate pair (spec.md §9 DC-aggregation open question resolution).
pub fn aggregate_dc(strings: &[StringReading]) -> (f64, f64) {
    if strings.is_empty() {
        return (0.0, f64::NAN);
    }
    let current: f64 = strings.iter().map(|s| s.current).sum();
    let voltage: f64 = strings.iter().map(|s| s.voltage).sum::<f64>() / strings.len() as f64;
    (current, voltage)
}

/// Decode the 8-register `ReadPowerYield` block: total energy (4 regs) then
/// daily energy (4 regs), both raw Wh (spec.md §9 DC-aggregation open
/// question: yield counters are never scaled, only summed/averaged).
pub fn decode_power_yield(regs: &[u16]) -> (u64, u64) {
    debug_assert!(regs.len() >= 8);
    let total = u64_from_regs(&regs[0..4]);
    let today = u64_from_regs(&regs[4..8]);
    (total, today)
}

/// Decode two DC strings from a 12-register `ReadPVData` pair (6 registers
/// each: voltage, current, power as 32-bit words), aggregating to a single
/// logical string pair. Strings beyond the device's actual count are zero
/// and are dropped by the caller based on `string_count`.
pub fn decode_pv_strings(regs: &[u16], string_count: u8) -> Vec<StringReading> {
    let mut strings = Vec::new();
    for i in 0..string_count.min(2) as usize {
        let base = i * 6;
        let voltage = scale(u32_from_regs(&regs[base..base + 2]), 100.0);
        let current = scale(u32_from_regs(&regs[base + 2..base + 4]), 1000.0);
        let power = u32_from_regs(&regs[base + 4..base + 6]) as f64;
        strings.push(StringReading {
            voltage,
            current,
            power,
        });
    }
    strings
}

pub fn decode_temperature(regs: &[u16]) -> f64 {
    scale(u32_from_regs(regs) as i32 as u32, 10.0)
}

pub fn decode_frequency(regs: &[u16]) -> f64 {
    scale(u32_from_regs(regs), 100.0)
}

/// Human-readable text for the published `StatusCode` leaf. When the
/// inverter's operating condition is healthy (`Ok`/`Warning`) the text names
/// the operating state (e.g. "MPP", "Stopped"); otherwise it names the
/// condition. Falls back to the raw numeric value when a code is genuinely
/// unmapped (spec.md §6).
pub fn status_text(condition: OperatingCondition, state: OperatingState, code: u32) -> String {
    match condition {
        OperatingCondition::Ok | OperatingCondition::Warning => operating_state_text(state, code),
        OperatingCondition::Fault => "Fault".to_string(),
        OperatingCondition::Off => "Off".to_string(),
        OperatingCondition::Invalid => format!("UNKNOWN ({code})"),
    }
}

fn operating_state_text(state: OperatingState, code: u32) -> String {
    match state {
        OperatingState::Stop => "Stopped".to_string(),
        OperatingState::Starting => "Started".to_string(),
        OperatingState::Mpp => "MPP".to_string(),
        OperatingState::Derating => "Derating".to_string(),
        OperatingState::Shutdown => "Shutdown".to_string(),
        OperatingState::WaitAc => "Waiting for AC".to_string(),
        OperatingState::WaitPv => "Waiting for PV".to_string(),
        OperatingState::Fault => "Fault".to_string(),
        OperatingState::ConstVolt => "Constant Voltage".to_string(),
        OperatingState::StandAlone => "Stand-Alone".to_string(),
        OperatingState::Invalid => format!("UNKNOWN ({code})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ac_power_and_voltage_three_phase() {
        let mut regs = vec![0u16; 10];
        regs[0..2].copy_from_slice(&[0, 1500]);
        regs[2..4].copy_from_slice(&[0, 1600]);
        regs[4..6].copy_from_slice(&[0, 1700]);
        regs[8..10].copy_from_slice(&[0, 23000]);
        let (voltage, powers) = decode_ac_power_and_voltage(&regs, 3);
        assert_eq!(voltage, 230.0);
        assert_eq!(powers, [1500.0, 1600.0, 1700.0]);
    }

    #[test]
    fn ac_power_single_phase_remaining_are_nan() {
        let mut regs = vec![0u16; 10];
        regs[0..2].copy_from_slice(&[0, 1500]);
        let (_, powers) = decode_ac_power_and_voltage(&regs, 1);
        assert_eq!(powers[0], 1500.0);
        assert!(powers[1].is_nan());
        assert!(powers[2].is_nan());
    }

    #[test]
    fn power_yield_splits_total_and_daily() {
        let mut regs = vec![0u16; 8];
        regs[0..4].copy_from_slice(&[0, 0, 0x0001, 0x0000]);
        regs[4..8].copy_from_slice(&[0, 0, 0, 500]);
        let (total, today) = decode_power_yield(&regs);
        assert_eq!(total, 65536);
        assert_eq!(today, 500);
    }

    #[test]
    fn operating_condition_unknown_code_is_invalid() {
        assert_eq!(OperatingCondition::from_code(9999), OperatingCondition::Invalid);
    }

    #[test]
    fn operating_mode_round_trips_known_codes() {
        assert_eq!(OperatingMode::from_code(1077), OperatingMode::Watt);
        assert_eq!(OperatingMode::Watt.as_code(), Some(1077));
    }

    #[test]
    fn operating_state_maps_mpp_and_derating() {
        assert_eq!(OperatingState::from_code(295), OperatingState::Mpp);
        assert_eq!(OperatingState::from_code(2119), OperatingState::Derating);
        assert_eq!(OperatingState::from_code(1469), OperatingState::Shutdown);
        assert_eq!(OperatingState::from_code(1480), OperatingState::WaitAc);
    }

    #[test]
    fn aggregate_dc_sums_current_and_averages_voltage() {
        let strings = vec![
            StringReading { voltage: 400.0, current: 5.0, power: 2000.0 },
            StringReading { voltage: 380.0, current: 4.0, power: 1500.0 },
        ];
        let (current, voltage) = aggregate_dc(&strings);
        assert_eq!(current, 9.0);
        assert_eq!(voltage, 390.0);
    }

    #[test]
    fn status_text_shows_state_when_condition_healthy() {
        assert_eq!(
            status_text(OperatingCondition::Ok, OperatingState::Mpp, 307),
            "MPP"
        );
        assert_eq!(
            status_text(OperatingCondition::Fault, OperatingState::Mpp, 35),
            "Fault"
        );
        assert_eq!(
            status_text(OperatingCondition::Invalid, OperatingState::Invalid, 9999),
            "UNKNOWN (9999)"
        );
    }
}
