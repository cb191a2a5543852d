//! Per-device poll cycle (spec.md §4.3-§4.4): a single `tokio::spawn` task
//! per inverter that walks a fixed state machine, publishing fresh readings
//! each cycle and applying any pending power-limit command from the
//! arbiter.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::arbiter::ArbiterCommand;
use crate::identifier::DeviceInfo;
use crate::modbus::{u32_from_regs, u32_to_regs, Transport, TransportError};
use crate::publish::Publisher;
use crate::readings::{
    aggregate_dc, decode_ac_current, decode_ac_power_and_voltage, decode_frequency,
    decode_power_yield, decode_pv_strings, decode_temperature, status_text, OperatingCondition,
    OperatingMode, OperatingState, PhaseReading, Readings,
};

/// Read-error retries before the device is considered lost (spec.md §7,
/// testable property: ">5 consecutive read failures raises connection_lost").
const RETRY_THRESHOLD: u32 = 5;
/// Grid-code/op-mode write retries before giving up on that sub-phase
/// (spec.md §4.4, shared with the identifier's own counter).
const WRITE_RETRY_THRESHOLD: u32 = 3;

const IDLE_NORMAL: Duration = Duration::from_millis(1000);
const IDLE_AFTER_ERROR: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    Connect,
    CheckCondition,
    CheckState,
    CheckLogin,
    DoLogin,
    CheckOpMode,
    SetOpMode,
    ReadPowerYield,
    ReadACFrequency,
    ReadACCurrent,
    ReadACPowerAndVoltage,
    ReadTemperature,
    ReadPVData1,
    ReadPVData2,
    ReadPowerLimit,
    WritePowerLimit,
    Idle,
    Error,
}

/// Mutable cycle-to-cycle state carried by the poller (spec.md §4.4).
struct PollerState {
    protocol: ProtocolState,
    retry_count: u32,
    write_count: u32,
    logged_in: bool,
    pending_power_limit: Option<u32>,
    readings: Readings,
}

impl PollerState {
    fn fresh() -> Self {
        Self {
            protocol: ProtocolState::Connect,
            retry_count: 0,
            write_count: 0,
            logged_in: false,
            pending_power_limit: None,
            readings: Readings {
                frequency_hz: f64::NAN,
                total_power_w: f64::NAN,
                phases: [PhaseReading::MISSING; 3],
                strings: Vec::new(),
                energy_total_wh: 0,
                energy_today_wh: 0,
                temperature_c: f64::NAN,
                operating_condition: OperatingCondition::Invalid,
                operating_state: OperatingState::Invalid,
                operating_mode: OperatingMode::Invalid,
                logged_in: false,
                status_code: 0,
                error_code: 0,
            },
        }
    }
}

pub struct Poller<T: Transport, P: Publisher> {
    transport: Arc<T>,
    publisher: Arc<P>,
    device: DeviceInfo,
    grid_code: u32,
    commands: mpsc::Receiver<ArbiterCommand>,
}

impl<T: Transport, P: Publisher> Poller<T, P> {
    pub fn new(
        transport: Arc<T>,
        publisher: Arc<P>,
        device: DeviceInfo,
        grid_code: u32,
        commands: mpsc::Receiver<ArbiterCommand>,
    ) -> Self {
        Self {
            transport,
            publisher,
            device,
            grid_code,
            commands,
        }
    }

    /// Drive the poll cycle until `self.commands` closes (device removed
    /// from the known-host set) or the connection is permanently lost.
    pub async fn run(mut self) {
        let mut state = PollerState::fresh();
        state.logged_in = self.device.logged_in;

        loop {
            match state.protocol {
                ProtocolState::Idle => {
                    let delay = if state.retry_count > 0 {
                        IDLE_AFTER_ERROR
                    } else {
                        IDLE_NORMAL
                    };
                    tokio::select! {
                        cmd = self.commands.recv() => {
                            match cmd {
                                Some(ArbiterCommand::SetPowerLimit(watts)) => {
                                    if state.logged_in {
                                        state.pending_power_limit = Some(watts);
                                        state.protocol = ProtocolState::CheckCondition;
                                    }
                                }
                                None => {
                                    info!(host = %self.device.host_name, "command channel closed, stopping poller");
                                    return;
                                }
                            }
                        }
                        _ = sleep(delay) => {
                            state.protocol = ProtocolState::CheckCondition;
                        }
                    }
                }
                _ => {
                    if let Err(fatal) = self.step(&mut state).await {
                        error!(host = %self.device.host_name, error = %fatal, "poller stopping: connection lost");
                        self.transport.disconnect().await;
                        return;
                    }
                }
            }
        }
    }

    /// Execute one non-idle protocol state, returning `Err` only when the
    /// device should be considered permanently lost.
    async fn step(&self, state: &mut PollerState) -> Result<(), TransportError> {
        match state.protocol {
            ProtocolState::Connect => {
                match self
                    .transport
                    .connect(&self.device.host_name, self.device.port)
                    .await
                {
                    Ok(()) => {
                        state.retry_count = 0;
                        state.protocol = ProtocolState::CheckCondition;
                    }
                    Err(e) => return self.on_read_error(state, e),
                }
            }
            ProtocolState::CheckCondition => {
                match self.read32(30201).await {
                    Ok(code) => {
                        state.readings.status_code = code;
                        state.readings.operating_condition = OperatingCondition::from_code(code);
                        state.protocol = ProtocolState::CheckState;
                    }
                    Err(e) => return self.on_read_error(state, e),
                }
            }
            ProtocolState::CheckState => {
                match self.read32(40029).await {
                    Ok(code) => {
                        state.readings.operating_state = OperatingState::from_code(code);
                        let healthy = matches!(
                            state.readings.operating_condition,
                            OperatingCondition::Ok | OperatingCondition::Warning
                        );
                        if healthy {
                            state.protocol = ProtocolState::CheckLogin;
                        } else {
                            self.finish_cycle(state).await;
                            state.protocol = ProtocolState::Idle;
                        }
                    }
                    Err(e) => return self.on_read_error(state, e),
                }
            }
            ProtocolState::CheckLogin => {
                match self.read32(43090).await {
                    Ok(login_status) => {
                        if self.grid_code == 0 {
                            state.protocol = ProtocolState::CheckOpMode;
                        } else if login_status == 1 {
                            state.logged_in = true;
                            state.readings.logged_in = true;
                            state.protocol = ProtocolState::CheckOpMode;
                        } else {
                            state.write_count = 0;
                            state.protocol = ProtocolState::DoLogin;
                        }
                    }
                    Err(e) => return self.on_read_error(state, e),
                }
            }
            ProtocolState::DoLogin => {
                if state.write_count >= WRITE_RETRY_THRESHOLD {
                    warn!(host = %self.device.host_name, "giving up on login after repeated failures");
                    state.protocol = ProtocolState::ReadPowerYield;
                } else {
                    state.write_count += 1;
                    let halves = u32_to_regs(self.grid_code);
                    match self
                        .transport
                        .write_multiple_holding_registers(self.device.network_id, 43090, &halves)
                        .await
                        .and_then(|_| Ok(()))
                    {
                        Ok(()) => match self.read32(43090).await {
                            Ok(1) => {
                                state.logged_in = true;
                                state.readings.logged_in = true;
                                state.write_count = 0;
                                state.protocol = ProtocolState::CheckOpMode;
                            }
                            Ok(_) => { /* retry on next pass through DoLogin */ }
                            Err(e) => return self.on_read_error(state, e),
                        },
                        Err(e) => return self.on_read_error(state, e),
                    }
                }
            }
            ProtocolState::CheckOpMode => {
                if state.logged_in {
                    state.write_count = 0;
                    state.protocol = ProtocolState::SetOpMode;
                } else {
                    state.protocol = ProtocolState::ReadPowerYield;
                }
            }
            ProtocolState::SetOpMode => {
                if state.write_count >= WRITE_RETRY_THRESHOLD {
                    state.protocol = ProtocolState::ReadPowerYield;
                } else {
                    state.write_count += 1;
                    let watt_mode = OperatingMode::Watt.as_code().unwrap();
                    let halves = u32_to_regs(watt_mode);
                    match self
                        .transport
                        .write_multiple_holding_registers(self.device.network_id, 40210, &halves)
                        .await
                    {
                        Ok(()) => match self.read32(40210).await {
                            Ok(code) => {
                                state.readings.operating_mode = OperatingMode::from_code(code);
                                state.protocol = ProtocolState::ReadPowerYield;
                            }
                            Err(e) => return self.on_read_error(state, e),
                        },
                        Err(e) => return self.on_read_error(state, e),
                    }
                }
            }
            ProtocolState::ReadPowerYield => {
                match self
                    .transport
                    .read_holding_registers(self.device.network_id, 30513, 8)
                    .await
                {
                    Ok(regs) => {
                        let (total, today) = decode_power_yield(&regs);
                        state.readings.energy_total_wh = total;
                        state.readings.energy_today_wh = today;
                        if state.readings.operating_state == OperatingState::Mpp {
                            state.protocol = ProtocolState::ReadACFrequency;
                        } else {
                            self.finish_cycle(state).await;
                            state.protocol = ProtocolState::Idle;
                        }
                    }
                    Err(e) => return self.on_read_error(state, e),
                }
            }
            ProtocolState::ReadACFrequency => {
                match self
                    .transport
                    .read_holding_registers(self.device.network_id, 40135, 2)
                    .await
                {
                    Ok(regs) => {
                        state.readings.frequency_hz = decode_frequency(&regs);
                        state.protocol = ProtocolState::ReadACCurrent;
                    }
                    Err(e) => return self.on_read_error(state, e),
                }
            }
            ProtocolState::ReadACCurrent => {
                match self
                    .transport
                    .read_holding_registers(self.device.network_id, 30795, 2)
                    .await
                {
                    Ok(regs) => {
                        state.readings.phases[0].current = decode_ac_current(&regs);
                        state.protocol = ProtocolState::ReadACPowerAndVoltage;
                    }
                    Err(e) => return self.on_read_error(state, e),
                }
            }
            ProtocolState::ReadACPowerAndVoltage => {
                match self
                    .transport
                    .read_holding_registers(self.device.network_id, 30775, 10)
                    .await
                {
                    Ok(regs) => {
                        let (voltage, powers) =
                            decode_ac_power_and_voltage(&regs, self.device.phase_count);
                        let mut total = 0.0;
                        for (i, p) in powers.iter().enumerate() {
                            state.readings.phases[i].power = *p;
                            state.readings.phases[i].voltage = voltage;
                            if !p.is_nan() {
                                total += p;
                            }
                        }
                        state.readings.total_power_w = total;
                        state.protocol = ProtocolState::ReadTemperature;
                    }
                    Err(e) => return self.on_read_error(state, e),
                }
            }
            ProtocolState::ReadTemperature => {
                match self
                    .transport
                    .read_holding_registers(self.device.network_id, 34113, 2)
                    .await
                {
                    Ok(regs) => {
                        state.readings.temperature_c = decode_temperature(&regs);
                        state.protocol = ProtocolState::ReadPVData1;
                    }
                    Err(e) => return self.on_read_error(state, e),
                }
            }
            ProtocolState::ReadPVData1 => {
                match self
                    .transport
                    .read_holding_registers(self.device.network_id, 30769, 6)
                    .await
                {
                    Ok(regs) => {
                        state.readings.strings = decode_pv_strings(&regs, 1);
                        state.protocol = ProtocolState::ReadPVData2;
                    }
                    Err(e) => return self.on_read_error(state, e),
                }
            }
            ProtocolState::ReadPVData2 => {
                match self
                    .transport
                    .read_holding_registers(self.device.network_id, 30957, 6)
                    .await
                {
                    Ok(regs) => {
                        let second = decode_pv_strings(&regs, 1);
                        state.readings.strings.extend(second);
                        state.protocol = if state.logged_in {
                            ProtocolState::ReadPowerLimit
                        } else {
                            self.finish_cycle(state).await;
                            ProtocolState::Idle
                        };
                    }
                    Err(e) => return self.on_read_error(state, e),
                }
            }
            ProtocolState::ReadPowerLimit => {
                match self.read32(40212).await {
                    Ok(_) => {
                        state.protocol = if state.pending_power_limit.is_some() {
                            ProtocolState::WritePowerLimit
                        } else {
                            self.finish_cycle(state).await;
                            ProtocolState::Idle
                        };
                    }
                    Err(e) => return self.on_read_error(state, e),
                }
            }
            ProtocolState::WritePowerLimit => {
                if let Some(watts) = state.pending_power_limit.take() {
                    let clamped = watts.min(self.device.max_power);
                    let halves = u32_to_regs(clamped);
                    match self
                        .transport
                        .write_multiple_holding_registers(self.device.network_id, 40212, &halves)
                        .await
                    {
                        Ok(()) => {
                            debug!(host = %self.device.host_name, watts = clamped, "applied power limit");
                        }
                        Err(e) => return self.on_read_error(state, e),
                    }
                }
                self.finish_cycle(state).await;
                state.protocol = ProtocolState::Idle;
            }
            ProtocolState::Error => {
                state.protocol = ProtocolState::Connect;
            }
            ProtocolState::Idle => unreachable!("handled in run()"),
        }
        Ok(())
    }

    async fn read32(&self, register: u16) -> Result<u32, TransportError> {
        let regs = self
            .transport
            .read_holding_registers(self.device.network_id, register, 2)
            .await?;
        Ok(u32_from_regs(&regs))
    }

    /// Bump the retry counter on a failed request; past [`RETRY_THRESHOLD`]
    /// the connection is declared lost and the caller tears the poller down.
    fn on_read_error(
        &self,
        state: &mut PollerState,
        err: TransportError,
    ) -> Result<(), TransportError> {
        state.retry_count += 1;
        if state.retry_count > RETRY_THRESHOLD {
            return Err(err);
        }
        warn!(host = %self.device.host_name, retry_count = state.retry_count, error = %err, "read failed, retrying");
        state.logged_in = false;
        state.protocol = ProtocolState::Connect;
        Ok(())
    }

    async fn finish_cycle(&self, state: &PollerState) {
        let r = &state.readings;
        self.publisher
            .publish_text(
                &format!("{}/ProductName", self.device.host_name),
                &self.device.product_name,
            )
            .await;
        self.publisher
            .publish_f64(
                &format!("{}/Ac/Frequency", self.device.host_name),
                r.frequency_hz,
                "Hz",
                1,
            )
            .await;
        self.publisher
            .publish_f64(
                &format!("{}/Ac/Power", self.device.host_name),
                r.total_power_w,
                "W",
                0,
            )
            .await;
        for (i, phase) in r.phases.iter().enumerate() {
            let label = i + 1;
            self.publisher
                .publish_f64(
                    &format!("{}/Ac/L{label}/Voltage", self.device.host_name),
                    phase.voltage,
                    "V",
                    2,
                )
                .await;
            self.publisher
                .publish_f64(
                    &format!("{}/Ac/L{label}/Current", self.device.host_name),
                    phase.current,
                    "A",
                    3,
                )
                .await;
            self.publisher
                .publish_f64(
                    &format!("{}/Ac/L{label}/Power", self.device.host_name),
                    phase.power,
                    "W",
                    0,
                )
                .await;
        }
        self.publisher
            .publish_f64(
                &format!("{}/Ac/Energy/Forward", self.device.host_name),
                r.energy_total_wh as f64,
                "kWh",
                0,
            )
            .await;
        self.publisher
            .publish_f64(
                &format!("{}/History/Daily/0/Yield", self.device.host_name),
                r.energy_today_wh as f64,
                "kWh",
                0,
            )
            .await;
        for (i, s) in r.strings.iter().enumerate() {
            self.publisher
                .publish_f64(
                    &format!("{}/Pv/{i}/Voltage", self.device.host_name),
                    s.voltage,
                    "V",
                    2,
                )
                .await;
            self.publisher
                .publish_f64(
                    &format!("{}/Pv/{i}/Current", self.device.host_name),
                    s.current,
                    "A",
                    3,
                )
                .await;
            self.publisher
                .publish_f64(
                    &format!("{}/Pv/{i}/Power", self.device.host_name),
                    s.power,
                    "W",
                    0,
                )
                .await;
        }
        let (dc_current, dc_voltage) = aggregate_dc(&r.strings);
        self.publisher
            .publish_f64(
                &format!("{}/Pv/Aggregate/Current", self.device.host_name),
                dc_current,
                "A",
                3,
            )
            .await;
        self.publisher
            .publish_f64(
                &format!("{}/Pv/Aggregate/Voltage", self.device.host_name),
                dc_voltage,
                "V",
                2,
            )
            .await;
        self.publisher
            .publish_f64(
                &format!("{}/Temperature", self.device.host_name),
                r.temperature_c,
                "C",
                1,
            )
            .await;
        self.publisher
            .publish_text(
                &format!("{}/StatusCode", self.device.host_name),
                &status_text(r.operating_condition, r.operating_state, r.status_code),
            )
            .await;
        self.publisher
            .publish_bool(&format!("{}/LoggedIn", self.device.host_name), r.logged_in)
            .await;
    }
}
