//! One-shot device identification (spec.md §4.2).
//!
//! Drives the fixed read/write sequence against registers 30051-40210 and
//! classifies the device, or fails. Owns the transport exclusively until it
//! finishes; the poller gets a fresh transport afterwards (spec.md §3
//! "Lifecycle").

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::modbus::{u32_from_regs, u32_to_regs, Transport, TransportError};

/// Device class accepted at step 1.
pub const EXPECTED_DEVICE_CLASS: u32 = 8001;

/// Model IDs this crate knows how to poll, and the product name/firmware
/// decoding each one uses (spec.md §9: "factor model-specific register maps
/// into a small data table").
const MODEL_TABLE: &[(u32, &str, FirmwareFormat)] = &[
    (9074, "SMA SB 3000TL-21", FirmwareFormat::Bcd),
    (9075, "SMA SB 4000TL-21", FirmwareFormat::Bcd),
    (9076, "SMA SB 5000TL-21", FirmwareFormat::Bcd),
    (9165, "SMA STP 10000TL-20", FirmwareFormat::Raw32),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FirmwareFormat {
    /// Each of the 4 bytes of the 32-bit word is a BCD-encoded decimal digit pair.
    Bcd,
    /// The 32-bit word is used verbatim.
    Raw32,
}

fn decode_firmware(raw: u32, format: FirmwareFormat) -> String {
    match format {
        FirmwareFormat::Raw32 => format!("0x{raw:08X}"),
        FirmwareFormat::Bcd => {
            let bytes = raw.to_be_bytes();
            let digits: Vec<u8> = bytes
                .iter()
                .map(|b| ((b >> 4) * 10 + (b & 0x0F)))
                .collect();
            format!("{}.{}.{}.{}", digits[0], digits[1], digits[2], digits[3])
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub host_name: String,
    pub port: u16,
    pub network_id: u8,
    pub device_class: u32,
    pub model_id: u32,
    pub product_name: String,
    pub serial_number: String,
    pub firmware_version: String,
    pub phase_count: u8,
    pub max_power: u32,
    pub power_limit_scale: u32,
    pub retrieval_mode: RetrievalMode,
    pub logged_in: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentifyFailure {
    #[error("unsupported device class {0}")]
    UnsupportedClass(u32),
    #[error("unrecognized model id {0}")]
    UnrecognizedModel(u32),
    #[error("transport error during identification: {0}")]
    Transport(TransportError),
    #[error("register length mismatch: expected {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },
}

impl From<TransportError> for IdentifyFailure {
    fn from(e: TransportError) -> Self {
        IdentifyFailure::Transport(e)
    }
}

async fn read_checked(
    transport: &dyn Transport,
    unit: u8,
    register: u16,
    expected_len: usize,
) -> Result<Vec<u16>, IdentifyFailure> {
    let regs = transport
        .read_holding_registers(unit, register, expected_len as u16)
        .await?;
    if regs.len() != expected_len {
        return Err(IdentifyFailure::LengthMismatch {
            expected: expected_len,
            got: regs.len(),
        });
    }
    Ok(regs)
}

/// Number of grid-code write retries before finalizing as read-only
/// (spec.md §4.2 step 10).
const GRID_CODE_WRITE_RETRIES: u32 = 3;

/// Drive the identification sequence of spec.md §4.2 against `transport`,
/// already connected to `host_name:port`.
pub async fn identify(
    transport: &dyn Transport,
    host_name: &str,
    port: u16,
    unit_id: u8,
    grid_code: u32,
) -> Result<DeviceInfo, IdentifyFailure> {
    // Step 1: device class.
    let regs = read_checked(transport, unit_id, 30051, 2).await?;
    let device_class = u32_from_regs(&regs);
    if device_class != EXPECTED_DEVICE_CLASS {
        debug!(device_class, "rejecting device: unexpected device class");
        return Err(IdentifyFailure::UnsupportedClass(device_class));
    }

    // Step 2: model id.
    let regs = read_checked(transport, unit_id, 30053, 2).await?;
    let model_id = u32_from_regs(&regs);
    let (product_name, firmware_format) = MODEL_TABLE
        .iter()
        .find(|(id, _, _)| *id == model_id)
        .map(|(_, name, fmt)| (name.to_string(), *fmt))
        .ok_or(IdentifyFailure::UnrecognizedModel(model_id))?;

    // Step 3: serial number.
    let regs = read_checked(transport, unit_id, 30057, 2).await?;
    let serial_number = u32_from_regs(&regs).to_string();

    // Step 4: firmware/software version.
    let regs = read_checked(transport, unit_id, 30059, 2).await?;
    let firmware_version = decode_firmware(u32_from_regs(&regs), firmware_format);

    // Step 5: nameplate max power (low word of a 32-bit value).
    let regs = read_checked(transport, unit_id, 30231, 2).await?;
    let max_power = u32_from_regs(&regs) & 0xFFFF;

    // Step 6: power-limit scale (low word).
    let regs = read_checked(transport, unit_id, 30837, 2).await?;
    let power_limit_scale = u32_from_regs(&regs) & 0xFFFF;

    // Step 7: inverter status — informational only.
    let _ = read_checked(transport, unit_id, 40029, 2).await?;

    // Step 8: grid voltage/frequency — informational only.
    let _ = read_checked(transport, unit_id, 40133, 4).await?;

    let mut info = DeviceInfo {
        host_name: host_name.to_string(),
        port,
        network_id: unit_id,
        device_class,
        model_id,
        product_name,
        serial_number,
        firmware_version,
        phase_count: 1,
        max_power,
        power_limit_scale,
        retrieval_mode: RetrievalMode::ReadOnly,
        logged_in: false,
    };

    // Steps 9-10: grid-code login, bounded retries.
    let mut accepted = false;
    for attempt in 1..=GRID_CODE_WRITE_RETRIES {
        let halves = u32_to_regs(grid_code);
        transport
            .write_multiple_holding_registers(unit_id, 43090, &halves)
            .await?;
        let regs = read_checked(transport, unit_id, 43090, 2).await?;
        if u32_from_regs(&regs) == 1 {
            accepted = true;
            break;
        }
        warn!(attempt, "grid-code login not yet accepted");
    }

    if !accepted {
        info!(host = host_name, "finalizing as ReadOnly: grid code not accepted");
        return Ok(info);
    }

    // Steps 11-12: assert operating mode = Watt (1077).
    const WATT_MODE: u32 = 1077;
    let halves = u32_to_regs(WATT_MODE);
    transport
        .write_multiple_holding_registers(unit_id, 40210, &halves)
        .await?;
    let regs = read_checked(transport, unit_id, 40210, 2).await?;
    if u32_from_regs(&regs) == WATT_MODE {
        info.retrieval_mode = RetrievalMode::ReadWrite;
        info.logged_in = true;
    }

    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::sim::SimTransport;

    async fn seed_sb4000(t: &SimTransport) {
        t.set_registers(30051, &[0, 8001]).await;
        t.set_registers(30053, &[0, 9075]).await;
        t.set_registers(30057, &[0, (123_456_789u32 & 0xFFFF) as u16]).await; // truncated on purpose in this helper
        t.set_registers(30059, &u32_to_regs(0x0102_0304)).await;
        t.set_registers(30231, &[0, 4000]).await;
        t.set_registers(30837, &[0, 10000]).await;
        t.set_registers(40029, &[0, 0]).await;
        t.set_registers(40133, &[0, 0, 0, 0]).await;
    }

    #[tokio::test]
    async fn happy_path_sb4000_sequence_and_classification() {
        let t = SimTransport::new();
        t.connect("10.0.0.5", 502).await.unwrap();
        seed_sb4000(&t).await;
        // grid-code and op-mode registers accept on first write: the sim
        // transport stores whatever was written, so write-then-read of the
        // accept code works as long as we seed the "accepted" values the
        // write will produce.
        // Emulate an inverter that always reports acceptance after a write
        // by pre-seeding nothing: write_multiple_holding_registers stores
        // the raw written halves, and identify() writes [0,1] for the code
        // 1, so the subsequent read naturally returns 1.

        let info = identify(&t, "10.0.0.5", 502, 3, 1)
            .await
            .expect("identification should succeed");

        assert_eq!(info.product_name, "SMA SB 4000TL-21");
        assert_eq!(info.max_power, 4000);
        assert_eq!(info.power_limit_scale, 10000);
        assert_eq!(info.retrieval_mode, RetrievalMode::ReadWrite);
        assert!(info.logged_in);
    }

    #[tokio::test]
    async fn rejects_on_class_mismatch_without_further_reads() {
        let t = SimTransport::new();
        t.connect("10.0.0.5", 502).await.unwrap();
        t.set_registers(30051, &[0, 1234]).await;
        // Deliberately do not seed 30053+ so a further read would return
        // zeroes rather than error, proving we stop after step 1.
        let err = identify(&t, "10.0.0.5", 502, 3, 1).await.unwrap_err();
        assert_eq!(err, IdentifyFailure::UnsupportedClass(1234));
        assert!(t.get_register(30053).await.is_none());
    }

    #[tokio::test]
    async fn rejects_unknown_model_id() {
        let t = SimTransport::new();
        t.connect("10.0.0.5", 502).await.unwrap();
        t.set_registers(30051, &[0, 8001]).await;
        t.set_registers(30053, &[0, 1111]).await;
        let err = identify(&t, "10.0.0.5", 502, 3, 1).await.unwrap_err();
        assert_eq!(err, IdentifyFailure::UnrecognizedModel(1111));
    }

    #[tokio::test]
    async fn read_only_fallback_when_grid_code_never_accepted() {
        let t = SimTransport::new();
        t.connect("10.0.0.5", 502).await.unwrap();
        seed_sb4000(&t).await;
        // Force every grid-code status read to report 0 by clobbering the
        // register right after each write via repeated failures is hard to
        // script generically; instead seed a transport wrapper that always
        // resets 43090 to 0. Simplicity: set grid_code write value to 0 so
        // the write-then-read naturally reads back 0.
        let info = identify(&t, "10.0.0.5", 502, 3, 0)
            .await
            .expect("identification still succeeds, just read-only");
        assert_eq!(info.retrieval_mode, RetrievalMode::ReadOnly);
        assert!(!info.logged_in);
    }

    #[tokio::test]
    async fn length_mismatch_fails_identification() {
        let t = SimTransport::new();
        t.connect("10.0.0.5", 502).await.unwrap();
        t.set_registers(30051, &[0, 8001]).await;
        t.set_registers(30053, &[0, 9075]).await;
        t.fail_next(TransportError::Timeout).await;
        let err = identify(&t, "10.0.0.5", 502, 3, 1).await.unwrap_err();
        assert_eq!(err, IdentifyFailure::Transport(TransportError::Timeout));
    }
}
