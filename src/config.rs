//! Application configuration: TOML file plus `PV_` prefixed environment
//! overrides, loaded through `figment` the way the teacher composes its
//! own `AppConfig` (spec.md §2 "config").

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,

    #[validate(nested)]
    pub modbus: ModbusConfig,

    #[validate(nested)]
    pub discovery: DiscoveryConfig,

    #[validate(nested)]
    pub telemetry: TelemetryConfig,

    /// Statically configured devices, in addition to anything discovery finds.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,

    #[validate(range(min = 1, max = 65535))]
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .context("failed to parse socket address")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ModbusConfig {
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    #[validate(range(min = 0))]
    #[serde(default = "default_grid_code")]
    pub grid_code: u32,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub enabled: bool,

    /// CIDR or dash-range to scan, e.g. "192.168.1.0/24".
    #[serde(default)]
    pub scan_ranges: Vec<String>,

    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub phase_count: Option<u8>,
}

fn default_unit_id() -> u8 {
    3
}
fn default_grid_code() -> u32 {
    1
}
fn default_request_timeout_ms() -> u64 {
    5000
}
fn default_scan_interval_secs() -> u64 {
    300
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_port() -> u16 {
    502
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let config: AppConfig = Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("PV_").split("__"))
            .extract()
            .context("failed to load configuration")?;
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            modbus: ModbusConfig {
                unit_id: default_unit_id(),
                grid_code: default_grid_code(),
                request_timeout_ms: default_request_timeout_ms(),
            },
            discovery: DiscoveryConfig {
                enabled: false,
                scan_ranges: Vec::new(),
                scan_interval_secs: default_scan_interval_secs(),
            },
            telemetry: TelemetryConfig {
                log_level: default_log_level(),
                json: false,
            },
            devices: Vec::new(),
        }
    }
}
