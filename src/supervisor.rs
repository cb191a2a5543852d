//! Ties the discovery scanner, identifier and per-device pollers together
//! and exposes the shared state the HTTP surface reads from.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::arbiter::Arbiter;
use crate::config::AppConfig;
use crate::discovery::NetworkScanner;
use crate::identifier::{self, DeviceInfo};
use crate::modbus::{sim::SimTransport, AnyTransport, Transport};
use crate::poller::Poller;
use crate::publish::TreePublisher;
use crate::settings::{DeviceSettings, InMemorySettingsStore, SettingsStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub publisher: Arc<TreePublisher>,
    pub settings: Arc<InMemorySettingsStore>,
    pub arbiter: Arc<Arbiter>,
    pub devices: Arc<RwLock<HashMap<String, DeviceInfo>>>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let settings = InMemorySettingsStore::new(config.discovery.enabled);
        Self {
            config: Arc::new(config),
            publisher: Arc::new(TreePublisher::new()),
            settings: Arc::new(settings),
            arbiter: Arc::new(Arbiter::new()),
            devices: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

fn new_transport() -> AnyTransport {
    #[cfg(feature = "modbus")]
    {
        AnyTransport::Tcp(crate::modbus::tcp::TcpTransport::new())
    }
    #[cfg(not(feature = "modbus"))]
    {
        AnyTransport::Sim(SimTransport::new())
    }
}

/// Identify `host:port` and, on success, spawn a dedicated poller task for
/// it, registering the result with the arbiter and device registry.
async fn bring_up_device(state: AppState, host: String, port: u16) {
    let transport = new_transport();
    if let Err(e) = transport.connect(&host, port).await {
        warn!(%host, error = %e, "could not connect for identification");
        return;
    }

    let identify_result = identifier::identify(
        &transport,
        &host,
        port,
        state.config.modbus.unit_id,
        state.config.modbus.grid_code,
    )
    .await;

    let device = match identify_result {
        Ok(d) => d,
        Err(e) => {
            warn!(%host, error = %e, "identification failed");
            transport.disconnect().await;
            return;
        }
    };

    info!(%host, product = %device.product_name, "identified device");
    state
        .devices
        .write()
        .await
        .insert(host.clone(), device.clone());

    let (tx, rx) = mpsc::channel(4);
    state.arbiter.register(&host, tx, device.logged_in).await;

    let grid_code = state.config.modbus.grid_code;
    let publisher = state.publisher.clone();
    let host_for_task = host.clone();
    tokio::spawn(async move {
        let poller = Poller::new(Arc::new(transport), publisher, device, grid_code, rx);
        poller.run().await;
        warn!(host = %host_for_task, "poller task exited");
    });
}

/// Scan the configured ranges once, identifying and spawning pollers for
/// any new host discovered.
async fn run_discovery_pass(state: AppState) {
    if state.config.discovery.scan_ranges.is_empty() {
        return;
    }
    let scanner = NetworkScanner::default();
    for range in &state.config.discovery.scan_ranges {
        match scanner.scan_range(range).await {
            Ok(found) => {
                for (ip, port) in found {
                    let host = ip.to_string();
                    if state.devices.read().await.contains_key(&host) {
                        continue;
                    }
                    state
                        .settings
                        .add_device(DeviceSettings {
                            host: host.clone(),
                            port,
                            phase_count: None,
                        })
                        .await;
                    tokio::spawn(bring_up_device(state.clone(), host, port));
                }
            }
            Err(e) => warn!(%range, error = %e, "discovery scan failed"),
        }
    }
}

/// Start pollers for every statically configured device, then loop
/// periodic discovery scans for the lifetime of the process.
pub async fn run(state: AppState) {
    for device in &state.config.devices {
        tokio::spawn(bring_up_device(
            state.clone(),
            device.host.clone(),
            device.port,
        ));
    }

    if !state.config.discovery.enabled {
        return;
    }

    let interval = Duration::from_secs(state.config.discovery.scan_interval_secs.max(1));
    loop {
        run_discovery_pass(state.clone()).await;
        tokio::time::sleep(interval).await;
    }
}
