//! Exercises `TcpTransport` against a real socket, proving the wire codec
//! (not just `SimTransport`'s in-process stand-in) round-trips correctly.
#![cfg(feature = "modbus")]


use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use modbus_mock_server::MockModbusServer;
use pv_inverter_poller::modbus::tcp::TcpTransport;
use pv_inverter_poller::modbus::Transport;

async fn spawn_server(port: u16) -> Arc<MockModbusServer> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port);
    let server = Arc::new(MockModbusServer::new(addr));
    let spawned = server.clone();
    tokio::spawn(async move {
        let _ = spawned.start().await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    server
}

#[tokio::test]
async fn reads_and_writes_round_trip_over_real_socket() {
    let server = spawn_server(15602).await;
    server.set_holding_registers(30051, &[0, 8001]).await;

    let transport = TcpTransport::with_timeout(Duration::from_secs(1));
    transport.connect("127.0.0.1", 15602).await.unwrap();

    let regs = transport.read_holding_registers(3, 30051, 2).await.unwrap();
    assert_eq!(regs, vec![0, 8001]);

    transport
        .write_multiple_holding_registers(3, 43090, &[0, 1])
        .await
        .unwrap();
    assert_eq!(server.get_holding_register(43090).await, Some(1));
}

#[tokio::test]
async fn connection_reset_surfaces_as_transport_error() {
    let server = spawn_server(15603).await;
    server.set_connection_error(true);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let transport = TcpTransport::with_timeout(Duration::from_millis(500));
    transport.connect("127.0.0.1", 15603).await.unwrap();
    let result = transport.read_holding_registers(3, 30051, 2).await;
    assert!(result.is_err());
}
