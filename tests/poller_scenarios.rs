//! End-to-end scenarios driving identification, one poll cycle and a
//! power-limit request together against `SimTransport`.

use pv_inverter_poller::arbiter::Arbiter;
use pv_inverter_poller::identifier::{identify, RetrievalMode};
use pv_inverter_poller::modbus::sim::SimTransport;
use pv_inverter_poller::modbus::u32_to_regs;
use pv_inverter_poller::modbus::Transport;
use pv_inverter_poller::publish::{Publisher, TreePublisher};
use tokio::sync::mpsc;

async fn seed_device(t: &SimTransport) {
    t.set_registers(30051, &[0, 8001]).await;
    t.set_registers(30053, &[0, 9075]).await;
    t.set_registers(30057, &[0, 555]).await;
    t.set_registers(30059, &u32_to_regs(0x0102_0304)).await;
    t.set_registers(30231, &[0, 4000]).await;
    t.set_registers(30837, &[0, 10000]).await;
    t.set_registers(40029, &[0, 307]).await;
    t.set_registers(40133, &[0, 0, 0, 0]).await;
}

#[tokio::test]
async fn identify_then_register_with_arbiter_then_request_power_limit() {
    let transport = SimTransport::new();
    transport.connect("10.0.0.9", 502).await.unwrap();
    seed_device(&transport).await;

    let info = identify(&transport, "10.0.0.9", 502, 3, 1)
        .await
        .expect("identification succeeds");
    assert_eq!(info.retrieval_mode, RetrievalMode::ReadWrite);

    let arbiter = Arbiter::new();
    let (tx, mut rx) = mpsc::channel(4);
    arbiter.register("10.0.0.9", tx, info.logged_in).await;

    arbiter
        .request_power_limit("10.0.0.9", 99_999, info.max_power)
        .await
        .expect("request accepted for a logged-in device");

    let cmd = rx.recv().await.expect("command forwarded to poller channel");
    match cmd {
        pv_inverter_poller::arbiter::ArbiterCommand::SetPowerLimit(w) => {
            assert_eq!(w, info.max_power, "request is clamped to max_power");
        }
    }
}

#[tokio::test]
async fn unsupported_device_class_never_reaches_publisher() {
    let transport = SimTransport::new();
    transport.connect("10.0.0.9", 502).await.unwrap();
    transport.set_registers(30051, &[0, 4242]).await;

    let publisher = TreePublisher::new();
    let result = identify(&transport, "10.0.0.9", 502, 3, 1).await;
    assert!(result.is_err());
    assert!(publisher.snapshot().await.is_empty());
}

#[tokio::test]
async fn grid_code_zero_yields_read_only_device_with_no_power_limit_control() {
    let transport = SimTransport::new();
    transport.connect("10.0.0.9", 502).await.unwrap();
    seed_device(&transport).await;

    let info = identify(&transport, "10.0.0.9", 502, 3, 0)
        .await
        .expect("identification still succeeds");
    assert_eq!(info.retrieval_mode, RetrievalMode::ReadOnly);

    let arbiter = Arbiter::new();
    let (tx, _rx) = mpsc::channel(1);
    arbiter.register("10.0.0.9", tx, info.logged_in).await;

    let err = arbiter
        .request_power_limit("10.0.0.9", 1000, info.max_power)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        pv_inverter_poller::arbiter::ArbiterError::NotLoggedIn(_)
    ));
}
