//! In-memory transport used by the daemon in the absence of real hardware
//! and by the integration test suite to script a device's register bank
//! without opening a socket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Transport, TransportError};

/// A scripted Modbus holding-register bank.
///
/// Tests populate registers with [`SimTransport::set_registers`] before
/// spawning a poller/identifier against it, and can flip
/// [`SimTransport::fail_next`] / [`SimTransport::set_connected`] to exercise
/// the retry and disconnect paths.
#[derive(Debug, Default)]
pub struct SimTransport {
    registers: RwLock<HashMap<u16, u16>>,
    connected: AtomicBool,
    /// When `Some`, the next request fails with this error instead of
    /// touching `registers`.
    next_failure: RwLock<Option<TransportError>>,
}

impl SimTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_register(&self, addr: u16, value: u16) {
        self.registers.write().await.insert(addr, value);
    }

    pub async fn set_registers(&self, start: u16, values: &[u16]) {
        let mut regs = self.registers.write().await;
        for (i, v) in values.iter().enumerate() {
            regs.insert(start + i as u16, *v);
        }
    }

    pub async fn get_register(&self, addr: u16) -> Option<u16> {
        self.registers.read().await.get(&addr).copied()
    }

    /// Arm a one-shot failure for the next request issued against this transport.
    pub async fn fail_next(&self, err: TransportError) {
        *self.next_failure.write().await = Some(err);
    }

    pub fn force_disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn connect(&self, _host: &str, _port: u16) -> Result<(), TransportError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn read_holding_registers(
        &self,
        _unit: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        if let Some(err) = self.next_failure.write().await.take() {
            return Err(err);
        }
        if !self.is_connected().await {
            return Err(TransportError::TransportError("not connected".into()));
        }
        let regs = self.registers.read().await;
        Ok((0..count)
            .map(|i| regs.get(&(start + i)).copied().unwrap_or(0))
            .collect())
    }

    async fn write_multiple_holding_registers(
        &self,
        _unit: u8,
        start: u16,
        values: &[u16],
    ) -> Result<(), TransportError> {
        if let Some(err) = self.next_failure.write().await.take() {
            return Err(err);
        }
        if !self.is_connected().await {
            return Err(TransportError::TransportError("not connected".into()));
        }
        let mut regs = self.registers.write().await;
        for (i, v) in values.iter().enumerate() {
            regs.insert(start + i as u16, *v);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_returns_zero_for_unset_registers() {
        let t = SimTransport::new();
        t.connect("sim", 502).await.unwrap();
        let regs = t.read_holding_registers(1, 30051, 2).await.unwrap();
        assert_eq!(regs, vec![0, 0]);
    }

    #[tokio::test]
    async fn read_length_matches_requested_count() {
        let t = SimTransport::new();
        t.connect("sim", 502).await.unwrap();
        t.set_registers(30051, &[0, 8001]).await;
        let regs = t.read_holding_registers(1, 30051, 2).await.unwrap();
        assert_eq!(regs.len(), 2);
        assert_eq!(regs, vec![0, 8001]);
    }

    #[tokio::test]
    async fn fail_next_returns_error_once() {
        let t = SimTransport::new();
        t.connect("sim", 502).await.unwrap();
        t.fail_next(TransportError::Timeout).await;
        let err = t.read_holding_registers(1, 30051, 2).await.unwrap_err();
        assert_eq!(err, TransportError::Timeout);
        // Second call succeeds.
        assert!(t.read_holding_registers(1, 30051, 2).await.is_ok());
    }

    #[tokio::test]
    async fn disconnected_transport_fails_requests() {
        let t = SimTransport::new();
        t.connect("sim", 502).await.unwrap();
        t.force_disconnect();
        assert!(t.read_holding_registers(1, 30051, 2).await.is_err());
    }
}
