//! Published item tree: the external-facing snapshot of each device's last
//! poll cycle (spec.md §6). Mirrors the teacher's preference for a thin
//! trait over the sink so the HTTP surface and the poller share one
//! contract without either depending on the other's concrete type.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Leaf {
    Number { value: f64, unit: String, precision: u8 },
    Text { value: String },
    Bool { value: bool },
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish_f64(&self, path: &str, value: f64, unit: &str, precision: u8);
    async fn publish_text(&self, path: &str, value: &str);
    async fn publish_bool(&self, path: &str, value: bool);
    async fn snapshot(&self) -> HashMap<String, Leaf>;
}

/// In-memory published tree, keyed by full item path
/// (e.g. `"10.0.0.9/Ac/L1/Voltage"`).
#[derive(Debug, Default)]
pub struct TreePublisher {
    items: RwLock<HashMap<String, Leaf>>,
}

impl TreePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leaves belonging to one device, with the device prefix stripped.
    pub async fn subtree(&self, host: &str) -> HashMap<String, Leaf> {
        let prefix = format!("{host}/");
        self.items
            .read()
            .await
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|rest| (rest.to_string(), v.clone())))
            .collect()
    }
}

#[async_trait]
impl Publisher for TreePublisher {
    async fn publish_f64(&self, path: &str, value: f64, unit: &str, precision: u8) {
        self.items.write().await.insert(
            path.to_string(),
            Leaf::Number {
                value,
                unit: unit.to_string(),
                precision,
            },
        );
    }

    async fn publish_text(&self, path: &str, value: &str) {
        self.items.write().await.insert(
            path.to_string(),
            Leaf::Text {
                value: value.to_string(),
            },
        );
    }

    async fn publish_bool(&self, path: &str, value: bool) {
        self.items
            .write()
            .await
            .insert(path.to_string(), Leaf::Bool { value });
    }

    async fn snapshot(&self) -> HashMap<String, Leaf> {
        self.items.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subtree_strips_device_prefix() {
        let p = TreePublisher::new();
        p.publish_f64("10.0.0.9/Ac/Power", 123.0, "W", 0).await;
        p.publish_f64("10.0.0.10/Ac/Power", 456.0, "W", 0).await;
        let sub = p.subtree("10.0.0.9").await;
        assert!(sub.contains_key("Ac/Power"));
        assert_eq!(sub.len(), 1);
    }

    #[tokio::test]
    async fn last_write_wins() {
        let p = TreePublisher::new();
        p.publish_bool("x/LoggedIn", false).await;
        p.publish_bool("x/LoggedIn", true).await;
        let snap = p.snapshot().await;
        matches!(snap.get("x/LoggedIn"), Some(Leaf::Bool { value: true }));
    }
}
