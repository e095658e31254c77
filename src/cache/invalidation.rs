//! Distributed invalidation bus.
//!
//! A single pub/sub channel carries invalidation events to every process
//! sharing a region. Messages identify their originator so a process never
//! reacts to its own broadcast -- without that, a local eviction would
//! round-trip through the remote bus and evict the entry a second time for
//! no reason, and under high invalidation volume that feedback loop adds up.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoordResult;
use crate::kv::RemoteKv;

/// Key wildcard meaning "every entry in this region".
pub const WILDCARD_KEY: &str = "*";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InvalidationMessage {
    region: String,
    key: String,
    originator: Uuid,
}

/// Publishes and receives invalidation events over the remote substrate.
pub struct InvalidationBus {
    kv: Arc<dyn RemoteKv>,
    channel: String,
    originator_id: Uuid,
}

impl InvalidationBus {
    /// Build a bus over `kv`, identifying this process as `originator_id`
    /// on the given `channel`.
    pub fn new(kv: Arc<dyn RemoteKv>, channel: impl Into<String>, originator_id: Uuid) -> Self {
        Self { kv, channel: channel.into(), originator_id }
    }

    /// This process's originator id, for tests and diagnostics.
    pub fn originator_id(&self) -> Uuid {
        self.originator_id
    }

    /// Publish an invalidation for a single key in `region`.
    ///
    /// Availability hazards here (the publish itself failing) are logged
    /// and swallowed rather than surfaced: the local write that triggered
    /// this invalidation has already happened, and failing the caller's
    /// write because a best-effort broadcast didn't land would be strictly
    /// worse than letting other processes catch up on their own TTL.
    pub async fn invalidate_key(&self, region: &str, key: &str) {
        self.publish(region, key).await;
    }

    /// Publish an invalidation for every key in `region`.
    pub async fn invalidate_region(&self, region: &str) {
        self.publish(region, WILDCARD_KEY).await;
    }

    async fn publish(&self, region: &str, key: &str) {
        let message = InvalidationMessage {
            region: region.to_string(),
            key: key.to_string(),
            originator: self.originator_id,
        };

        let payload = match serde_json::to_string(&message) {
            Ok(p) => p,
            Err(err) => {
                log::error!("failed to encode invalidation message, dropping: {err}");
                return;
            }
        };

        if let Err(err) = self.kv.publish(&self.channel, &payload).await {
            log::warn!("failed to publish invalidation for {region}/{key}: {err}");
        }
    }

    /// Subscribe to the channel and invoke `on_invalidate(region, key)` for
    /// every event from another process. Malformed messages are logged and
    /// skipped; they never kill the subscription. Returns once the
    /// subscription is established; delivery happens on a background task
    /// for the lifetime of the returned handle.
    pub async fn listen<F>(&self, on_invalidate: F) -> CoordResult<tokio::task::JoinHandle<()>>
    where
        F: Fn(String, String) + Send + Sync + 'static,
    {
        let mut subscription = self.kv.subscribe(&self.channel).await?;
        let originator_id = self.originator_id;

        let handle = tokio::spawn(async move {
            while let Some(raw) = subscription.recv().await {
                let message: InvalidationMessage = match serde_json::from_str(&raw) {
                    Ok(m) => m,
                    Err(err) => {
                        log::warn!("dropping malformed invalidation message: {err}");
                        continue;
                    }
                };

                if message.originator == originator_id {
                    continue;
                }

                on_invalidate(message.region, message.key);
            }
        });

        Ok(handle)
    }
}
