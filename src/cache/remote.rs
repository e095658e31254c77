//! L2 cache tier: thin wrapper over the remote KV substrate that applies
//! region TTLs and key namespacing.

use std::sync::Arc;
use std::time::Duration;

use crate::error::CoordResult;
use crate::kv::RemoteKv;

/// Remote-backed cache tier for a region.
pub struct RemoteTier {
    kv: Arc<dyn RemoteKv>,
}

impl RemoteTier {
    /// Build a remote tier over `kv`.
    pub fn new(kv: Arc<dyn RemoteKv>) -> Self {
        Self { kv }
    }

    /// Fetch the raw payload stored for `storage_key`.
    pub async fn get(&self, storage_key: &str) -> CoordResult<Option<Vec<u8>>> {
        self.kv.get(storage_key).await
    }

    /// Store a raw payload with a TTL.
    pub async fn set(&self, storage_key: &str, payload: &[u8], ttl: Duration) -> CoordResult<()> {
        self.kv.set(storage_key, payload, Some(ttl)).await
    }

    /// Remove an entry.
    pub async fn remove(&self, storage_key: &str) -> CoordResult<()> {
        self.kv.delete(storage_key).await
    }
}
