//! Remote-backed distributed mutex.
//!
//! Acquisition, release, and lease extension are each a single atomic
//! script evaluation on the remote store (see [`crate::kv::scripts`]), so
//! ownership checks never race with a concurrent holder's own release or
//! renewal.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::CoordResult;
use crate::fencing::FencingToken;
use crate::kv::scripts::{LOCK_ACQUIRE, LOCK_EXTEND, LOCK_RELEASE};
use crate::kv::RemoteKv;

/// A held lock, returned by a successful [`LockService::try_acquire`].
///
/// Dropping this without calling [`LockService::release`] leaves the lock
/// to expire on its own lease; the service never releases on drop, since
/// that would require blocking on an async call from a synchronous
/// destructor.
#[derive(Debug, Clone)]
pub struct LockHandle {
    /// Name of the locked resource.
    pub name: String,
    /// This holder's identity, used for ownership checks on release/extend.
    pub owner_id: Uuid,
    /// Fencing token minted at acquisition time.
    pub token: FencingToken,
}

/// Distributed mutex keyed by resource name.
pub struct LockService {
    kv: Arc<dyn RemoteKv>,
    owner_id: Uuid,
}

impl LockService {
    /// Build a lock service backed by `kv`. `owner_id` identifies this
    /// process across all locks it acquires.
    pub fn new(kv: Arc<dyn RemoteKv>, owner_id: Uuid) -> Self {
        Self { kv, owner_id }
    }

    /// This process's owner id, for diagnostics and tests.
    pub fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    /// Attempt to acquire `name` for `lease`. Returns `None` if another
    /// owner currently holds it, and also if the remote store could not be
    /// reached -- a remote error during acquire is fail-silent, treating an
    /// unreachable lock as indistinguishable from one held elsewhere rather
    /// than propagating the error to the caller.
    pub async fn try_acquire(&self, name: &str, lease: Duration) -> CoordResult<Option<LockHandle>> {
        let lock_key = Self::lock_key(name);
        let token_key = Self::token_key(name);
        let owner = self.owner_id.to_string();

        let result = self
            .kv
            .eval_script_pair(
                &LOCK_ACQUIRE,
                &[&lock_key, &token_key],
                &[owner, lease.as_millis().to_string()],
            )
            .await;

        let (acquired, token) = match result {
            Ok(pair) => pair,
            Err(err) if err.is_availability_hazard() => {
                log::warn!("lock acquire for '{name}' could not reach the remote store, treating as held elsewhere: {err}");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        if acquired == 1 {
            Ok(Some(LockHandle {
                name: name.to_string(),
                owner_id: self.owner_id,
                token: FencingToken(token as u64),
            }))
        } else {
            Ok(None)
        }
    }

    /// Release a previously acquired lock. A no-op (not an error) if the
    /// lease already expired or was released by a call racing this one.
    /// Remote errors are logged and swallowed rather than propagated: the
    /// lease will expire on its own, so failing the caller over a release
    /// that merely couldn't be confirmed would be strictly worse.
    pub async fn release(&self, handle: &LockHandle) -> CoordResult<()> {
        let lock_key = Self::lock_key(&handle.name);
        let owner = handle.owner_id.to_string();
        if let Err(err) = self.kv.eval_script(&LOCK_RELEASE, &[&lock_key], &[owner]).await {
            log::warn!("lock release for '{}' failed, lease will expire on its own: {err}", handle.name);
        }
        Ok(())
    }

    /// Extend a held lock's lease. Fails if ownership has since lapsed
    /// (another owner acquired the lock after this one's lease expired).
    pub async fn extend(&self, handle: &LockHandle, lease: Duration) -> CoordResult<bool> {
        let lock_key = Self::lock_key(&handle.name);
        let owner = handle.owner_id.to_string();
        let result = self
            .kv
            .eval_script(&LOCK_EXTEND, &[&lock_key], &[owner, lease.as_millis().to_string()])
            .await?;
        Ok(result == 1)
    }

    fn lock_key(name: &str) -> String {
        format!("lock:{name}")
    }

    fn token_key(name: &str) -> String {
        format!("lock:{name}:token")
    }
}
