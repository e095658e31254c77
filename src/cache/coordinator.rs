//! The cache coordinator: wires the local tier, remote tier, serializer,
//! fencing counter, and invalidation bus together into the `get` /
//! `get_or_load` / `put` / `put_fenced` / `invalidate*` surface applications
//! actually call.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::cache::invalidation::{InvalidationBus, WILDCARD_KEY};
use crate::cache::remote::RemoteTier;
use crate::cache::tier::LocalTier;
use crate::config::{CoordConfig, RegionConfig, RegionRegistry};
use crate::error::{CoordError, CoordResult};
use crate::fencing::{FencingCounter, FencingToken};
use crate::keygen::KeyGenerator;
use crate::kv::RemoteKv;
use crate::serializer::{Serializer, Slot};

/// Result of checking a single tier's raw bytes against the region's
/// `ExpireCondition`, if any.
enum Lookup<V> {
    /// The predicate rejected the cached value; both tiers must be evicted
    /// and the caller must behave as though this were a miss.
    ExpiredByCondition,
    /// A usable result: `Some(v)` for a real value, `None` for a cached
    /// null sentinel.
    Found(Option<V>),
}

#[derive(Clone)]
enum LoadOutcome {
    /// Bytes to persist into both tiers (a real encoded value).
    Bytes(Vec<u8>),
    /// The loader found nothing and this region caches that as a sentinel.
    CachedNull,
    /// The loader found nothing and this region does not cache nulls.
    Uncached,
}

/// Coordinates the L1/L2 cache tiers for every registered region.
///
/// One coordinator is normally constructed per process and shared behind an
/// `Arc`; it owns the background task that listens for invalidation events
/// from other processes for as long as it's alive.
pub struct CacheCoordinator {
    regions: Arc<RegionRegistry>,
    local_tiers: DashMap<String, Arc<LocalTier>>,
    remote: RemoteTier,
    bus: Arc<InvalidationBus>,
    fencing: FencingCounter,
    keygen: KeyGenerator,
    inflight: DashMap<String, Arc<OnceCell<Result<LoadOutcome, CoordError>>>>,
    _invalidation_listener: tokio::task::JoinHandle<()>,
}

impl CacheCoordinator {
    /// Build a coordinator over `kv`, sharing `regions` and starting the
    /// background invalidation listener.
    pub async fn new(
        config: &CoordConfig,
        kv: Arc<dyn RemoteKv>,
        regions: Arc<RegionRegistry>,
    ) -> CoordResult<Arc<Self>> {
        let originator_id = Uuid::new_v4();
        let bus = Arc::new(InvalidationBus::new(
            kv.clone(),
            config.invalidation_channel.clone(),
            originator_id,
        ));

        // `DashMap<K, Arc<V>>` clones cheaply: each entry is an `Arc` bump,
        // not a deep copy. The listener closure gets its own handle onto
        // the same backing tiers so it can evict on remote events without
        // capturing the coordinator, which doesn't exist yet at this point.
        let local_tiers: DashMap<String, Arc<LocalTier>> = DashMap::new();
        let listener_tiers = local_tiers.clone();
        let listener_regions = regions.clone();
        let listener_handle = bus
            .listen(move |region, key| {
                apply_remote_invalidation(&listener_tiers, &listener_regions, &region, &key);
            })
            .await?;

        Ok(Arc::new(Self {
            regions,
            local_tiers,
            remote: RemoteTier::new(kv.clone()),
            bus,
            fencing: FencingCounter::new(kv),
            keygen: KeyGenerator::new(),
            inflight: DashMap::new(),
            _invalidation_listener: listener_handle,
        }))
    }

    fn local_tier(&self, cfg: &RegionConfig) -> Arc<LocalTier> {
        self.local_tiers
            .entry(cfg.name.clone())
            .or_insert_with(|| Arc::new(LocalTier::new(cfg.l1_capacity)))
            .clone()
    }

    fn storage_key(&self, region: &str, key: &str) -> String {
        format!("cache:{region}:{key}")
    }

    /// Decodes `raw` and, for a real value, consults the region's
    /// `ExpireCondition` against the *decoded* value -- never the raw wire
    /// envelope, which callers writing a business-logic predicate have no
    /// way to parse themselves. The predicate returning `true` means the
    /// value is expired and must be evicted; `false` means it is still
    /// live.
    fn evaluate<V: DeserializeOwned + std::fmt::Debug>(
        &self,
        serializer: &Serializer<V>,
        cfg: &RegionConfig,
        region: &str,
        key: &str,
        raw: &[u8],
    ) -> CoordResult<Lookup<V>> {
        match serializer.decode(raw)? {
            Slot::Null => Ok(Lookup::Found(None)),
            Slot::Value(v) => {
                if let Some(predicate) = &cfg.expire_condition {
                    let rendered = format!("{v:?}");
                    if predicate(region, key, &rendered) {
                        return Ok(Lookup::ExpiredByCondition);
                    }
                }
                Ok(Lookup::Found(Some(v)))
            }
        }
    }

    /// Read L2, downgrading an availability hazard to a plain miss when the
    /// region allows serving stale/absent L1 in place of a remote error.
    async fn l2_get(&self, cfg: &RegionConfig, storage_key: &str) -> CoordResult<Option<Vec<u8>>> {
        match self.remote.get(storage_key).await {
            Ok(v) => Ok(v),
            Err(err) if cfg.local_as_fallback && err.is_availability_hazard() => {
                log::warn!(
                    "L2 unreachable for {storage_key}, falling back to L1-only per local_as_fallback: {err}"
                );
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn evict_both_tiers(&self, cfg: &RegionConfig, region: &str, key: &str) -> CoordResult<()> {
        if cfg.l1_enabled {
            if let Some(tier) = self.local_tiers.get(region) {
                tier.remove(key);
            }
        }
        if cfg.l2_enabled {
            self.remote.remove(&self.storage_key(region, key)).await?;
        }
        Ok(())
    }

    /// Read-only lookup: consults L1 then L2, never invokes a loader.
    /// Returns `None` both for a true miss and for a cached null sentinel;
    /// callers that need to tell the two apart should use `get_or_load`.
    /// A value whose `ExpireCondition` now rejects it is evicted from both
    /// tiers before `None` is returned.
    pub async fn get<V>(&self, region: &str, key: &str) -> CoordResult<Option<V>>
    where
        V: DeserializeOwned + std::fmt::Debug + Send + Sync + 'static,
    {
        let cfg = self.regions.get(region)?;
        let serializer: Serializer<V> = Serializer::new();

        if cfg.l1_enabled {
            if let Some(raw) = self.local_tier(&cfg).get(key).await {
                match self.evaluate(&serializer, &cfg, region, key, &raw)? {
                    Lookup::ExpiredByCondition => {
                        self.evict_both_tiers(&cfg, region, key).await?;
                        return Ok(None);
                    }
                    Lookup::Found(v) => return Ok(v),
                }
            }
        }

        if cfg.l2_enabled {
            let storage_key = self.storage_key(region, key);
            if let Some(raw) = self.l2_get(&cfg, &storage_key).await? {
                match self.evaluate(&serializer, &cfg, region, key, &raw)? {
                    Lookup::ExpiredByCondition => {
                        self.evict_both_tiers(&cfg, region, key).await?;
                        return Ok(None);
                    }
                    Lookup::Found(v) => {
                        if cfg.l1_enabled {
                            self.local_tier(&cfg).insert(key.to_string(), Arc::from(raw.as_slice()), cfg.l1_ttl).await;
                        }
                        return Ok(v);
                    }
                }
            }
        }

        Ok(None)
    }

    /// Fetch from cache, falling back to `loader` on a miss.
    ///
    /// Concurrent callers for the same `(region, key)` share exactly one
    /// execution of `loader`: the first to reach the single-flight slot
    /// runs it, everyone else -- in this process -- awaits that call's
    /// result instead of running their own. L1 and L2 are inspected before
    /// the slot is entered, since a plain cache hit needs no coalescing;
    /// only the loader itself, which may be expensive, is protected from a
    /// stampede.
    pub async fn get_or_load<V, F, Fut>(&self, region: &str, key: &str, loader: F) -> CoordResult<Option<V>>
    where
        V: Serialize + DeserializeOwned + std::fmt::Debug + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CoordResult<Option<V>>> + Send + 'static,
    {
        let cfg = self.regions.get(region)?;
        let serializer: Serializer<V> = Serializer::new();

        if cfg.l1_enabled {
            if let Some(raw) = self.local_tier(&cfg).get(key).await {
                match self.evaluate(&serializer, &cfg, region, key, &raw)? {
                    Lookup::ExpiredByCondition => self.evict_both_tiers(&cfg, region, key).await?,
                    Lookup::Found(v) => return Ok(v),
                }
            }
        }

        if cfg.l2_enabled {
            let storage_key = self.storage_key(region, key);
            if let Some(raw) = self.l2_get(&cfg, &storage_key).await? {
                match self.evaluate(&serializer, &cfg, region, key, &raw)? {
                    Lookup::ExpiredByCondition => self.evict_both_tiers(&cfg, region, key).await?,
                    Lookup::Found(v) => {
                        if cfg.l1_enabled {
                            self.local_tier(&cfg).insert(key.to_string(), Arc::from(raw.as_slice()), cfg.l1_ttl).await;
                        }
                        return Ok(v);
                    }
                }
            }
        }

        // Both tiers missed (or were evicted by ExpireCondition above).
        // Coalesce on the loader itself: every caller racing for this
        // (region, key) shares one `OnceCell`, and only the first to reach
        // `get_or_try_init` actually runs its closure -- the rest just
        // await the same result. This is also the path that provides
        // coalescing for regions with L1 disabled: the slot is keyed
        // independently of L1 and lives only for the duration of one load,
        // which is enough to absorb a burst of simultaneous callers even
        // though nothing is retained afterward.
        let composite = format!("{region}\u{0}{key}");
        let cell = {
            let entry = self
                .inflight
                .entry(composite.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()));
            entry.value().clone()
        };

        let tier_for_recheck = cfg.l1_enabled.then(|| self.local_tier(&cfg));
        let recheck_key = key.to_string();
        let cfg_for_init = cfg.clone();

        let outcome = cell
            .get_or_try_init(|| async move {
                // Re-check L1: another caller's load may have completed
                // and populated it between this caller's initial miss above
                // and reaching the slot.
                if let Some(tier) = &tier_for_recheck {
                    if let Some(raw) = tier.get(&recheck_key).await {
                        return Ok(LoadOutcome::Bytes(raw.to_vec()));
                    }
                }

                match loader().await? {
                    Some(value) => {
                        let ser: Serializer<V> = Serializer::new();
                        Ok(LoadOutcome::Bytes(ser.encode_value(&value)?))
                    }
                    None if cfg_for_init.cache_nulls => Ok(LoadOutcome::CachedNull),
                    None => Ok(LoadOutcome::Uncached),
                }
            })
            .await
            .map(Clone::clone);

        self.inflight.remove_if(&composite, |_, v| Arc::ptr_eq(v, &cell));

        match outcome? {
            LoadOutcome::Bytes(bytes) => {
                if cfg.l2_enabled {
                    self.remote.set(&self.storage_key(region, key), &bytes, cfg.l2_ttl).await?;
                }
                if cfg.l1_enabled {
                    self.local_tier(&cfg).insert(key.to_string(), Arc::from(bytes.as_slice()), cfg.l1_ttl).await;
                }
                match self.evaluate(&serializer, &cfg, region, key, &bytes)? {
                    Lookup::Found(v) => Ok(v),
                    Lookup::ExpiredByCondition => Ok(None),
                }
            }
            LoadOutcome::CachedNull => {
                let null_bytes = serializer.encode_null();
                if cfg.l2_enabled {
                    self.remote.set(&self.storage_key(region, key), &null_bytes, cfg.null_ttl).await?;
                }
                if cfg.l1_enabled {
                    self.local_tier(&cfg).insert(key.to_string(), Arc::from(null_bytes.as_slice()), cfg.null_ttl).await;
                }
                Ok(None)
            }
            LoadOutcome::Uncached => Ok(None),
        }
    }

    /// Write a value unconditionally, update local tiers immediately, and
    /// broadcast an invalidation so other processes drop their copy.
    pub async fn put<V>(&self, region: &str, key: &str, value: &V) -> CoordResult<()>
    where
        V: Serialize,
    {
        let cfg = self.regions.get(region)?;
        let serializer: Serializer<V> = Serializer::new();
        let bytes = serializer.encode_value(value)?;

        if cfg.l2_enabled {
            self.remote.set(&self.storage_key(region, key), &bytes, cfg.l2_ttl).await?;
        }
        if cfg.l1_enabled {
            self.local_tier(&cfg).insert(key.to_string(), Arc::from(bytes.as_slice()), cfg.l1_ttl).await;
        }

        self.bus.invalidate_key(region, key).await;
        Ok(())
    }

    /// Write a value only if `token` is still the newest fencing token
    /// validated for `(region, key)`. Returns `false` without writing
    /// anything if a newer token has already been accepted.
    pub async fn put_fenced<V>(
        &self,
        region: &str,
        key: &str,
        value: &V,
        token: FencingToken,
    ) -> CoordResult<bool>
    where
        V: Serialize,
    {
        let cfg = self.regions.get(region)?;
        if !cfg.fenced {
            return Err(CoordError::Config(format!(
                "region '{region}' is not configured for fenced writes"
            )));
        }

        if !self.fencing.validate(region, key, token).await {
            log::warn!("rejecting stale fenced write for {region}/{key}, token {}", token.value());
            return Ok(false);
        }

        self.put(region, key, value).await?;
        Ok(true)
    }

    /// Mint the next fencing token for `(region, key)`.
    pub async fn next_fencing_token(&self, region: &str, key: &str) -> CoordResult<FencingToken> {
        self.fencing.next_token(region, key).await
    }

    /// Evict a single key from both tiers and notify other processes.
    pub async fn invalidate(&self, region: &str, key: &str) -> CoordResult<()> {
        let cfg = self.regions.get(region)?;
        self.evict_both_tiers(&cfg, region, key).await?;
        self.bus.invalidate_key(region, key).await;
        Ok(())
    }

    /// Evict the single entry that `(operation_id, arguments)` maps to,
    /// regenerating the exact hash-key via the key generator rather than
    /// scanning for it. The `operation_id` is decoupled from the call site
    /// that triggers invalidation, so code that fills the cache under
    /// operation `"read-x"` can be invalidated from a call site named
    /// `"update-x"` as long as both agree on the arguments.
    pub async fn invalidate_by_operation<A: Serialize + std::fmt::Debug>(
        &self,
        region: &str,
        operation_id: &str,
        arguments: &A,
    ) -> CoordResult<()> {
        let key = self.keygen.key_for(operation_id, arguments);
        self.invalidate(region, &key).await
    }

    /// Clear every L1 entry in a region and notify other processes to do
    /// the same. L2 is deliberately left untouched: scanning and deleting
    /// an entire remote region is expensive, and other processes will
    /// re-validate against L2 naturally as its entries hit their own TTL.
    pub async fn invalidate_region(&self, region: &str) -> CoordResult<()> {
        let cfg = self.regions.get(region)?;
        if cfg.l1_enabled {
            if let Some(tier) = self.local_tiers.get(region) {
                tier.clear();
            }
        }
        self.bus.invalidate_region(region).await;
        Ok(())
    }
}


fn apply_remote_invalidation(
    tiers: &DashMap<String, Arc<LocalTier>>,
    regions: &RegionRegistry,
    region: &str,
    key: &str,
) {
    if !regions.contains(region) {
        return;
    }
    let Some(tier) = tiers.get(region) else {
        return;
    };

    if key == WILDCARD_KEY {
        tier.clear();
    } else {
        tier.remove(key);
    }
}
