//! Region configuration and process-wide coordinator settings.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{CoordError, CoordResult};

/// A side-effect-free predicate evaluated against a cached value's raw
/// payload before it is served from either tier. Returning `false` forces
/// the entry to be treated as a miss even though it has not expired.
pub type ExpireCondition = Arc<dyn Fn(&str, &str, &str) -> bool + Send + Sync>;

/// Per-region cache policy.
///
/// Regions are registered once, by name, before first use. A second
/// registration under the same name is a configuration mistake, not a
/// update: it is logged as a conflicting re-registration and the original
/// configuration is kept, matching "first registration wins" semantics that
/// a growing service relies on (whichever module initializes the region
/// first gets to define its shape).
#[derive(Clone)]
pub struct RegionConfig {
    /// Region name, used as a namespace prefix for generated keys.
    pub name: String,
    /// Enable the in-process L1 tier for this region.
    pub l1_enabled: bool,
    /// Time-to-live applied to L1 entries.
    pub l1_ttl: Duration,
    /// Approximate maximum number of entries held in L1.
    pub l1_capacity: u64,
    /// Enable the remote L2 tier for this region.
    pub l2_enabled: bool,
    /// Time-to-live applied to L2 entries.
    pub l2_ttl: Duration,
    /// When the remote store is unavailable, serve stale L1 entries instead
    /// of failing the read.
    pub local_as_fallback: bool,
    /// Optional predicate re-checked on every read; see [`ExpireCondition`].
    pub expire_condition: Option<ExpireCondition>,
    /// Cache "loader returned nothing" as a null sentinel instead of not
    /// caching at all, to avoid hammering the loader for keys that are
    /// legitimately absent.
    pub cache_nulls: bool,
    /// Time-to-live applied specifically to null-sentinel entries.
    pub null_ttl: Duration,
    /// Require a fencing token on every write to this region.
    pub fenced: bool,
}

impl std::fmt::Debug for RegionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionConfig")
            .field("name", &self.name)
            .field("l1_enabled", &self.l1_enabled)
            .field("l1_ttl", &self.l1_ttl)
            .field("l1_capacity", &self.l1_capacity)
            .field("l2_enabled", &self.l2_enabled)
            .field("l2_ttl", &self.l2_ttl)
            .field("local_as_fallback", &self.local_as_fallback)
            .field("expire_condition", &self.expire_condition.is_some())
            .field("cache_nulls", &self.cache_nulls)
            .field("null_ttl", &self.null_ttl)
            .field("fenced", &self.fenced)
            .finish()
    }
}

impl RegionConfig {
    /// Start a builder for a region named `name` with the crate defaults.
    pub fn builder(name: impl Into<String>) -> RegionConfigBuilder {
        RegionConfigBuilder {
            config: RegionConfig {
                name: name.into(),
                l1_enabled: true,
                l1_ttl: Duration::from_secs(300),
                l1_capacity: 10_000,
                l2_enabled: true,
                l2_ttl: Duration::from_secs(3600),
                local_as_fallback: false,
                expire_condition: None,
                cache_nulls: false,
                null_ttl: Duration::from_secs(30),
                fenced: false,
            },
        }
    }
}

/// Fluent builder for [`RegionConfig`].
pub struct RegionConfigBuilder {
    config: RegionConfig,
}

impl RegionConfigBuilder {
    /// Toggle the L1 tier and set its TTL/capacity.
    pub fn l1(mut self, enabled: bool, ttl: Duration, capacity: u64) -> Self {
        self.config.l1_enabled = enabled;
        self.config.l1_ttl = ttl;
        self.config.l1_capacity = capacity;
        self
    }

    /// Toggle the L2 tier and set its TTL.
    pub fn l2(mut self, enabled: bool, ttl: Duration) -> Self {
        self.config.l2_enabled = enabled;
        self.config.l2_ttl = ttl;
        self
    }

    /// Serve stale L1 entries when the remote tier is unreachable.
    pub fn local_as_fallback(mut self, enabled: bool) -> Self {
        self.config.local_as_fallback = enabled;
        self
    }

    /// Install an [`ExpireCondition`] predicate.
    pub fn expire_condition(mut self, predicate: ExpireCondition) -> Self {
        self.config.expire_condition = Some(predicate);
        self
    }

    /// Cache loader-absent results as null sentinels with the given TTL.
    pub fn cache_nulls(mut self, ttl: Duration) -> Self {
        self.config.cache_nulls = true;
        self.config.null_ttl = ttl;
        self
    }

    /// Require fencing tokens on writes to this region.
    pub fn fenced(mut self, enabled: bool) -> Self {
        self.config.fenced = enabled;
        self
    }

    /// Finish building.
    pub fn build(self) -> RegionConfig {
        self.config
    }
}

/// Registry of region configurations, shared by the cache coordinator.
///
/// First registration wins. A later call to [`RegionRegistry::register`]
/// with the same name logs a warning and leaves the existing configuration
/// in place, since two modules disagreeing about a region's shape is almost
/// always a wiring bug rather than an intentional override.
#[derive(Default)]
pub struct RegionRegistry {
    regions: DashMap<String, RegionConfig>,
}

impl RegionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            regions: DashMap::new(),
        }
    }

    /// Register a region, or warn and keep the existing one if the name is
    /// already taken.
    pub fn register(&self, config: RegionConfig) {
        match self.regions.entry(config.name.clone()) {
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(config);
            }
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                log::warn!(
                    "region '{}' already registered, ignoring conflicting re-registration",
                    existing.get().name
                );
            }
        }
    }

    /// Fetch a previously registered region's configuration.
    pub fn get(&self, name: &str) -> CoordResult<RegionConfig> {
        self.regions
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoordError::Region(format!("region '{name}' is not registered")))
    }

    /// True if a region with this name has been registered.
    pub fn contains(&self, name: &str) -> bool {
        self.regions.contains_key(name)
    }
}

/// Process-wide settings for wiring up a coordinator: where the remote
/// substrate lives and how this process identifies itself on the
/// invalidation bus and in lock ownership checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordConfig {
    /// Connection string for the remote KV/pub-sub substrate.
    pub redis_url: String,
    /// Channel name used for cache invalidation broadcast.
    pub invalidation_channel: String,
    /// Default lock lease duration when a caller doesn't specify one.
    #[serde(with = "duration_millis")]
    pub default_lease: Duration,
    /// Minimum gap enforced between `lock-at-most-for` and
    /// `lock-at-least-for` before a configuration warning is logged.
    #[serde(with = "duration_millis")]
    pub min_lock_window: Duration,
}

impl Default for CoordConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1/".to_string(),
            invalidation_channel: "coordkit:invalidate".to_string(),
            default_lease: Duration::from_secs(30),
            min_lock_window: Duration::from_millis(0),
        }
    }
}

impl CoordConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &str) -> CoordResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CoordError::Config(format!("reading {path}: {e}")))?;
        serde_json::from_str(&contents).map_err(|e| CoordError::Config(e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> CoordResult<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| CoordError::Config(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| CoordError::Config(format!("writing {path}: {e}")))
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
