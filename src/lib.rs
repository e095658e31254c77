//! # coordkit
//!
//! Multi-level cache coordination and distributed lock primitives for a
//! modular-monolith service: an in-process cache backed by a shared remote
//! store, and a remote-backed mutex for scheduler-style coordination
//! between replicas of the same process.
//!
//! ## Modules
//!
//! - [`cache`]: the L1/L2 cache coordinator, invalidation bus, and tiers.
//! - [`lock`]: the distributed lock service and lock-scoped execution.
//! - [`keygen`]: deterministic cache key generation from operation id + args.
//! - [`serializer`]: wire encoding, including the null-sentinel convention.
//! - [`fencing`]: monotonic fencing tokens for write ordering.
//! - [`kv`]: the remote KV/pub-sub substrate both subsystems share.
//! - [`config`]: region configuration and process-wide settings.
//! - [`error`]: the shared error and result types.
//!
//! ## Getting started
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use uuid::Uuid;
//!
//! use coordkit::cache::CacheCoordinator;
//! use coordkit::config::{CoordConfig, RegionConfig, RegionRegistry};
//! use coordkit::kv::RedisKv;
//!
//! # async fn example() -> coordkit::error::CoordResult<()> {
//! let config = CoordConfig::default();
//! let kv = Arc::new(RedisKv::connect(&config.redis_url).await?);
//!
//! let regions = Arc::new(RegionRegistry::new());
//! regions.register(
//!     RegionConfig::builder("user-profiles")
//!         .l1(true, Duration::from_secs(60), 10_000)
//!         .l2(true, Duration::from_secs(3600))
//!         .build(),
//! );
//!
//! let cache = CacheCoordinator::new(&config, kv, regions).await?;
//! let profile: Option<String> = cache
//!     .get_or_load("user-profiles", "u:42", || async { Ok(Some("ada".to_string())) })
//!     .await?;
//! # let _ = profile;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod error;
pub mod fencing;
pub mod keygen;
pub mod kv;
pub mod lock;
pub mod serializer;

pub use error::{CoordError, CoordResult};
pub use kv::{RedisKv, RemoteKv};

/// Crate version, exposed for diagnostics/telemetry.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
