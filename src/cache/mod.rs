//! Multi-level cache: an in-process L1 tier backed by a remote L2 tier,
//! coordinated so that a thundering herd of callers for the same missing
//! key runs the underlying loader exactly once, writes can be fenced
//! against stale writers, and invalidations propagate to every other
//! process sharing the region.
//!
//! ## Tiers
//!
//! - **L1** ([`tier::LocalTier`]): bounded, per-process, approximate LRU
//!   with per-entry TTL. Fast, but only as fresh as the last invalidation
//!   this process has received.
//! - **L2** ([`remote::RemoteTier`]): shared across every process, backed
//!   by the remote KV substrate in [`crate::kv`].
//!
//! ## Coordination
//!
//! [`coordinator::CacheCoordinator`] is the entry point applications use. It
//! wires the tiers together with the [`crate::serializer::Serializer`] (for
//! the null-sentinel convention), [`crate::fencing::FencingCounter`] (for
//! fenced writes), and [`invalidation::InvalidationBus`] (for distributed
//! invalidation), and owns the per-`(region, key)` single-flight coalescing
//! that keeps a cache-miss stampede from hitting the loader more than once.

pub mod coordinator;
pub mod invalidation;
pub mod remote;
pub mod tier;

pub use coordinator::CacheCoordinator;
pub use invalidation::InvalidationBus;
