//! Distributed mutex and lock-scoped execution.

pub mod scoped;
pub mod service;

pub use scoped::ScopedLock;
pub use service::{LockHandle, LockService};
