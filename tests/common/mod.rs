//! In-memory `RemoteKv` double shared by the integration scenarios.
//!
//! Real Lua isn't evaluated here; each atomic script is instead dispatched
//! by comparing the `redis::Script` pointer against the crate's own static
//! script table, which is valid because every script is a distinct
//! `once_cell::sync::Lazy<Script>` with a stable address for the life of the
//! process.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use coordkit::error::CoordResult;
use coordkit::kv::scripts::{FENCE_VALIDATE, LOCK_ACQUIRE, LOCK_EXTEND, LOCK_RELEASE};
use coordkit::kv::{RemoteKv, Subscription};
use dashmap::DashMap;
use tokio::sync::broadcast;

struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

pub struct InMemoryKv {
    store: DashMap<String, StoredValue>,
    counters: DashMap<String, i64>,
    channel: broadcast::Sender<String>,
}

impl InMemoryKv {
    pub fn new() -> Arc<Self> {
        let (channel, _rx) = broadcast::channel(256);
        Arc::new(Self {
            store: DashMap::new(),
            counters: DashMap::new(),
            channel,
        })
    }

    fn live(&self, key: &str) -> Option<Vec<u8>> {
        match self.store.get(key) {
            Some(entry) => {
                if entry.expires_at.map(|at| Instant::now() >= at).unwrap_or(false) {
                    drop(entry);
                    self.store.remove(key);
                    None
                } else {
                    Some(entry.bytes.clone())
                }
            }
            None => None,
        }
    }
}

#[async_trait]
impl RemoteKv for InMemoryKv {
    async fn get(&self, key: &str) -> CoordResult<Option<Vec<u8>>> {
        Ok(self.live(key))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CoordResult<()> {
        self.store.insert(
            key.to_string(),
            StoredValue {
                bytes: value.to_vec(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CoordResult<()> {
        self.store.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str) -> CoordResult<i64> {
        let mut entry = self.counters.entry(key.to_string()).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }

    async fn publish(&self, channel: &str, payload: &str) -> CoordResult<()> {
        let envelope = format!("{channel}\u{1}{payload}");
        let _ = self.channel.send(envelope);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> CoordResult<Subscription> {
        let mut rx = self.channel.subscribe();
        let channel = channel.to_string();
        let (tx, out_rx) = tokio::sync::mpsc::channel(256);

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if let Some((chan, payload)) = envelope.split_once('\u{1}') {
                            if chan == channel {
                                if tx.send(payload.to_string()).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(out_rx, task))
    }

    async fn eval_script(&self, script: &redis::Script, keys: &[&str], args: &[String]) -> CoordResult<i64> {
        if std::ptr::eq(script, &*FENCE_VALIDATE) {
            let guard_key = keys[0].to_string();
            let candidate: i64 = args[0].parse().unwrap();
            let mut current = self.counters.entry(guard_key).or_insert(0);
            return Ok(if candidate >= *current {
                *current = candidate;
                1
            } else {
                0
            });
        }

        if std::ptr::eq(script, &*LOCK_RELEASE) {
            let lock_key = keys[0];
            let owner = &args[0];
            return Ok(match self.live(lock_key) {
                Some(bytes) if bytes == owner.as_bytes() => {
                    self.store.remove(lock_key);
                    1
                }
                _ => 0,
            });
        }

        if std::ptr::eq(script, &*LOCK_EXTEND) {
            let lock_key = keys[0];
            let owner = &args[0];
            let lease_ms: u64 = args[1].parse().unwrap();
            return Ok(match self.live(lock_key) {
                Some(bytes) if bytes == owner.as_bytes() => {
                    self.store.insert(
                        lock_key.to_string(),
                        StoredValue {
                            bytes: owner.as_bytes().to_vec(),
                            expires_at: Some(Instant::now() + Duration::from_millis(lease_ms)),
                        },
                    );
                    1
                }
                _ => 0,
            });
        }

        unreachable!("unexpected script passed to eval_script in test double")
    }

    async fn eval_script_pair(
        &self,
        script: &redis::Script,
        keys: &[&str],
        args: &[String],
    ) -> CoordResult<(i64, i64)> {
        assert!(std::ptr::eq(script, &*LOCK_ACQUIRE), "only lock-acquire returns a pair");

        let lock_key = keys[0];
        let token_key = keys[1];
        let owner = &args[0];
        let lease_ms: u64 = args[1].parse().unwrap();

        if self.live(lock_key).is_some() {
            return Ok((0, 0));
        }

        let mut token = self.counters.entry(token_key.to_string()).or_insert(0);
        *token += 1;
        self.store.insert(
            lock_key.to_string(),
            StoredValue {
                bytes: owner.as_bytes().to_vec(),
                expires_at: Some(Instant::now() + Duration::from_millis(lease_ms)),
            },
        );
        Ok((1, *token))
    }
}
