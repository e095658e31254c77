//! Remote key/value and pub-sub substrate used by the cache's L2 tier, the
//! fencing-token guard, and the distributed lock service.

pub mod scripts;

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::Script;

use crate::error::{CoordError, CoordResult};

/// A subscription to a single invalidation channel.
///
/// Backed by a dedicated pub-sub connection and a background task that
/// forwards payloads onto an mpsc channel; the background task is dropped
/// (and the connection closed) when the subscription is dropped.
pub struct Subscription {
    rx: tokio::sync::mpsc::Receiver<String>,
    _task: tokio::task::JoinHandle<()>,
}

impl Subscription {
    /// Wrap an already-running delivery task. Exposed so alternative
    /// `RemoteKv` implementations (test doubles, or substrates other than
    /// Redis) can produce a `Subscription` without going through
    /// `RedisKv::subscribe`.
    pub fn new(rx: tokio::sync::mpsc::Receiver<String>, task: tokio::task::JoinHandle<()>) -> Self {
        Self { rx, _task: task }
    }

    /// Wait for the next message. Returns `None` once the underlying
    /// connection has closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// The remote operations the cache coordinator and lock service need.
///
/// Kept narrow and trait-object-friendly so tests can swap in an in-memory
/// double without standing up a real Redis instance.
#[async_trait]
pub trait RemoteKv: Send + Sync {
    /// Fetch a raw value.
    async fn get(&self, key: &str) -> CoordResult<Option<Vec<u8>>>;

    /// Store a raw value with an optional TTL.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CoordResult<()>;

    /// Delete a key.
    async fn delete(&self, key: &str) -> CoordResult<()>;

    /// Atomically increment a counter, returning its new value.
    async fn incr(&self, key: &str) -> CoordResult<i64>;

    /// Publish a payload on a channel.
    async fn publish(&self, channel: &str, payload: &str) -> CoordResult<()>;

    /// Subscribe to a channel.
    async fn subscribe(&self, channel: &str) -> CoordResult<Subscription>;

    /// Evaluate a script with the given keys and string args, returning a
    /// scalar integer result. Scripts that return a tuple (e.g. lock
    /// acquisition returning `{ok, token}`) use [`RemoteKv::eval_script_pair`].
    async fn eval_script(&self, script: &Script, keys: &[&str], args: &[String]) -> CoordResult<i64>;

    /// Evaluate a script that returns a two-element integer array.
    async fn eval_script_pair(
        &self,
        script: &Script,
        keys: &[&str],
        args: &[String],
    ) -> CoordResult<(i64, i64)>;
}

/// Redis-backed implementation of [`RemoteKv`].
pub struct RedisKv {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisKv {
    /// Connect to `redis_url`, establishing the managed connection used for
    /// ordinary commands. Pub-sub connections are opened separately per
    /// subscription since they can't share a multiplexed connection with
    /// request/response traffic.
    pub async fn connect(redis_url: &str) -> CoordResult<Self> {
        let client = redis::Client::open(redis_url).map_err(CoordError::from)?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(CoordError::from)?;
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl RemoteKv for RedisKv {
    async fn get(&self, key: &str) -> CoordResult<Option<Vec<u8>>> {
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CoordResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis() as u64);
        }
        cmd.query_async(&mut self.conn.clone()).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CoordResult<()> {
        redis::cmd("DEL")
            .arg(key)
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> CoordResult<i64> {
        let value: i64 = redis::cmd("INCR")
            .arg(key)
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(value)
    }

    async fn publish(&self, channel: &str, payload: &str) -> CoordResult<()> {
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> CoordResult<Subscription> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(CoordError::from)?;
        pubsub.subscribe(channel).await.map_err(CoordError::from)?;

        let (tx, rx) = tokio::sync::mpsc::channel(256);
        let task = tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(err) => {
                        log::warn!("dropping invalidation message with unreadable payload: {err}");
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
        });

        Ok(Subscription { rx, _task: task })
    }

    async fn eval_script(&self, script: &Script, keys: &[&str], args: &[String]) -> CoordResult<i64> {
        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(*key);
        }
        for arg in args {
            invocation.arg(arg);
        }
        let result: i64 = invocation
            .invoke_async(&mut self.conn.clone())
            .await
            .map_err(CoordError::from)?;
        Ok(result)
    }

    async fn eval_script_pair(
        &self,
        script: &Script,
        keys: &[&str],
        args: &[String],
    ) -> CoordResult<(i64, i64)> {
        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(*key);
        }
        for arg in args {
            invocation.arg(arg);
        }
        let result: (i64, i64) = invocation
            .invoke_async(&mut self.conn.clone())
            .await
            .map_err(CoordError::from)?;
        Ok(result)
    }
}
