//! Lua scripts evaluated atomically on the remote store.
//!
//! Every script here exists because the operation it performs needs a
//! read-and-conditionally-write step that would race if done as two round
//! trips from the client.

use once_cell::sync::Lazy;
use redis::Script;

/// Acquire a lock and mint its fencing token in one step.
///
/// `KEYS[1]` is the lock key, `KEYS[2]` is the per-lock token counter.
/// `ARGV[1]` is the owner id, `ARGV[2]` is the lease in milliseconds.
/// Returns `{1, token}` on success or `{0, 0}` if already held, so a stale
/// holder can never observe a second token minted for the same acquisition.
pub static LOCK_ACQUIRE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call('EXISTS', KEYS[1]) == 1 then
            return {0, 0}
        end
        local token = redis.call('INCR', KEYS[2])
        redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
        return {1, token}
        "#,
    )
});

/// Release a lock iff it is still owned by the caller.
///
/// `KEYS[1]` is the lock key. `ARGV[1]` is the owner id. Returns `1` if the
/// lock was released, `0` if it was held by someone else or already gone
/// (both are treated as "nothing to do" by the caller, not an error).
pub static LOCK_RELEASE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            redis.call('DEL', KEYS[1])
            return 1
        end
        return 0
        "#,
    )
});

/// Extend a lock's lease iff it is still owned by the caller.
///
/// `KEYS[1]` is the lock key. `ARGV[1]` is the owner id, `ARGV[2]` is the
/// new lease in milliseconds. Returns `1` on success, `0` if ownership no
/// longer matches.
pub static LOCK_EXTEND: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            redis.call('PEXPIRE', KEYS[1], ARGV[2])
            return 1
        end
        return 0
        "#,
    )
});

/// Validate and record a fencing token, rejecting stale writers.
///
/// `KEYS[1]` is the fence-guard key holding the highest token accepted so
/// far. `ARGV[1]` is the candidate token. A candidate greater than or equal
/// to the recorded value is accepted and becomes the new high-water mark;
/// anything older is rejected. Missing guard keys read as `0`, so the first
/// writer for a brand-new key always succeeds.
pub static FENCE_VALIDATE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local current = tonumber(redis.call('GET', KEYS[1]) or '0')
        local candidate = tonumber(ARGV[1])
        if candidate >= current then
            redis.call('SET', KEYS[1], candidate)
            return 1
        end
        return 0
        "#,
    )
});
