//! Deterministic cache key generation from an operation identifier and its
//! arguments.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Turns `(operation-id, args)` pairs into a stable string key.
///
/// The canonical path serializes `args` with `serde_json` (JSON's key
/// ordering for maps is not guaranteed stable across serializers in
/// general, but for the `Serialize` impls this crate is handed -- structs
/// and tuples with a fixed field order -- `serde_json` produces identical
/// bytes for identical values run after run) and hashes the result with
/// SHA-256. If serialization fails, the fallback path formats `args`'s own
/// `Debug` representation instead; `Debug` output for types containing raw
/// pointers or non-deterministic internal iteration order (e.g. some
/// hash-based collections) can vary between processes, so a key built this
/// way is only unstable, not wrong, and is flagged as such in the log. If
/// `args` serializes to an empty argument list, the key is the operation-id
/// alone -- no hash is computed at all.
pub struct KeyGenerator;

impl KeyGenerator {
    /// Create a generator. Keys are global: there is no per-instance
    /// namespace, matching the key format every caller must agree on to
    /// regenerate a key for invalidation.
    pub fn new() -> Self {
        Self
    }

    /// Build the hash-key for `operation_id` applied to `args`.
    pub fn key_for<A: Serialize + std::fmt::Debug>(&self, operation_id: &str, args: &A) -> String {
        match serde_json::to_vec(args) {
            Ok(bytes) => self.key_for_bytes(operation_id, &bytes),
            Err(err) => {
                log::warn!(
                    "key generator falling back to debug formatting of arguments for operation '{operation_id}': {err}"
                );
                let fallback = format!("{args:?}");
                self.hash(operation_id, fallback.as_bytes())
            }
        }
    }

    /// Build the hash-key from an already-serialized argument payload, used
    /// when the caller has its own canonical encoding (e.g. a protobuf
    /// message) and serde's would only add overhead. An empty payload
    /// (`b""` or the canonical empty-list encoding `b"[]"`) yields the
    /// operation-id alone, with no hash computed.
    pub fn key_for_bytes(&self, operation_id: &str, raw_args: &[u8]) -> String {
        if raw_args.is_empty() || raw_args == b"[]" {
            return operation_id.to_string();
        }
        self.hash(operation_id, raw_args)
    }

    fn hash(&self, operation_id: &str, bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(operation_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(bytes);
        let hex = hex::encode(hasher.finalize());
        format!("{operation_id}:{hex}")
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize, Debug)]
    struct Args {
        user_id: u64,
        locale: String,
    }

    #[test]
    fn same_args_produce_same_key() {
        let gen = KeyGenerator::new();
        let a = Args { user_id: 7, locale: "en".into() };
        let b = Args { user_id: 7, locale: "en".into() };
        assert_eq!(gen.key_for("load_profile", &a), gen.key_for("load_profile", &b));
    }

    #[test]
    fn different_args_produce_different_keys() {
        let gen = KeyGenerator::new();
        let a = Args { user_id: 7, locale: "en".into() };
        let b = Args { user_id: 8, locale: "en".into() };
        assert_ne!(gen.key_for("load_profile", &a), gen.key_for("load_profile", &b));
    }

    #[test]
    fn different_operations_produce_different_keys() {
        let gen = KeyGenerator::new();
        let a = Args { user_id: 7, locale: "en".into() };
        assert_ne!(gen.key_for("load_profile", &a), gen.key_for("load_settings", &a));
    }

    #[test]
    fn empty_arguments_yield_the_operation_id_alone() {
        let gen = KeyGenerator::new();
        let empty: Vec<String> = Vec::new();
        assert_eq!(gen.key_for("ping", &empty), "ping");
    }

    #[test]
    fn fallback_distinguishes_by_argument_debug_form_not_operation_id() {
        // `f64::NAN` serializes to neither valid JSON nor a stable value,
        // so `serde_json` rejects it and the fallback path is exercised.
        let gen = KeyGenerator::new();
        let a = vec![f64::NAN, 1.0];
        let b = vec![f64::NAN, 2.0];
        assert_ne!(gen.key_for("load_profile", &a), gen.key_for("load_profile", &b));
    }
}
