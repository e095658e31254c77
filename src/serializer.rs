//! Wire encoding for cached values, including the null-sentinel convention
//! used to distinguish "the loader ran and found nothing" from "there is no
//! entry at all".

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CoordError, CoordResult};

/// Current wire format version. Bumped whenever the envelope layout (not
/// the payload inside it) changes.
const WIRE_VERSION: u8 = 1;

const TAG_NULL: u8 = 0;
const TAG_VALUE: u8 = 1;

/// What a cache slot held, after decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot<V> {
    /// A real value.
    Value(V),
    /// The null sentinel: a previous load determined there was nothing to
    /// cache, and that absence is itself being cached.
    Null,
}

impl<V> Slot<V> {
    /// Convert to `Option<V>`, collapsing [`Slot::Null`] to `None`.
    pub fn into_option(self) -> Option<V> {
        match self {
            Slot::Value(v) => Some(v),
            Slot::Null => None,
        }
    }
}

/// Encodes and decodes cache values using a small versioned envelope around
/// `bincode`.
///
/// The envelope is `[version: u8][tag: u8][payload...]`. `tag` is what
/// carries the null-sentinel distinction at the wire level, so a region
/// configured with `cache_nulls` can store an absent result as a tiny
/// fixed-size entry rather than needing a side channel or a sentinel value
/// that might collide with a legitimate payload.
pub struct Serializer<V> {
    _marker: PhantomData<V>,
}

impl<V> Default for Serializer<V> {
    fn default() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<V> Serializer<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Create a serializer for `V`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a real value.
    pub fn encode_value(&self, value: &V) -> CoordResult<Vec<u8>> {
        let body = bincode::serialize(value)?;
        let mut out = Vec::with_capacity(body.len() + 2);
        out.push(WIRE_VERSION);
        out.push(TAG_VALUE);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Encode the null sentinel.
    pub fn encode_null(&self) -> Vec<u8> {
        vec![WIRE_VERSION, TAG_NULL]
    }

    /// Decode a previously encoded slot.
    pub fn decode(&self, bytes: &[u8]) -> CoordResult<Slot<V>> {
        let [version, tag, body @ ..] = bytes else {
            return Err(CoordError::Serialization(
                "encoded payload shorter than the envelope header".to_string(),
            ));
        };

        if *version != WIRE_VERSION {
            return Err(CoordError::Serialization(format!(
                "unsupported wire version {version}, expected {WIRE_VERSION}"
            )));
        }

        match *tag {
            TAG_NULL => Ok(Slot::Null),
            TAG_VALUE => {
                let value = bincode::deserialize(body)?;
                Ok(Slot::Value(value))
            }
            other => Err(CoordError::Serialization(format!("unknown slot tag {other}"))),
        }
    }
}
