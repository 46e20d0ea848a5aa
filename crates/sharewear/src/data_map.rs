//! Tagged key/value map, the second transport representation.
//!
//! A [`DataMap`] is what the external transport stores and replicates
//! between nodes. Values are primitives, nested maps, or [`Asset`]
//! references to binary blobs that travel out of band.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// A single value stored under a key of a [`DataMap`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DataValue {
    /// Explicit null. Written for absent nested records so the key still
    /// occupies its slot.
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    String(String),
    Asset(Asset),
    Map(DataMap),
}

/// Ordered string-keyed map of [`DataValue`]s.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataMap {
    entries: BTreeMap<String, DataValue>,
}

impl DataMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<DataValue> {
        self.entries.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn put(&mut self, key: impl Into<String>, value: DataValue) {
        self.entries.insert(key.into(), value);
    }

    pub fn put_bool(&mut self, key: impl Into<String>, value: bool) {
        self.put(key, DataValue::Bool(value));
    }

    pub fn put_int(&mut self, key: impl Into<String>, value: i32) {
        self.put(key, DataValue::Int(value));
    }

    pub fn put_long(&mut self, key: impl Into<String>, value: i64) {
        self.put(key, DataValue::Long(value));
    }

    /// Store a string; `None` is stored as an explicit null.
    pub fn put_string(&mut self, key: impl Into<String>, value: Option<&str>) {
        let value = match value {
            Some(s) => DataValue::String(s.to_string()),
            None => DataValue::Null,
        };
        self.put(key, value);
    }

    pub fn put_asset(&mut self, key: impl Into<String>, asset: Asset) {
        self.put(key, DataValue::Asset(asset));
    }

    /// Store a nested map; `None` is stored as an explicit null.
    pub fn put_map(&mut self, key: impl Into<String>, map: Option<DataMap>) {
        let value = match map {
            Some(m) => DataValue::Map(m),
            None => DataValue::Null,
        };
        self.put(key, value);
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(DataValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i32> {
        match self.get(key) {
            Some(DataValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(DataValue::Long(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(DataValue::String(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn get_asset(&self, key: &str) -> Option<&Asset> {
        match self.get(key) {
            Some(DataValue::Asset(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_map(&self, key: &str) -> Option<&DataMap> {
        match self.get(key) {
            Some(DataValue::Map(v)) => Some(v),
            _ => None,
        }
    }

    /// Move the bytes of every inline asset (at any depth) out of the map,
    /// leaving digest-only references behind. Returns the bytes keyed by
    /// digest; identical blobs collapse into one entry.
    pub fn take_inline_assets(&mut self) -> BTreeMap<String, Vec<u8>> {
        let mut out = BTreeMap::new();
        self.collect_assets(&mut out);
        out
    }

    fn collect_assets(&mut self, out: &mut BTreeMap<String, Vec<u8>>) {
        for value in self.entries.values_mut() {
            match value {
                DataValue::Asset(asset) => {
                    if let Some(data) = asset.data.take() {
                        out.entry(asset.digest.clone()).or_insert(data);
                    }
                }
                DataValue::Map(nested) => nested.collect_assets(out),
                _ => {}
            }
        }
    }
}

/// Content-addressed reference to a binary blob.
///
/// Assets created locally carry their bytes inline until a put request is
/// built; assets received from a peer carry only the digest and must be
/// fetched through a [`BlobSource`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Vec<u8>>,
}

impl Asset {
    /// Create an asset holding `bytes` inline.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        Self {
            digest: digest_of(&bytes),
            data: Some(bytes),
        }
    }

    /// Create a digest-only reference.
    pub fn from_digest(digest: impl Into<String>) -> Self {
        Self {
            digest: digest.into(),
            data: None,
        }
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Inline bytes, if this asset has not been detached yet.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }
}

impl fmt::Debug for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Asset")
            .field("digest", &self.digest)
            .field("inline_len", &self.data.as_ref().map(Vec::len))
            .finish()
    }
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn digest_of(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Resolves digest-only assets to their bytes.
///
/// Implemented by the external transport. May block on I/O; callers must
/// not invoke it from a latency-sensitive thread.
pub trait BlobSource: Send + Sync {
    /// Fetch the bytes behind `asset`. `Ok(None)` means the blob is absent.
    fn fetch_blob(&self, asset: &Asset) -> Result<Option<Vec<u8>>>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
