//! The variable-length metadata store (vlmeta) attached to every chunk store.
//!
//! Values are typed ([`MetaValue`]), encoded with `serde_json` and then
//! compressed independently as a single-block chunk, so an update never
//! rewrites any other entry. Deletions leave a tombstone that [`MetadataStore::compact`]
//! reclaims; serialization always compacts first.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::CodecConfig;
use crate::error::{Result, TambakError};
use crate::store::chunk::Chunk;

/// A round-trip encodable metadata value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<MetaValue>),
    Map(BTreeMap<String, MetaValue>),
}

impl MetaValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetaValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[MetaValue]> {
        match self {
            MetaValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, MetaValue>> {
        match self {
            MetaValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Interprets a list of non-negative integers as a shape.
    pub fn to_shape(&self) -> Result<Vec<usize>> {
        let items = self.as_list().ok_or_else(|| {
            TambakError::FrameFormatError(format!("expected a list of integers, got {:?}", self))
        })?;
        items
            .iter()
            .map(|item| match item.as_int() {
                Some(v) if v >= 0 => Ok(v as usize),
                _ => Err(TambakError::FrameFormatError(format!(
                    "shape entries must be non-negative integers, got {:?}",
                    item
                ))),
            })
            .collect()
    }

    pub fn from_shape(shape: &[usize]) -> MetaValue {
        MetaValue::List(shape.iter().map(|&d| MetaValue::Int(d as i64)).collect())
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int(v)
    }
}

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        MetaValue::Float(v)
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        MetaValue::Bool(v)
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::Str(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::Str(v)
    }
}

/// Keyed, typed metadata. Iteration is in key order.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    /// `None` marks a deleted entry awaiting compaction.
    entries: BTreeMap<String, Option<Chunk>>,
    codec: CodecConfig,
}

impl Default for MetadataStore {
    fn default() -> Self {
        Self::new(CodecConfig {
            filters: Vec::new(),
            typesize: 1,
            ..CodecConfig::default()
        })
    }
}

impl MetadataStore {
    pub fn new(codec: CodecConfig) -> Self {
        Self {
            entries: BTreeMap::new(),
            codec,
        }
    }

    /// Inserts or updates `key`.
    pub fn set(&mut self, key: &str, value: impl Into<MetaValue>) -> Result<()> {
        let encoded = serde_json::to_vec(&value.into())?;
        let chunk = Chunk::compress(&encoded, &self.codec)?;
        self.entries.insert(key.to_string(), Some(chunk));
        Ok(())
    }

    /// Fails with `MetadataKey` if the key is absent or deleted.
    pub fn get(&self, key: &str) -> Result<MetaValue> {
        let chunk = self
            .entries
            .get(key)
            .and_then(|e| e.as_ref())
            .ok_or_else(|| TambakError::MetadataKey(key.to_string()))?;
        let encoded = chunk.decompress()?;
        Ok(serde_json::from_slice(&encoded)?)
    }

    pub fn contains(&self, key: &str) -> bool {
        matches!(self.entries.get(key), Some(Some(_)))
    }

    /// Removes `key`. The space is reclaimed lazily by `compact`.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        match self.entries.get_mut(key) {
            Some(entry) if entry.is_some() => {
                *entry = None;
                Ok(())
            }
            _ => Err(TambakError::MetadataKey(key.to_string())),
        }
    }

    /// Drops tombstones left by `delete`. Returns how many were removed.
    pub fn compact(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_some());
        before - self.entries.len()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, e)| e.is_some())
            .map(|(k, _)| k.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.values().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live entries in their stored (encoded and compressed) form.
    pub(crate) fn raw_entries(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries
            .iter()
            .filter_map(|(k, e)| e.as_ref().map(|c| (k.as_str(), c.as_bytes())))
    }

    /// Restores an entry read back from a frame.
    pub(crate) fn insert_raw(&mut self, key: String, bytes: Vec<u8>) -> Result<()> {
        let chunk = Chunk::from_bytes(bytes)?;
        self.entries.insert(key, Some(chunk));
        Ok(())
    }
}
