use async_trait::async_trait;
use bytes::Bytes;
use itertools::Itertools;
use log::warn;
use smallvec::SmallVec;
use std::{fmt::Display, str::FromStr};
use thiserror::Error;

mod memory;
pub use memory::MemoryStore;

#[cfg(feature = "filesystem")]
pub mod filesystem;
#[cfg(feature = "filesystem")]
pub use filesystem::FileSystemStore;

const NODE_KEY_SIZE: usize = 10;
const METADATA_NAME: &str = "zarr.json";
pub(crate) const KEY_SEP: &str = "/";

fn metadata_name() -> NodeName {
    NodeName::new_unchecked(METADATA_NAME.to_owned())
}

/// A single component of a [NodeKey]: no slashes, not all periods,
/// not empty, no reserved `__` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeName(String);

impl NodeName {
    pub fn new(s: String) -> Result<Self, InvalidNodeName> {
        Self::validate(&s)?;
        Ok(Self::new_unchecked(s))
    }

    pub(crate) fn new_unchecked(s: String) -> Self {
        Self(s)
    }

    fn validate(s: &str) -> Result<(), InvalidNodeName> {
        let mut is_periods = true;
        let mut is_underscore = true;
        let mut has_non_recommended = false;
        let mut len: usize = 0;
        for c in s.chars() {
            if is_periods && c != '.' {
                is_periods = false;
            }
            if is_underscore {
                if len >= 2 {
                    return Err(InvalidNodeName::ReservedPrefix);
                }
                if c != '_' {
                    is_underscore = false;
                }
            }
            if c == '/' {
                return Err(InvalidNodeName::HasSlash);
            }

            if !has_non_recommended && !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '.'
            {
                has_non_recommended = true;
                warn!("Node name has non-recommended character `{}`; prefer `a-z`, `A-Z`, `0-9`, `-`, `_`, `.`", c);
            }

            len += 1;
        }
        if len == 0 {
            return Err(InvalidNodeName::Empty);
        }
        if is_periods {
            return Err(InvalidNodeName::IsPeriods);
        }
        Ok(())
    }
}

impl Display for NodeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NodeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for NodeName {
    type Err = InvalidNodeName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_owned())
    }
}

#[derive(Error, Debug)]
pub enum InvalidNodeName {
    #[error("Node name is empty string")]
    Empty,
    #[error("Node name contains '/'")]
    HasSlash,
    #[error("Node name is comprised only of periods")]
    IsPeriods,
    #[error("Node name starts with reserved prefix '__'")]
    ReservedPrefix,
}

/// A `/`-separated key addressing one value in a [Store].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NodeKey(SmallVec<[NodeName; NODE_KEY_SIZE]>);

impl FromIterator<NodeName> for NodeKey {
    fn from_iter<T: IntoIterator<Item = NodeName>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl NodeKey {
    /// Adds a new key component in-place.
    ///
    /// Returns the new number of components.
    pub fn push(&mut self, name: NodeName) -> usize {
        self.0.push(name);
        self.0.len()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Pop the last key component.
    ///
    /// None if we are at the root.
    pub fn pop(&mut self) -> Option<NodeName> {
        self.0.pop()
    }

    /// Check whether this key starts with (or equals) the other key.
    pub fn starts_with(&self, other: &NodeKey) -> bool {
        self.len() >= other.len() && &self.as_slice()[..other.len()] == other.as_slice()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Append the metadata object name (`zarr.json`).
    pub fn with_metadata(&mut self) -> usize {
        self.push(metadata_name())
    }

    pub fn as_slice(&self) -> &[NodeName] {
        self.0.as_slice()
    }

    /// Encode the key as a string by joining its parts with `/`.
    pub fn encode(&self) -> String {
        self.0.iter().map(|n| n.as_ref()).join(KEY_SEP)
    }
}

impl Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for NodeKey {
    type Err = InvalidNodeName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut k = Self::default();
        for n in s.split(KEY_SEP) {
            k.push(NodeName::new(n.to_owned())?);
        }
        Ok(k)
    }
}

impl AsRef<[NodeName]> for NodeKey {
    fn as_ref(&self) -> &[NodeName] {
        &self.0
    }
}

/// A byte range within a stored value.
///
/// `Suffix` addresses the last N bytes of a value whose total length
/// is not known to the caller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ByteRange {
    All,
    Interval { offset: u64, length: u64 },
    Suffix(u64),
}

impl ByteRange {
    pub fn start(&self, size: u64) -> u64 {
        match self {
            Self::All => 0,
            Self::Interval { offset, .. } => *offset,
            Self::Suffix(length) => size.saturating_sub(*length),
        }
    }

    pub fn length(&self, size: u64) -> u64 {
        match self {
            Self::All => size,
            Self::Interval { length, .. } => *length,
            Self::Suffix(length) => *length,
        }
    }

    pub fn end(&self, size: u64) -> u64 {
        self.start(size) + self.length(size)
    }

    fn fits(&self, size: u64) -> bool {
        match self {
            Self::All => true,
            Self::Interval { offset, length } => offset + length <= size,
            Self::Suffix(length) => *length <= size,
        }
    }

    /// Slice this range out of a whole value. Out-of-range is an error.
    pub fn extract(&self, value: &Bytes) -> Result<Bytes, StoreError> {
        let size = value.len() as u64;
        if !self.fits(size) {
            return Err(StoreError::OutOfRange(*self, size));
        }
        Ok(value.slice(self.start(size) as usize..self.end(size) as usize))
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O error")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    InvalidName(#[from] InvalidNodeName),
    #[error("byte range {0:?} out of range for value of length {1}")]
    OutOfRange(ByteRange, u64),
    #[error("store error: {0}")]
    Other(String),
}

/// Asynchronous key/value store contract.
///
/// Implementations must be safe for concurrent calls from tasks on the
/// same runtime. Per-key writes are last-write-wins; concurrent
/// [set_partial_values](Store::set_partial_values) on one key is undefined.
#[async_trait]
pub trait Store: Send + Sync {
    /// Retrieve the value at a key, or [None] if the key is absent.
    async fn get(&self, key: &NodeKey) -> Result<Option<Bytes>, StoreError>;

    /// Retrieve byte ranges of the value at a key, or [None] if the key
    /// is absent. A range beyond the end of the value is an error.
    ///
    /// The default implementation fetches the whole value once; stores
    /// with a cheaper ranged primitive should replace it.
    async fn get_partial_values(
        &self,
        key: &NodeKey,
        ranges: &[ByteRange],
    ) -> Result<Option<Vec<Bytes>>, StoreError> {
        match self.get(key).await? {
            None => Ok(None),
            Some(value) => ranges
                .iter()
                .map(|r| r.extract(&value))
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
        }
    }

    /// Create or replace the value at a key.
    async fn set(&self, key: &NodeKey, value: Bytes) -> Result<(), StoreError>;

    /// Write byte regions into the value at a key, extending it if a
    /// write lands past the current end. Missing keys are created.
    ///
    /// The default implementation is a read-modify-write of the whole
    /// value; stores with a positional write primitive should replace it.
    async fn set_partial_values(
        &self,
        key: &NodeKey,
        writes: &[(u64, Bytes)],
    ) -> Result<(), StoreError> {
        let mut buf: Vec<u8> = match self.get(key).await? {
            Some(b) => b.to_vec(),
            None => Vec::new(),
        };
        for (offset, data) in writes {
            let offset = *offset as usize;
            let end = offset + data.len();
            if buf.len() < end {
                buf.resize(end, 0);
            }
            buf[offset..end].copy_from_slice(data);
        }
        self.set(key, buf.into()).await
    }

    /// Remove the value at a key. Removing an absent key is not an error.
    async fn erase(&self, key: &NodeKey) -> Result<(), StoreError>;

    /// Whether a key holds a value.
    async fn has_key(&self, key: &NodeKey) -> Result<bool, StoreError> {
        self.get(key).await.map(|v| v.is_some())
    }

    /// All keys under the given prefix, in no particular order.
    async fn list_prefix(&self, prefix: &NodeKey) -> Result<Vec<NodeKey>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_name_validation() {
        assert!("chunk-0.1".parse::<NodeName>().is_ok());
        assert!("c".parse::<NodeName>().is_ok());
        assert!("".parse::<NodeName>().is_err());
        assert!("a/b".parse::<NodeName>().is_err());
        assert!("...".parse::<NodeName>().is_err());
        assert!("__reserved".parse::<NodeName>().is_err());
    }

    #[test]
    fn node_key_encode() {
        let key: NodeKey = "data/c/0/1".parse().unwrap();
        assert_eq!(key.len(), 4);
        assert_eq!(key.encode(), "data/c/0/1");

        let mut meta: NodeKey = "data".parse().unwrap();
        meta.with_metadata();
        assert_eq!(meta.encode(), "data/zarr.json");
    }

    #[test]
    fn byte_range_extract() {
        let value = Bytes::from_static(b"0123456789");
        assert_eq!(ByteRange::All.extract(&value).unwrap(), value);
        assert_eq!(
            ByteRange::Interval {
                offset: 2,
                length: 3
            }
            .extract(&value)
            .unwrap(),
            Bytes::from_static(b"234")
        );
        assert_eq!(
            ByteRange::Suffix(4).extract(&value).unwrap(),
            Bytes::from_static(b"6789")
        );
        assert!(ByteRange::Interval {
            offset: 8,
            length: 3
        }
        .extract(&value)
        .is_err());
        assert!(ByteRange::Suffix(11).extract(&value).is_err());
    }
}
