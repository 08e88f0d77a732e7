use bytes::Bytes;
use log::trace;

use crate::{
    codecs::ab::endian::ZARR_ENDIAN,
    data_type::ReflectedType,
    store::{ByteRange, NodeKey, Store, StoreError},
    to_usize, ArcArrayD, Error,
};

/// The value at some stage of the codec pipeline: nothing, raw bytes,
/// a decoded array, or an unread store key.
///
/// The `File` variant keeps store-backed values opaque so that codecs
/// which can work from byte ranges (sharding) never have to pull the
/// whole object.
pub enum ValueHandle<'a, S: Store, T: ReflectedType> {
    Absent,
    Bytes(Bytes),
    Array(ArcArrayD<T>),
    File(&'a S, NodeKey),
}

impl<'a, S: Store, T: ReflectedType> ValueHandle<'a, S, T> {
    pub fn file(store: &'a S, key: NodeKey) -> Self {
        Self::File(store, key)
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    fn raw_bytes(array: &ArcArrayD<T>) -> Result<Bytes, Error> {
        let mut buf = Vec::new();
        T::write_array_to(array.clone(), &mut buf, ZARR_ENDIAN)
            .map_err(crate::codecs::CodecError::Io)?;
        Ok(buf.into())
    }

    /// All bytes of the value; [None] if absent. An `Array` handle
    /// yields its raw little-endian row-major bytes.
    pub async fn to_bytes(&self) -> Result<Option<Bytes>, Error> {
        match self {
            Self::Absent => Ok(None),
            Self::Bytes(b) => Ok(Some(b.clone())),
            Self::Array(a) => Ok(Some(Self::raw_bytes(a)?)),
            Self::File(store, key) => Ok(store.get(key).await?),
        }
    }

    /// The value as an array of the given shape; [None] if absent.
    /// Byte-backed handles are interpreted as raw little-endian
    /// row-major data.
    pub async fn to_array(&self, shape: &[u64]) -> Result<Option<ArcArrayD<T>>, Error> {
        let bytes = match self {
            Self::Array(a) => return Ok(Some(a.clone())),
            other => other.to_bytes().await?,
        };
        match bytes {
            None => Ok(None),
            Some(b) => {
                let arr =
                    T::read_array_from(b.as_ref(), ZARR_ENDIAN, to_usize(shape).as_slice())
                        .map_err(crate::codecs::CodecError::Io)?;
                Ok(Some(arr))
            }
        }
    }

    /// Byte ranges of the value; [None] if absent. Store-backed handles
    /// issue a single batched ranged read.
    pub async fn get_partial(&self, ranges: &[ByteRange]) -> Result<Option<Vec<Bytes>>, Error> {
        match self {
            Self::Absent => Ok(None),
            Self::Bytes(b) => {
                let out = ranges
                    .iter()
                    .map(|r| r.extract(b))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Some(out))
            }
            Self::Array(a) => {
                let b = Self::raw_bytes(a)?;
                let out = ranges
                    .iter()
                    .map(|r| r.extract(&b))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Some(out))
            }
            Self::File(store, key) => Ok(store.get_partial_values(key, ranges).await?),
        }
    }

    /// Replace the store value behind a `File` handle with the given
    /// value: bytes are written, absence deletes the key.
    pub async fn set(&self, value: ValueHandle<'_, S, T>) -> Result<(), Error> {
        let (store, key) = match self {
            Self::File(store, key) => (store, key),
            _ => {
                return Err(
                    StoreError::Other("set on a handle not backed by a store".to_owned()).into(),
                )
            }
        };
        match value {
            ValueHandle::Absent => {
                trace!("erasing {}", key);
                store.erase(key).await?;
            }
            ValueHandle::Bytes(b) => {
                trace!("writing {} bytes to {}", b.len(), key);
                store.set(key, b).await?;
            }
            ValueHandle::Array(a) => {
                let b = Self::raw_bytes(&a)?;
                store.set(key, b).await?;
            }
            ValueHandle::File(..) => {
                return Err(StoreError::Other(
                    "cannot set a handle from another store-backed handle".to_owned(),
                )
                .into())
            }
        }
        Ok(())
    }

    /// Positional writes into the store value behind a `File` handle.
    pub async fn set_partial(&self, writes: &[(u64, Bytes)]) -> Result<(), Error> {
        match self {
            Self::File(store, key) => {
                store.set_partial_values(key, writes).await?;
                Ok(())
            }
            _ => Err(
                StoreError::Other("set_partial on a handle not backed by a store".to_owned())
                    .into(),
            ),
        }
    }
}
