use bytes::Bytes;

use crate::{data_type::ReflectedType, ArcArrayD, MaybeNdim, Ndim};

use super::{ArrayRepr, CodecError};

pub mod endian;
pub mod sharding_indexed;

use endian::EndianCodec;
use sharding_indexed::ShardingIndexedCodec;

/// The array->bytes codec: the stage of the pipeline which turns an
/// n-dimensional array into a flat byte sequence and back.
pub trait ABCodec {
    fn encode<T: ReflectedType>(
        &self,
        decoded: ArcArrayD<T>,
        decoded_repr: &ArrayRepr<T>,
    ) -> Result<Bytes, CodecError>;

    fn decode<T: ReflectedType>(
        &self,
        encoded: Bytes,
        decoded_repr: &ArrayRepr<T>,
    ) -> Result<ArcArrayD<T>, CodecError>;
}

#[derive(Clone, PartialEq, Debug)]
pub enum ABCodecType {
    Endian(EndianCodec),
    ShardingIndexed(Box<ShardingIndexedCodec>),
}

impl From<EndianCodec> for ABCodecType {
    fn from(c: EndianCodec) -> Self {
        Self::Endian(c)
    }
}

impl From<ShardingIndexedCodec> for ABCodecType {
    fn from(c: ShardingIndexedCodec) -> Self {
        Self::ShardingIndexed(Box::new(c))
    }
}

impl Default for ABCodecType {
    fn default() -> Self {
        Self::Endian(EndianCodec::default())
    }
}

impl ABCodec for ABCodecType {
    fn encode<T: ReflectedType>(
        &self,
        decoded: ArcArrayD<T>,
        decoded_repr: &ArrayRepr<T>,
    ) -> Result<Bytes, CodecError> {
        match self {
            Self::Endian(c) => c.encode(decoded, decoded_repr),
            Self::ShardingIndexed(c) => c.encode(decoded, decoded_repr),
        }
    }

    fn decode<T: ReflectedType>(
        &self,
        encoded: Bytes,
        decoded_repr: &ArrayRepr<T>,
    ) -> Result<ArcArrayD<T>, CodecError> {
        match self {
            Self::Endian(c) => c.decode(encoded, decoded_repr),
            Self::ShardingIndexed(c) => c.decode(encoded, decoded_repr),
        }
    }
}

impl MaybeNdim for ABCodecType {
    fn maybe_ndim(&self) -> Option<usize> {
        match self {
            Self::Endian(_) => None,
            Self::ShardingIndexed(c) => Some(c.ndim()),
        }
    }
}
