use crate::{data_type::ReflectedType, ArcArrayD, MaybeNdim};

use super::ArrayRepr;

mod transpose;
pub use transpose::{Order, TransposeCodec};

/// An array->array transform, applied before the array->bytes codec on
/// write and after it on read.
pub trait AACodec {
    fn encode<T: ReflectedType>(&self, decoded: ArcArrayD<T>) -> ArcArrayD<T>;

    fn decode<T: ReflectedType>(&self, encoded: ArcArrayD<T>) -> ArcArrayD<T>;

    /// The representation of the encoded array, as seen by the next
    /// codec in the pipeline.
    fn compute_encoded_representation<T: ReflectedType>(
        &self,
        decoded_repr: &ArrayRepr<T>,
    ) -> ArrayRepr<T>;
}

#[derive(Clone, PartialEq, Debug)]
pub enum AACodecType {
    Transpose(TransposeCodec),
}

impl From<TransposeCodec> for AACodecType {
    fn from(c: TransposeCodec) -> Self {
        Self::Transpose(c)
    }
}

impl AACodec for AACodecType {
    fn encode<T: ReflectedType>(&self, decoded: ArcArrayD<T>) -> ArcArrayD<T> {
        match self {
            Self::Transpose(c) => c.encode(decoded),
        }
    }

    fn decode<T: ReflectedType>(&self, encoded: ArcArrayD<T>) -> ArcArrayD<T> {
        match self {
            Self::Transpose(c) => c.decode(encoded),
        }
    }

    fn compute_encoded_representation<T: ReflectedType>(
        &self,
        decoded_repr: &ArrayRepr<T>,
    ) -> ArrayRepr<T> {
        match self {
            Self::Transpose(c) => c.compute_encoded_representation(decoded_repr),
        }
    }
}

impl MaybeNdim for AACodecType {
    fn maybe_ndim(&self) -> Option<usize> {
        match self {
            Self::Transpose(t) => t.maybe_ndim(),
        }
    }
}
