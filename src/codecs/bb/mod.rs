use bytes::Bytes;

use crate::MaybeNdim;

use super::CodecError;

#[cfg(feature = "blosc")]
mod blosc_codec;
#[cfg(feature = "blosc")]
pub use blosc_codec::BloscCodec;

#[cfg(feature = "gzip")]
mod gzip_codec;
#[cfg(feature = "gzip")]
pub use gzip_codec::GzipCodec;

/// A byte->byte transform; decode is the inverse of encode.
pub trait BBCodec {
    fn encode(&self, decoded: &[u8]) -> Result<Bytes, CodecError>;

    fn decode(&self, encoded: &[u8]) -> Result<Bytes, CodecError>;
}

#[derive(Clone, PartialEq, Debug)]
pub enum BBCodecType {
    #[cfg(feature = "blosc")]
    Blosc(BloscCodec),
    #[cfg(feature = "gzip")]
    Gzip(GzipCodec),
}

impl MaybeNdim for BBCodecType {
    fn maybe_ndim(&self) -> Option<usize> {
        None
    }
}

impl BBCodec for BBCodecType {
    fn encode(&self, decoded: &[u8]) -> Result<Bytes, CodecError> {
        match self {
            #[cfg(feature = "gzip")]
            Self::Gzip(c) => c.encode(decoded),

            #[cfg(feature = "blosc")]
            Self::Blosc(c) => c.encode(decoded),
        }
    }

    fn decode(&self, encoded: &[u8]) -> Result<Bytes, CodecError> {
        match self {
            #[cfg(feature = "gzip")]
            Self::Gzip(c) => c.decode(encoded),

            #[cfg(feature = "blosc")]
            Self::Blosc(c) => c.decode(encoded),
        }
    }
}

#[cfg(feature = "gzip")]
impl From<GzipCodec> for BBCodecType {
    fn from(c: GzipCodec) -> Self {
        Self::Gzip(c)
    }
}

#[cfg(feature = "blosc")]
impl From<BloscCodec> for BBCodecType {
    fn from(c: BloscCodec) -> Self {
        Self::Blosc(c)
    }
}
