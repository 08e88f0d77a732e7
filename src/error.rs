use thiserror::Error;

use crate::codecs::CodecError;
use crate::store::StoreError;

/// Top-level error for array operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
    #[error("invalid selection: {0}")]
    InvalidSelection(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
}

impl Error {
    pub(crate) fn selection<S: Into<String>>(msg: S) -> Self {
        Self::InvalidSelection(msg.into())
    }

    pub(crate) fn metadata<S: Into<String>>(msg: S) -> Self {
        Self::InvalidMetadata(msg.into())
    }
}
