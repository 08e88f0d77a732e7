use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzCompression;

use crate::codecs::{bb::BBCodec, CodecError};

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Debug)]
pub struct GzipCodec {
    pub level: u32,
}

impl GzipCodec {
    pub fn new(level: u32) -> Self {
        Self { level }
    }
}

impl Default for GzipCodec {
    fn default() -> Self {
        Self { level: 6 }
    }
}

impl BBCodec for GzipCodec {
    fn encode(&self, decoded: &[u8]) -> Result<Bytes, CodecError> {
        let mut encoder = GzEncoder::new(
            Vec::with_capacity(decoded.len() / 2),
            GzCompression::new(self.level),
        );
        encoder.write_all(decoded)?;
        Ok(encoder.finish()?.into())
    }

    fn decode(&self, encoded: &[u8]) -> Result<Bytes, CodecError> {
        let mut decoder = GzDecoder::new(encoded);
        let mut out = Vec::default();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out.into())
    }
}
