use std::mem::discriminant;

use blosc::{decompress_bytes, Context};
pub use blosc::{Clevel, Compressor, ShuffleMode};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::codecs::{bb::BBCodec, CodecError};

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct BloscCodec {
    #[serde(deserialize_with = "cname_from_str", serialize_with = "cname_to_str")]
    cname: Compressor,
    #[serde(deserialize_with = "clevel_from_int", serialize_with = "clevel_to_int")]
    clevel: Clevel,
    #[serde(
        deserialize_with = "shuffle_from_int",
        serialize_with = "shuffle_to_int"
    )]
    shuffle: ShuffleMode,
    #[serde(default)]
    typesize: usize,
    #[serde(default)]
    blocksize: usize,
}

impl PartialEq for BloscCodec {
    fn eq(&self, other: &Self) -> bool {
        self.cname == other.cname
            && discriminant(&self.clevel) == discriminant(&other.clevel)
            && discriminant(&self.shuffle) == discriminant(&other.shuffle)
            && self.typesize == other.typesize
            && self.blocksize == other.blocksize
    }
}

impl Eq for BloscCodec {}

fn cname_from_str<'de, D>(deserializer: D) -> Result<Compressor, D::Error>
where
    D: Deserializer<'de>,
{
    match Deserialize::deserialize(deserializer)? {
        "lz4" => Ok(Compressor::LZ4),
        "lz4hc" => Ok(Compressor::LZ4HC),
        "blosclz" => Ok(Compressor::BloscLZ),
        "zstd" => Ok(Compressor::Zstd),
        "snappy" => Ok(Compressor::Snappy),
        "zlib" => Ok(Compressor::Zlib),
        _ => Err(serde::de::Error::custom("bad cname")),
    }
}

fn cname_to_str<S>(cname: &Compressor, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match cname {
        Compressor::LZ4 => serializer.serialize_str("lz4"),
        Compressor::LZ4HC => serializer.serialize_str("lz4hc"),
        Compressor::BloscLZ => serializer.serialize_str("blosclz"),
        Compressor::Zstd => serializer.serialize_str("zstd"),
        Compressor::Snappy => serializer.serialize_str("snappy"),
        Compressor::Zlib => serializer.serialize_str("zlib"),
        Compressor::Invalid => Err(serde::ser::Error::custom("bad cname")),
    }
}

fn clevel_from_int<'de, D>(deserializer: D) -> Result<Clevel, D::Error>
where
    D: Deserializer<'de>,
{
    match Deserialize::deserialize(deserializer)? {
        0 => Ok(Clevel::None),
        1 => Ok(Clevel::L1),
        2 => Ok(Clevel::L2),
        3 => Ok(Clevel::L3),
        4 => Ok(Clevel::L4),
        5 => Ok(Clevel::L5),
        6 => Ok(Clevel::L6),
        7 => Ok(Clevel::L7),
        8 => Ok(Clevel::L8),
        9 => Ok(Clevel::L9),
        _ => Err(serde::de::Error::custom("bad clevel")),
    }
}

fn clevel_to_int<S>(clevel: &Clevel, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match clevel {
        Clevel::None => serializer.serialize_u8(0),
        Clevel::L1 => serializer.serialize_u8(1),
        Clevel::L2 => serializer.serialize_u8(2),
        Clevel::L3 => serializer.serialize_u8(3),
        Clevel::L4 => serializer.serialize_u8(4),
        Clevel::L5 => serializer.serialize_u8(5),
        Clevel::L6 => serializer.serialize_u8(6),
        Clevel::L7 => serializer.serialize_u8(7),
        Clevel::L8 => serializer.serialize_u8(8),
        Clevel::L9 => serializer.serialize_u8(9),
    }
}

fn shuffle_from_int<'de, D>(deserializer: D) -> Result<ShuffleMode, D::Error>
where
    D: Deserializer<'de>,
{
    match Deserialize::deserialize(deserializer)? {
        0 => Ok(ShuffleMode::None),
        1 => Ok(ShuffleMode::Byte),
        2 => Ok(ShuffleMode::Bit),
        _ => Err(serde::de::Error::custom("bad shuffle")),
    }
}

fn shuffle_to_int<S>(shuffle: &ShuffleMode, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match shuffle {
        ShuffleMode::None => serializer.serialize_u8(0),
        ShuffleMode::Byte => serializer.serialize_u8(1),
        ShuffleMode::Bit => serializer.serialize_u8(2),
    }
}

impl BloscCodec {
    fn context(&self) -> Result<Context, CodecError> {
        let ctx = Context::new()
            .compressor(self.cname)
            .map_err(|_| CodecError::Other("blosc compressor not enabled".to_owned()))?
            .clevel(self.clevel)
            .shuffle(self.shuffle)
            .typesize(if self.typesize == 0 {
                None
            } else {
                Some(self.typesize)
            })
            .blocksize(if self.blocksize == 0 {
                None
            } else {
                Some(self.blocksize)
            });
        Ok(ctx)
    }
}

impl Default for BloscCodec {
    fn default() -> Self {
        Self {
            cname: Compressor::BloscLZ,
            clevel: Clevel::L5,
            shuffle: ShuffleMode::None,
            typesize: 0,
            blocksize: 0,
        }
    }
}

impl BBCodec for BloscCodec {
    fn encode(&self, decoded: &[u8]) -> Result<Bytes, CodecError> {
        let buffer = self.context()?.compress(decoded);
        let v: Vec<u8> = buffer.into();
        Ok(v.into())
    }

    fn decode(&self, encoded: &[u8]) -> Result<Bytes, CodecError> {
        // The blosc header carries the uncompressed length; the wrapped
        // call cannot trust it, hence the unsafety containment here.
        // We are only ever decoding bytes into bytes.
        let v: Vec<u8> = unsafe { decompress_bytes(encoded) }
            .map_err(|_| CodecError::Decompression("could not decompress with blosc".to_owned()))?;
        Ok(v.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let data: Vec<u8> = (0..255).cycle().take(10_000).collect();
        let codec = BloscCodec::default();
        let enc = codec.encode(&data).unwrap();
        let dec = codec.decode(&enc).unwrap();
        assert_eq!(dec.as_ref(), data.as_slice());
    }

    #[test]
    fn config_roundtrip() {
        let s = r#"{"cname":"lz4","clevel":5,"shuffle":1,"typesize":2,"blocksize":0}"#;
        let codec: BloscCodec = serde_json::from_str(s).unwrap();
        assert_eq!(serde_json::to_string(&codec).unwrap(), s);
    }
}
