use bytes::Bytes;
use serde::{de, ser::SerializeSeq, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub mod aa;
pub mod ab;
pub mod bb;

use aa::{AACodec, AACodecType, TransposeCodec};
use ab::{endian::EndianCodec, sharding_indexed::ShardingIndexedCodec, ABCodec, ABCodecType};
use bb::BBCodecType;
#[cfg(feature = "blosc")]
use bb::BloscCodec;
#[cfg(feature = "gzip")]
use bb::GzipCodec;
use bb::BBCodec;

use crate::{
    data_type::{NBytes, ReflectedType},
    to_usize, ArcArrayD, GridCoord, MaybeNdim,
};

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("codec I/O error")]
    Io(#[from] std::io::Error),
    #[error("could not decompress: {0}")]
    Decompression(String),
    #[error("malformed shard: {0}")]
    MalformedShard(String),
    #[error(
        "shard index entry out of range: offset {offset} + length {length} > payload size {payload_size}"
    )]
    ShardIndexOutOfRange {
        offset: u64,
        length: u64,
        payload_size: u64,
    },
    #[error("shard shape {shard:?} is not divisible by sub-chunk shape {sub_chunk:?}")]
    ShardShapeMismatch { shard: Vec<u64>, sub_chunk: Vec<u64> },
    #[error("codec error: {0}")]
    Other(String),
}

/// Shape and fill value of an array at some stage of the pipeline.
///
/// The element type is carried statically.
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayRepr<T: ReflectedType> {
    pub shape: GridCoord,
    pub fill_value: T,
}

impl<T: ReflectedType> ArrayRepr<T> {
    pub fn new(shape: &[u64], fill_value: T) -> Self {
        Self {
            shape: shape.iter().cloned().collect(),
            fill_value,
        }
    }

    pub fn empty_array(&self) -> ArcArrayD<T> {
        ArcArrayD::from_elem(to_usize(&self.shape).as_slice(), self.fill_value)
    }

    pub fn numel(&self) -> u64 {
        self.shape.iter().product()
    }

    pub fn nbytes(&self) -> usize {
        self.numel() as usize * T::ZARR_TYPE.nbytes()
    }
}

/// The codec metadata union: everything which can appear in an array's
/// `codecs` list, dispatched on the `name` tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "name", content = "configuration", rename_all = "snake_case")]
pub enum CodecType {
    Transpose(TransposeCodec),
    Endian(EndianCodec),
    #[cfg(feature = "gzip")]
    Gzip(GzipCodec),
    #[cfg(feature = "blosc")]
    Blosc(BloscCodec),
    ShardingIndexed(Box<ShardingIndexedCodec>),
}

impl From<AACodecType> for CodecType {
    fn from(c: AACodecType) -> Self {
        match c {
            AACodecType::Transpose(t) => Self::Transpose(t),
        }
    }
}

impl From<ABCodecType> for CodecType {
    fn from(c: ABCodecType) -> Self {
        match c {
            ABCodecType::Endian(e) => Self::Endian(e),
            ABCodecType::ShardingIndexed(s) => Self::ShardingIndexed(s),
        }
    }
}

impl From<BBCodecType> for CodecType {
    fn from(c: BBCodecType) -> Self {
        match c {
            #[cfg(feature = "gzip")]
            BBCodecType::Gzip(g) => Self::Gzip(g),
            #[cfg(feature = "blosc")]
            BBCodecType::Blosc(b) => Self::Blosc(b),
        }
    }
}

#[derive(Error, Debug)]
pub enum CodecChainConstructionError {
    #[error("More than one array->bytes codec found")]
    MultipleAB,
    #[error("Illegal codec order: {0} codec found after {1} codec")]
    IllegalOrder(&'static str, &'static str),
    #[error("Sharding codec must be the only codec in its pipeline")]
    ShardingNotAlone,
}

/// An ordered codec pipeline: array->array codecs, at most one
/// array->bytes codec, then bytes->bytes codecs.
///
/// Serializes as the flat `codecs` list of the array metadata, in write
/// order. An absent array->bytes codec is implicitly little-endian and
/// is not serialized, so an empty list round-trips as an empty list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CodecChain {
    aa_codecs: Vec<AACodecType>,
    ab_codec: Option<ABCodecType>,
    bb_codecs: Vec<BBCodecType>,
}

impl CodecChain {
    pub fn new(
        aa_codecs: Vec<AACodecType>,
        ab_codec: Option<ABCodecType>,
        bb_codecs: Vec<BBCodecType>,
    ) -> Result<Self, CodecChainConstructionError> {
        let chain = Self {
            aa_codecs,
            ab_codec,
            bb_codecs,
        };
        chain.validate_sharding()?;
        Ok(chain)
    }

    /// The sharding codec owns its whole pipeline: it may not be
    /// combined with further outer codecs.
    pub fn validate_sharding(&self) -> Result<(), CodecChainConstructionError> {
        if matches!(self.ab_codec, Some(ABCodecType::ShardingIndexed(_)))
            && !(self.aa_codecs.is_empty() && self.bb_codecs.is_empty())
        {
            return Err(CodecChainConstructionError::ShardingNotAlone);
        }
        Ok(())
    }

    pub fn aa_codecs_mut(&mut self) -> &mut Vec<AACodecType> {
        &mut self.aa_codecs
    }

    pub fn bb_codecs_mut(&mut self) -> &mut Vec<BBCodecType> {
        &mut self.bb_codecs
    }

    pub fn replace_ab_codec<T: Into<ABCodecType>>(&mut self, codec: Option<T>) {
        self.ab_codec = codec.map(|c| c.into());
    }

    /// The sharding codec, if this chain is exactly one sharding codec.
    pub fn sharding(&self) -> Option<&ShardingIndexedCodec> {
        match &self.ab_codec {
            Some(ABCodecType::ShardingIndexed(s))
                if self.aa_codecs.is_empty() && self.bb_codecs.is_empty() =>
            {
                Some(s)
            }
            _ => None,
        }
    }

    fn ab_or_default(&self) -> ABCodecType {
        self.ab_codec.clone().unwrap_or_default()
    }

    /// Shape and fill of the array as seen by the array->bytes codec,
    /// i.e. after all array->array encoders.
    fn encoded_repr<T: ReflectedType>(&self, decoded_repr: &ArrayRepr<T>) -> ArrayRepr<T> {
        let mut repr = decoded_repr.clone();
        for c in self.aa_codecs.iter() {
            repr = c.compute_encoded_representation(&repr);
        }
        repr
    }

    /// Apply the pipeline in declared (write) order.
    pub fn encode<T: ReflectedType>(
        &self,
        decoded: ArcArrayD<T>,
        decoded_repr: &ArrayRepr<T>,
    ) -> Result<Bytes, CodecError> {
        let mut arr = decoded;
        for c in self.aa_codecs.iter() {
            arr = c.encode(arr);
        }
        let ab_repr = self.encoded_repr(decoded_repr);
        let mut bytes = self.ab_or_default().encode(arr, &ab_repr)?;
        for c in self.bb_codecs.iter() {
            bytes = c.encode(&bytes)?;
        }
        Ok(bytes)
    }

    /// Apply the pipeline in reverse order.
    pub fn decode<T: ReflectedType>(
        &self,
        encoded: Bytes,
        decoded_repr: &ArrayRepr<T>,
    ) -> Result<ArcArrayD<T>, CodecError> {
        let mut bytes = encoded;
        for c in self.bb_codecs.iter().rev() {
            bytes = c.decode(&bytes)?;
        }
        let ab_repr = self.encoded_repr(decoded_repr);
        let mut arr = self.ab_or_default().decode(bytes, &ab_repr)?;
        for c in self.aa_codecs.iter().rev() {
            arr = c.decode(arr);
        }
        Ok(arr)
    }

    fn to_codec_types(&self) -> Vec<CodecType> {
        let mut out = Vec::with_capacity(self.aa_codecs.len() + 1 + self.bb_codecs.len());
        out.extend(self.aa_codecs.iter().cloned().map(CodecType::from));
        if let Some(ab) = &self.ab_codec {
            out.push(ab.clone().into());
        }
        out.extend(self.bb_codecs.iter().cloned().map(CodecType::from));
        out
    }
}

impl FromIterator<CodecType> for Result<CodecChain, CodecChainConstructionError> {
    fn from_iter<T: IntoIterator<Item = CodecType>>(iter: T) -> Self {
        let mut aa_codecs = Vec::default();
        let mut ab_codec = None;
        let mut bb_codecs: Vec<BBCodecType> = Vec::default();

        for ce in iter {
            let (aa, ab, bb): (Option<AACodecType>, Option<ABCodecType>, Option<BBCodecType>) =
                match ce {
                    CodecType::Transpose(c) => (Some(AACodecType::Transpose(c)), None, None),
                    CodecType::Endian(c) => (None, Some(ABCodecType::Endian(c)), None),
                    #[cfg(feature = "gzip")]
                    CodecType::Gzip(c) => (None, None, Some(BBCodecType::Gzip(c))),
                    #[cfg(feature = "blosc")]
                    CodecType::Blosc(c) => (None, None, Some(BBCodecType::Blosc(c))),
                    CodecType::ShardingIndexed(c) => {
                        (None, Some(ABCodecType::ShardingIndexed(c)), None)
                    }
                };

            if let Some(c) = aa {
                if ab_codec.is_some() {
                    return Err(CodecChainConstructionError::IllegalOrder("AA", "AB"));
                }
                if !bb_codecs.is_empty() {
                    return Err(CodecChainConstructionError::IllegalOrder("AA", "BB"));
                }
                aa_codecs.push(c);
            } else if let Some(c) = ab {
                if ab_codec.is_some() {
                    return Err(CodecChainConstructionError::MultipleAB);
                }
                if !bb_codecs.is_empty() {
                    return Err(CodecChainConstructionError::IllegalOrder("AB", "BB"));
                }
                ab_codec = Some(c);
            } else if let Some(c) = bb {
                bb_codecs.push(c);
            }
        }

        CodecChain::new(aa_codecs, ab_codec, bb_codecs)
    }
}

impl Serialize for CodecChain {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let types = self.to_codec_types();
        let mut seq = serializer.serialize_seq(Some(types.len()))?;
        for t in types.iter() {
            seq.serialize_element(t)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for CodecChain {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let types = Vec::<CodecType>::deserialize(deserializer)?;
        types
            .into_iter()
            .collect::<Result<CodecChain, _>>()
            .map_err(de::Error::custom)
    }
}

impl MaybeNdim for CodecChain {
    fn maybe_ndim(&self) -> Option<usize> {
        self.dimensioned_components().flatten().next()
    }

    fn validate_ndim(&self) -> Result<(), &'static str> {
        let mut ndim: Option<usize> = None;
        for n in self.dimensioned_components() {
            match (ndim, n) {
                (Some(a), Some(b)) if a != b => return Err("Inconsistent dimensionalities"),
                (None, Some(b)) => ndim = Some(b),
                _ => {}
            }
        }
        Ok(())
    }
}

impl CodecChain {
    fn dimensioned_components(&self) -> impl Iterator<Item = Option<usize>> + '_ {
        self.aa_codecs
            .iter()
            .map(|c| c.maybe_ndim())
            .chain(self.ab_codec.iter().map(|c| c.maybe_ndim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn chain_from_json(s: &str) -> Result<CodecChain, serde_json::Error> {
        serde_json::from_str(s)
    }

    #[test]
    fn empty_chain_roundtrips_empty() {
        let chain = chain_from_json("[]").unwrap();
        assert_eq!(chain, CodecChain::default());
        assert_eq!(serde_json::to_string(&chain).unwrap(), "[]");
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn chain_roundtrip() {
        let s = concat!(
            r#"[{"name":"transpose","configuration":{"order":"F"}},"#,
            r#"{"name":"endian","configuration":{"endian":"big"}},"#,
            r#"{"name":"gzip","configuration":{"level":6}}]"#
        );
        let chain = chain_from_json(s).unwrap();
        assert_eq!(serde_json::to_string(&chain).unwrap(), s);
    }

    #[test]
    fn unknown_codec_is_an_error() {
        assert!(chain_from_json(r#"[{"name":"lzma","configuration":{}}]"#).is_err());
    }

    #[test]
    fn illegal_orders_rejected() {
        // bytes->bytes before array->bytes
        assert!(chain_from_json(concat!(
            r#"[{"name":"gzip","configuration":{"level":1}},"#,
            r#"{"name":"endian","configuration":{"endian":"little"}}]"#
        ))
        .is_err());
        // two array->bytes codecs
        assert!(chain_from_json(concat!(
            r#"[{"name":"endian","configuration":{"endian":"little"}},"#,
            r#"{"name":"endian","configuration":{"endian":"big"}}]"#
        ))
        .is_err());
    }

    #[test]
    fn sharding_must_be_alone() {
        let sharding = r#"{"name":"sharding_indexed","configuration":{"chunk_shape":[2,2],"codecs":[]}}"#;
        assert!(chain_from_json(&format!("[{}]", sharding)).is_ok());
        assert!(chain_from_json(&format!(
            r#"[{{"name":"transpose","configuration":{{"order":"F"}}}},{}]"#,
            sharding
        ))
        .is_err());
        assert!(chain_from_json(&format!(
            r#"[{},{{"name":"gzip","configuration":{{"level":1}}}}]"#,
            sharding
        ))
        .is_err());
    }

    #[test]
    fn encode_decode_default_chain() {
        let chain = CodecChain::default();
        let repr = ArrayRepr::new(&[2, 3], 0u16);
        let arr = ArcArrayD::from_shape_vec(vec![2, 3], (0u16..6).collect()).unwrap();
        let bytes = chain.encode(arr.clone(), &repr).unwrap();
        // implicit little-endian
        assert_eq!(bytes.as_ref()[..4], [0, 0, 1, 0]);
        let arr2 = chain.decode(bytes, &repr).unwrap();
        assert_eq!(arr, arr2);
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn encode_decode_full_chain() {
        let chain = chain_from_json(concat!(
            r#"[{"name":"transpose","configuration":{"order":"F"}},"#,
            r#"{"name":"endian","configuration":{"endian":"big"}},"#,
            r#"{"name":"gzip","configuration":{"level":4}}]"#
        ))
        .unwrap();
        let repr = ArrayRepr::new(&[4, 5], -1i32);
        let arr = ArcArrayD::from_shape_vec(vec![4, 5], (0i32..20).collect()).unwrap();
        let bytes = chain.encode(arr.clone(), &repr).unwrap();
        let arr2 = chain.decode(bytes, &repr).unwrap();
        assert_eq!(arr, arr2);
    }

    #[test]
    fn chain_ndim_validation() {
        let mut chain = CodecChain::default();
        chain
            .aa_codecs_mut()
            .push(TransposeCodec::new_permutation(smallvec![1, 2, 0]).unwrap().into());
        assert_eq!(chain.maybe_ndim(), Some(3));
        chain.validate_ndim().unwrap();
    }
}
