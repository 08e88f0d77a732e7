use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    codecs::{ArrayRepr, CodecError},
    data_type::{NBytes, ReflectedType},
    to_usize, ArcArrayD, MaybeNdim,
};

use super::ABCodec;

#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    Big,
    Little,
}

#[cfg(target_endian = "big")]
pub const NATIVE_ENDIAN: Endian = Endian::Big;
#[cfg(target_endian = "little")]
pub const NATIVE_ENDIAN: Endian = Endian::Little;

pub const ZARR_ENDIAN: Endian = Endian::Little;

impl Default for Endian {
    fn default() -> Self {
        ZARR_ENDIAN
    }
}

/// Serializes array elements in logical (row-major) order with the
/// configured byte order. This is the implicit array->bytes codec of
/// every pipeline which does not name one.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct EndianCodec {
    endian: Endian,
}

impl EndianCodec {
    pub fn new(endian: Endian) -> Self {
        Self { endian }
    }

    pub fn new_big() -> Self {
        Self::new(Endian::Big)
    }

    pub fn new_little() -> Self {
        Self::new(Endian::Little)
    }

    pub fn new_native() -> Self {
        Self::new(NATIVE_ENDIAN)
    }
}

impl MaybeNdim for EndianCodec {
    fn maybe_ndim(&self) -> Option<usize> {
        None
    }
}

impl ABCodec for EndianCodec {
    fn encode<T: ReflectedType>(
        &self,
        decoded: ArcArrayD<T>,
        _decoded_repr: &ArrayRepr<T>,
    ) -> Result<Bytes, CodecError> {
        let mut buf = Vec::with_capacity(decoded.len() * T::ZARR_TYPE.nbytes());
        T::write_array_to(decoded, &mut buf, self.endian)?;
        Ok(buf.into())
    }

    fn decode<T: ReflectedType>(
        &self,
        encoded: Bytes,
        decoded_repr: &ArrayRepr<T>,
    ) -> Result<ArcArrayD<T>, CodecError> {
        let shape = to_usize(&decoded_repr.shape);
        Ok(T::read_array_from(
            encoded.as_ref(),
            self.endian,
            shape.as_slice(),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deser_endian() {
        let codec: EndianCodec = serde_json::from_str(r#"{"endian": "little"}"#).unwrap();
        assert_eq!(codec, EndianCodec::new_little());
        let codec: EndianCodec = serde_json::from_str(r#"{"endian": "big"}"#).unwrap();
        assert_eq!(codec, EndianCodec::new_big());
    }

    #[test]
    fn byte_order_on_disk() {
        let arr = ArcArrayD::from_shape_vec(vec![2], vec![0x0102u16, 0x0304]).unwrap();
        let repr = ArrayRepr::new(&[2], 0u16);

        let little = EndianCodec::new_little().encode(arr.clone(), &repr).unwrap();
        assert_eq!(little.as_ref(), &[0x02, 0x01, 0x04, 0x03]);

        let big = EndianCodec::new_big().encode(arr, &repr).unwrap();
        assert_eq!(big.as_ref(), &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn roundtrip_both_endians() {
        let arr = ArcArrayD::from_shape_vec(vec![3, 2], (0i64..6).map(|v| v - 3).collect()).unwrap();
        let repr = ArrayRepr::new(&[3, 2], 0i64);
        for codec in [EndianCodec::new_little(), EndianCodec::new_big()] {
            let bytes = codec.encode(arr.clone(), &repr).unwrap();
            let arr2 = codec.decode(bytes, &repr).unwrap();
            assert_eq!(arr, arr2);
        }
    }

    #[test]
    fn short_buffer_is_an_error() {
        let repr = ArrayRepr::new(&[4], 0u32);
        let codec = EndianCodec::new_little();
        assert!(codec.decode(Bytes::from_static(&[0; 7]), &repr).is_err());
    }
}
