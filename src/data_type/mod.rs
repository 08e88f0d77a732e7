use std::{
    fmt::{Debug, Display},
    io::{self, BufReader, BufWriter, Read, Write},
    str::FromStr,
};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::{codecs::ab::endian::Endian, ArcArrayD};

mod int;
pub use int::IntSize;
mod float;
pub use float::FloatSize;

pub trait NBytes {
    /// Number of bytes in the data type
    fn nbytes(&self) -> usize;

    /// Number of bits in the data type
    fn nbits(&self) -> usize {
        self.nbytes() * 8
    }

    /// Whether the data type should have an endianness.
    fn has_endianness(&self) -> bool {
        self.nbytes() > 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Bool,
    Int(IntSize),
    UInt(IntSize),
    Float(FloatSize),
}

impl DataType {
    pub fn default_fill_value(&self) -> serde_json::Value {
        match self {
            DataType::Bool => serde_json::Value::from(false),
            DataType::Int(_) | DataType::UInt(_) => serde_json::Value::from(0),
            DataType::Float(_) => serde_json::Value::from(0),
        }
    }

    pub fn validate_json_value(&self, value: &serde_json::Value) -> Result<(), serde_json::Error> {
        let v = value.clone();
        match self {
            DataType::Bool => {
                serde_json::from_value::<bool>(v)?;
            }
            DataType::Int(s) => match s {
                IntSize::b8 => {
                    serde_json::from_value::<i8>(v)?;
                }
                IntSize::b16 => {
                    serde_json::from_value::<i16>(v)?;
                }
                IntSize::b32 => {
                    serde_json::from_value::<i32>(v)?;
                }
                IntSize::b64 => {
                    serde_json::from_value::<i64>(v)?;
                }
            },
            DataType::UInt(s) => match s {
                IntSize::b8 => {
                    serde_json::from_value::<u8>(v)?;
                }
                IntSize::b16 => {
                    serde_json::from_value::<u16>(v)?;
                }
                IntSize::b32 => {
                    serde_json::from_value::<u32>(v)?;
                }
                IntSize::b64 => {
                    serde_json::from_value::<u64>(v)?;
                }
            },
            DataType::Float(s) => match s {
                FloatSize::b32 => {
                    serde_json::from_value::<f32>(v)?;
                }
                FloatSize::b64 => {
                    serde_json::from_value::<f64>(v)?;
                }
            },
        };
        Ok(())
    }
}

impl Serialize for DataType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DataType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FromStr::from_str(&s).map_err(de::Error::custom)
    }
}

impl NBytes for DataType {
    fn nbytes(&self) -> usize {
        match self {
            Self::Bool => 1,
            Self::Int(s) | Self::UInt(s) => s.nbytes(),
            Self::Float(s) => s.nbytes(),
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nbits = self.nbits();
        let s = match self {
            Self::Bool => "bool".into(),
            Self::Int(_s) => format!("int{nbits}"),
            Self::UInt(_s) => format!("uint{nbits}"),
            Self::Float(_s) => format!("float{nbits}"),
        };
        write!(f, "{}", s)
    }
}

fn split_str_num(s: &str) -> (&str, Option<usize>) {
    let clos = |c: char| c.is_ascii_digit();
    if let Some(idx) = s.find(clos) {
        match s[idx..].parse() {
            Ok(n) => (&s[0..idx], Some(n)),
            Err(_) => (s, None),
        }
    } else {
        (s, None)
    }
}

impl FromStr for DataType {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (s, nbits) = split_str_num(s);
        if let Some(n) = nbits {
            match s {
                "int" => Ok(Self::Int(n.try_into()?)),
                "uint" => Ok(Self::UInt(n.try_into()?)),
                "float" => Ok(Self::Float(n.try_into()?)),
                _ => Err("Unknown data type"),
            }
        } else if s == "bool" {
            Ok(Self::Bool)
        } else {
            Err("Could not parse data type")
        }
    }
}

type PrimitiveEncoder<T> = Box<dyn Fn(T, &mut [u8])>;
type PrimitiveDecoder<T> = Box<dyn Fn(&mut [u8]) -> T>;

/// Trait implemented by primitive types that are reflected in Zarr.
///
/// The supertraits are not necessary for this trait, but are used to
/// remove redundant bounds elsewhere when operating generically over
/// data types.
// `DeserializeOwned` is necessary for deserialization of metadata `fill_value`.
pub trait ReflectedType:
    Send
    + Sync
    + Clone
    + Copy
    + Default
    + serde::de::DeserializeOwned
    + 'static
    + Sized
    + serde::ser::Serialize
    + PartialEq
    + Debug
{
    const ZARR_TYPE: DataType;

    /// Produce a routine which writes the bytes of a self-typed value
    /// into the given buffer.
    fn encoder(endian: Endian) -> PrimitiveEncoder<Self>;

    /// Produce a routine which reads a self-typed value from
    /// the given byte buffer.
    fn decoder(endian: Endian) -> PrimitiveDecoder<Self>;

    fn write_array_to<W: Write>(array: ArcArrayD<Self>, w: W, endian: Endian) -> io::Result<()> {
        let mut bw = BufWriter::new(w);
        let mut buf = vec![0u8; Self::ZARR_TYPE.nbytes()];
        let encoder = Self::encoder(endian);

        for val in array.iter() {
            encoder(*val, buf.as_mut());
            bw.write_all(buf.as_mut())?;
        }
        bw.flush()
    }

    fn read_array_from<R: Read>(
        r: R,
        endian: Endian,
        shape: &[usize],
    ) -> io::Result<ArcArrayD<Self>> {
        let mut br = BufReader::new(r);
        let mut buf = vec![0u8; Self::ZARR_TYPE.nbytes()];
        let decoder = Self::decoder(endian);

        let numel = shape.iter().cloned().reduce(|a, b| a * b).unwrap_or(1);

        let mut data = Vec::with_capacity(numel);

        for _ in 0..numel {
            br.read_exact(buf.as_mut())?;
            data.push(decoder(buf.as_mut()));
        }

        ArcArrayD::from_shape_vec(shape.to_vec(), data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

macro_rules! reflected_primitive {
    ($d_name:expr, $d_type:ty, $bo_read_fn:ident, $bo_write_fn:ident) => {
        impl ReflectedType for $d_type {
            const ZARR_TYPE: DataType = $d_name;

            fn encoder(endian: Endian) -> Box<dyn Fn(Self, &mut [u8])> {
                use byteorder::ByteOrder;
                Box::new(match endian {
                    Endian::Big => {
                        |v: Self, buf: &mut [u8]| byteorder::BigEndian::$bo_write_fn(buf, v)
                    }
                    Endian::Little => {
                        |v: Self, buf: &mut [u8]| byteorder::LittleEndian::$bo_write_fn(buf, v)
                    }
                })
            }

            fn decoder(endian: Endian) -> Box<dyn Fn(&mut [u8]) -> Self> {
                use byteorder::ByteOrder;
                Box::new(match endian {
                    Endian::Big => |buf: &mut [u8]| byteorder::BigEndian::$bo_read_fn(buf),
                    Endian::Little => |buf: &mut [u8]| byteorder::LittleEndian::$bo_read_fn(buf),
                })
            }
        }
    };
}

impl ReflectedType for bool {
    const ZARR_TYPE: DataType = DataType::Bool;

    fn encoder(_endian: Endian) -> Box<dyn Fn(Self, &mut [u8])> {
        Box::new(|v: Self, buf: &mut [u8]| buf[0] = if v { 1 } else { 0 })
    }

    fn decoder(_endian: Endian) -> Box<dyn Fn(&mut [u8]) -> Self> {
        Box::new(|buf: &mut [u8]| buf[0] != 0)
    }
}

reflected_primitive!(DataType::Float(FloatSize::b32), f32, read_f32, write_f32);
reflected_primitive!(DataType::Float(FloatSize::b64), f64, read_f64, write_f64);
reflected_primitive!(DataType::UInt(IntSize::b16), u16, read_u16, write_u16);
reflected_primitive!(DataType::UInt(IntSize::b32), u32, read_u32, write_u32);
reflected_primitive!(DataType::UInt(IntSize::b64), u64, read_u64, write_u64);
reflected_primitive!(DataType::Int(IntSize::b16), i16, read_i16, write_i16);
reflected_primitive!(DataType::Int(IntSize::b32), i32, read_i32, write_i32);
reflected_primitive!(DataType::Int(IntSize::b64), i64, read_i64, write_i64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_dtypes() {
        use DataType::*;
        let strs = vec![
            (r#""bool""#, Bool),
            (r#""int8""#, Int(IntSize::b8)),
            (r#""int16""#, Int(IntSize::b16)),
            (r#""int32""#, Int(IntSize::b32)),
            (r#""int64""#, Int(IntSize::b64)),
            (r#""uint8""#, UInt(IntSize::b8)),
            (r#""uint16""#, UInt(IntSize::b16)),
            (r#""uint32""#, UInt(IntSize::b32)),
            (r#""uint64""#, UInt(IntSize::b64)),
            (r#""float32""#, Float(FloatSize::b32)),
            (r#""float64""#, Float(FloatSize::b64)),
        ];
        for (s, expected) in strs {
            let dt: DataType =
                serde_json::from_str(s).unwrap_or_else(|_| panic!("Couldn't parse '{}'", s));
            assert_eq!(dt, expected, "Got {:?}, expected {:?}", dt, expected);

            let s2 = serde_json::to_string(&dt)
                .unwrap_or_else(|_| panic!("Couldn't serialize {:?}", dt));
            assert_eq!(s, &s2, "Got {:?}, expected {:?}", s2, s);
        }
    }

    #[test]
    fn reject_unknown_dtype() {
        for s in [r#""complex64""#, r#""r8""#, r#""float16""#, r#""uint128""#] {
            assert!(serde_json::from_str::<DataType>(s).is_err());
        }
    }

    #[test]
    fn validate_fill_values() {
        let dt = DataType::UInt(IntSize::b8);
        dt.validate_json_value(&serde_json::json!(0)).unwrap();
        dt.validate_json_value(&serde_json::json!(255)).unwrap();
        assert!(dt.validate_json_value(&serde_json::json!(256)).is_err());
        assert!(dt.validate_json_value(&serde_json::json!(-1)).is_err());
        assert!(dt.validate_json_value(&serde_json::json!(true)).is_err());

        DataType::Bool
            .validate_json_value(&serde_json::json!(false))
            .unwrap();
        DataType::Float(FloatSize::b64)
            .validate_json_value(&serde_json::json!(1.5))
            .unwrap();
    }

    #[test]
    fn roundtrip_primitive_bytes() {
        let arr = ArcArrayD::from_shape_vec(vec![2, 3], (0u16..6).collect()).unwrap();
        for endian in [Endian::Little, Endian::Big] {
            let mut buf = Vec::new();
            u16::write_array_to(arr.clone(), &mut buf, endian).unwrap();
            assert_eq!(buf.len(), 12);
            let arr2 = u16::read_array_from(buf.as_slice(), endian, &[2, 3]).unwrap();
            assert_eq!(arr, arr2);
        }
    }
}
