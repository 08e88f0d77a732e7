use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    chunk_grid::ChunkGridType,
    chunk_key_encoding::ChunkKeyEncoding,
    codecs::{aa::AACodecType, ab::ABCodecType, bb::BBCodecType, CodecChain},
    data_type::{DataType, ReflectedType},
    CoordVec, Error, GridCoord, MaybeNdim, Ndim, ZARR_FORMAT,
};

pub type JsonObject = HashMap<String, serde_json::Value>;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Array,
}

/// The persisted description of an array: everything in its
/// `zarr.json` object.
///
/// Use the [ArrayMetadataBuilder] to construct this in a convenient way.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ArrayMetadata {
    zarr_format: usize,
    node_type: NodeType,
    shape: GridCoord,
    data_type: DataType,
    chunk_grid: ChunkGridType,
    chunk_key_encoding: ChunkKeyEncoding,
    fill_value: serde_json::Value,
    #[serde(default)]
    codecs: CodecChain,
    #[serde(default)]
    attributes: JsonObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimension_names: Option<CoordVec<Option<String>>>,
}

impl Ndim for ArrayMetadata {
    fn ndim(&self) -> usize {
        self.shape.len()
    }
}

impl ArrayMetadata {
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn chunk_shape(&self) -> &[u64] {
        self.chunk_grid.chunk_shape()
    }

    pub fn chunk_grid(&self) -> &ChunkGridType {
        &self.chunk_grid
    }

    pub fn chunk_key_encoding(&self) -> &ChunkKeyEncoding {
        &self.chunk_key_encoding
    }

    pub fn codecs(&self) -> &CodecChain {
        &self.codecs
    }

    pub fn attributes(&self) -> &JsonObject {
        &self.attributes
    }

    pub fn dimension_names(&self) -> Option<&[Option<String>]> {
        self.dimension_names.as_deref()
    }

    /// Check every structural invariant which serde cannot.
    pub fn validate(&self) -> Result<(), Error> {
        if self.zarr_format != ZARR_FORMAT {
            return Err(Error::metadata(format!(
                "zarr_format is {}, expected {}",
                self.zarr_format, ZARR_FORMAT
            )));
        }
        if self.chunk_grid.maybe_ndim() != Some(self.ndim()) {
            return Err(Error::metadata("chunk grid rank mismatches array rank"));
        }
        if self.chunk_shape().iter().any(|c| *c == 0) {
            return Err(Error::metadata("chunk shape contains a zero"));
        }
        if let Some(names) = &self.dimension_names {
            if names.len() != self.ndim() {
                return Err(Error::metadata("one dimension name needed per axis"));
            }
        }
        self.codecs
            .validate_ndim()
            .map_err(Error::metadata)?;
        if let Some(n) = self.codecs.maybe_ndim() {
            if n != self.ndim() {
                return Err(Error::metadata("codec rank mismatches array rank"));
            }
        }
        self.data_type
            .validate_json_value(&self.fill_value)
            .map_err(|_| Error::metadata("fill value does not fit the data type"))?;
        self.codecs
            .validate_sharding()
            .map_err(|e| Error::UnsupportedFeature(e.to_string()))?;
        if let Some(sharding) = self.codecs.sharding() {
            sharding
                .sub_chunks_per_axis(self.chunk_shape())
                .map_err(|e| Error::metadata(e.to_string()))?;
        }
        Ok(())
    }

    /// The fill value as the array's reflected element type.
    pub fn get_effective_fill_value<T: ReflectedType>(&self) -> Result<T, Error> {
        if T::ZARR_TYPE != self.data_type {
            return Err(Error::metadata(format!(
                "reflected type {} mismatches array data type {}",
                T::ZARR_TYPE,
                self.data_type
            )));
        }
        serde_json::from_value(self.fill_value.clone())
            .map_err(|_| Error::metadata("could not deserialize fill value"))
    }
}

pub struct ArrayMetadataBuilder<T: ReflectedType> {
    shape: GridCoord,
    chunk_grid: Option<ChunkGridType>,
    chunk_key_encoding: Option<ChunkKeyEncoding>,
    fill_value: Option<T>,
    codecs: CodecChain,
    attributes: JsonObject,
    dimension_names: Option<CoordVec<Option<String>>>,
}

impl<T: ReflectedType> ArrayMetadataBuilder<T> {
    /// Prepare metadata for an array with a shape and a reflected
    /// data type.
    ///
    /// At a minimum, [ArrayMetadataBuilder::chunk_grid()] should be
    /// called, as the default behaviour is to have a single chunk for
    /// the entire array.
    pub fn new(shape: &[u64]) -> Self {
        Self {
            shape: shape.iter().cloned().collect(),
            chunk_grid: None,
            chunk_key_encoding: None,
            fill_value: None,
            codecs: CodecChain::default(),
            attributes: HashMap::default(),
            dimension_names: None,
        }
    }

    /// Set the chunk grid.
    ///
    /// Fails if the chunk grid is incompatible with the array's
    /// dimensionality.
    pub fn chunk_grid<G: Into<ChunkGridType>>(mut self, chunk_grid: G) -> Result<Self, &'static str> {
        let cg = chunk_grid.into();
        self.union_ndim(&cg)?;
        self.chunk_grid = Some(cg);
        Ok(self)
    }

    /// Set the chunk key encoding.
    ///
    /// By default, uses the default chunk key encoding
    /// (`c/`-prefixed, `/`-separated).
    pub fn chunk_key_encoding<E: Into<ChunkKeyEncoding>>(mut self, chunk_key_encoding: E) -> Self {
        self.chunk_key_encoding = Some(chunk_key_encoding.into());
        self
    }

    /// Set the fill value.
    ///
    /// By default, uses the data type's default value, which is
    /// generally `false` or `0`.
    pub fn fill_value(mut self, fill_value: T) -> Self {
        self.fill_value = Some(fill_value);
        self
    }

    /// Set the array->bytes codec.
    ///
    /// Replaces an existing AB codec.
    /// Fails if the dimensions are not compatible with the array's shape.
    pub fn ab_codec<C: Into<ABCodecType>>(mut self, codec: C) -> Result<Self, &'static str> {
        let c = codec.into();
        self.union_ndim(&c)?;
        self.codecs.replace_ab_codec(Some(c));
        Ok(self)
    }

    /// Append an array->array codec.
    ///
    /// This will be the last AA encoder, or first AA decoder.
    ///
    /// Fails if the dimensions are not compatible with the array's shape.
    pub fn push_aa_codec<C: Into<AACodecType>>(mut self, codec: C) -> Result<Self, &'static str> {
        let c = codec.into();
        self.union_ndim(&c)?;
        self.codecs.aa_codecs_mut().push(c);
        Ok(self)
    }

    /// Append a bytes->bytes codec.
    ///
    /// This will be the last BB encoder, or first BB decoder.
    pub fn push_bb_codec<C: Into<BBCodecType>>(mut self, codec: C) -> Self {
        let c = codec.into();
        self.codecs.bb_codecs_mut().push(c);
        self
    }

    pub fn set_attribute<S: Serialize>(
        mut self,
        key: String,
        value: S,
    ) -> Result<Self, &'static str> {
        let v = serde_json::to_value(value).map_err(|_| "Could not serialize value")?;
        self.attributes.insert(key, v);
        Ok(self)
    }

    /// Set the dimension names.
    ///
    /// Fails if the number of dimension names does not match the
    /// array's dimensionality.
    pub fn dimension_names(
        mut self,
        names: CoordVec<Option<String>>,
    ) -> Result<Self, &'static str> {
        if names.len() != self.shape.len() {
            return Err("Dimension names has wrong length");
        }
        self.dimension_names = Some(names);
        Ok(self)
    }

    /// Build and validate the [ArrayMetadata].
    pub fn build(self) -> Result<ArrayMetadata, Error> {
        let chunk_grid = self
            .chunk_grid
            .unwrap_or_else(|| ChunkGridType::from(self.shape.as_slice()));
        let chunk_key_encoding = self.chunk_key_encoding.unwrap_or_default();
        let fill_value = self.fill_value.unwrap_or_default();

        let meta = ArrayMetadata {
            zarr_format: ZARR_FORMAT,
            node_type: NodeType::Array,
            shape: self.shape,
            data_type: T::ZARR_TYPE,
            chunk_grid,
            chunk_key_encoding,
            fill_value: serde_json::to_value(fill_value)
                .map_err(|_| Error::metadata("could not serialize fill value"))?,
            codecs: self.codecs,
            attributes: self.attributes,
            dimension_names: self.dimension_names,
        };
        meta.validate()?;
        Ok(meta)
    }
}

impl<T: ReflectedType> Ndim for ArrayMetadataBuilder<T> {
    fn ndim(&self) -> usize {
        self.shape.len()
    }
}
