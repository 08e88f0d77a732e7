use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use log::trace;
use serde::{Deserialize, Serialize};
use smallvec::smallvec;

use crate::{
    chunk_grid::{ArrayRegion, PartialChunk, RegularChunkGrid},
    codecs::{aa::AACodecType, bb::BBCodecType, ArrayRepr, CodecChain, CodecError},
    data_type::ReflectedType,
    store::{ByteRange, Store, StoreError},
    value_handle::ValueHandle,
    ArcArrayD, CoordVec, Error, GridCoord, MaybeNdim, Ndim,
};

use super::{ABCodec, ABCodecType};

/// Packs sub-chunks of an outer chunk into one stored object:
/// encoded sub-chunk payloads followed by a fixed-size index of
/// `(offset, length)` pairs, little-endian, at the tail.
///
/// Sub-chunks run through their own inner codec pipeline. Reads and
/// writes of part of a shard go through the tail index and ranged
/// store requests rather than whole-object transfers.
///
/// Partial writes append: superseded sub-chunk bytes are left behind
/// as dead space until a whole-chunk write rebuilds the shard.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ShardingIndexedCodec {
    pub chunk_shape: GridCoord,
    #[serde(default)]
    pub codecs: CodecChain,
}

impl Ndim for ShardingIndexedCodec {
    fn ndim(&self) -> usize {
        self.chunk_shape.len()
    }
}

/// Location of one sub-chunk's bytes within the shard.
/// All-ones marks an absent (fill value) sub-chunk.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ChunkAddress {
    pub offset: u64,
    pub nbytes: u64,
}

impl ChunkAddress {
    pub const NBYTES: u64 = 16;

    pub fn is_empty(&self) -> bool {
        self.offset == u64::MAX && self.nbytes == u64::MAX
    }

    pub fn empty() -> Self {
        Self {
            offset: u64::MAX,
            nbytes: u64::MAX,
        }
    }

    pub fn from_reader<R: Read>(r: &mut R) -> Result<Self, std::io::Error> {
        let offset = r.read_u64::<LittleEndian>()?;
        let nbytes = r.read_u64::<LittleEndian>()?;
        Ok(Self { offset, nbytes })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), std::io::Error> {
        w.write_u64::<LittleEndian>(self.offset)?;
        w.write_u64::<LittleEndian>(self.nbytes)?;
        Ok(())
    }

    pub fn end_offset(&self) -> Option<u64> {
        if self.is_empty() {
            None
        } else {
            Some(self.offset + self.nbytes)
        }
    }
}

/// Row-major linear index of a grid coordinate.
/// Callers must pass an in-bounds coordinate of the right rank.
fn linear_index(coord: &[u64], shape: &[u64]) -> usize {
    debug_assert_eq!(coord.len(), shape.len());
    let mut total = 0;
    let mut prev_s: usize = 1;
    for (s, i) in shape.iter().rev().zip(coord.iter().rev()) {
        debug_assert!(i < s);
        total += *i as usize * prev_s;
        prev_s *= *s as usize;
    }
    total
}

/// The shard's tail index: one [ChunkAddress] per sub-chunk, in
/// row-major order of sub-chunk grid coordinates.
pub struct ShardIndex {
    addrs: Vec<ChunkAddress>,
    shape: GridCoord,
}

impl ShardIndex {
    /// Index with every sub-chunk absent.
    pub fn new_empty(shape: GridCoord) -> Self {
        let n: u64 = shape.iter().product();
        Self {
            addrs: vec![ChunkAddress::empty(); n as usize],
            shape,
        }
    }

    /// Size in bytes of an index over `n_subchunks` sub-chunks.
    pub fn nbytes_for(n_subchunks: u64) -> u64 {
        n_subchunks * ChunkAddress::NBYTES
    }

    pub fn nbytes(&self) -> u64 {
        Self::nbytes_for(self.addrs.len() as u64)
    }

    pub fn n_subchunks(&self) -> usize {
        self.addrs.len()
    }

    pub fn from_bytes(bytes: &[u8], shape: GridCoord) -> Result<Self, CodecError> {
        let n: u64 = shape.iter().product();
        if bytes.len() as u64 != Self::nbytes_for(n) {
            return Err(CodecError::MalformedShard(format!(
                "index of {} bytes cannot hold {} entries",
                bytes.len(),
                n
            )));
        }
        let mut curs = Cursor::new(bytes);
        let mut addrs = Vec::with_capacity(n as usize);
        for _ in 0..n {
            addrs.push(ChunkAddress::from_reader(&mut curs)?);
        }
        Ok(Self { addrs, shape })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), std::io::Error> {
        for addr in self.addrs.iter() {
            addr.write_to(w)?;
        }
        Ok(())
    }

    pub fn get(&self, coord: &[u64]) -> ChunkAddress {
        self.addrs[linear_index(coord, &self.shape)]
    }

    pub fn set(&mut self, coord: &[u64], addr: ChunkAddress) {
        self.addrs[linear_index(coord, &self.shape)] = addr;
    }

    pub fn is_all_empty(&self) -> bool {
        self.addrs.iter().all(|a| a.is_empty())
    }
}

fn bits_for(extent: u64) -> u32 {
    if extent <= 1 {
        0
    } else {
        u64::BITS - (extent - 1).leading_zeros()
    }
}

/// Iterator over grid coordinates in Morton (Z-curve) order.
///
/// Coordinate bits are interleaved LSB-first, axis 0 contributing the
/// lowest bit of each round. Axes whose extents are exhausted drop out
/// of later rounds, and codes decoding outside the grid are skipped,
/// so every in-bounds coordinate is produced exactly once.
pub struct MortonIter {
    shape: GridCoord,
    bits: CoordVec<u32>,
    max_bits: u32,
    code: u64,
    end_code: u64,
    remaining: u64,
}

impl MortonIter {
    fn new(shape: &[u64]) -> Self {
        let shape: GridCoord = shape.iter().cloned().collect();
        let bits: CoordVec<u32> = shape.iter().map(|s| bits_for(*s)).collect();
        let max_bits = bits.iter().max().copied().unwrap_or(0);
        let total_bits: u32 = bits.iter().sum();
        let remaining: u64 = shape.iter().product();
        let end_code = 1u64
            .checked_shl(total_bits)
            .expect("shard sub-chunk grid too large to enumerate");
        Self {
            shape,
            bits,
            max_bits,
            code: 0,
            end_code,
            remaining,
        }
    }

    fn decode(&self, code: u64) -> GridCoord {
        let mut out: GridCoord = smallvec![0; self.shape.len()];
        let mut input_bit = 0;
        for coord_bit in 0..self.max_bits {
            for (dim, dim_bits) in self.bits.iter().enumerate() {
                if coord_bit < *dim_bits {
                    let bit = (code >> input_bit) & 1;
                    out[dim] |= bit << coord_bit;
                    input_bit += 1;
                }
            }
        }
        out
    }
}

impl Iterator for MortonIter {
    type Item = GridCoord;

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining > 0 && self.code < self.end_code {
            let coord = self.decode(self.code);
            self.code += 1;
            if coord.iter().zip(self.shape.iter()).all(|(c, s)| c < s) {
                self.remaining -= 1;
                return Some(coord);
            }
        }
        None
    }
}

/// Grid coordinates of the given shape in Morton order.
pub fn morton_order_iter(shape: &[u64]) -> MortonIter {
    MortonIter::new(shape)
}

impl ShardingIndexedCodec {
    pub fn new<C: Into<GridCoord>>(chunk_shape: C) -> Self {
        Self {
            chunk_shape: chunk_shape.into(),
            codecs: CodecChain::default(),
        }
    }

    /// Set the inner array->bytes codec.
    ///
    /// Replaces an existing AB codec.
    /// Fails if the dimensions are not compatible with the sub-chunks.
    pub fn ab_codec<C: Into<ABCodecType>>(mut self, codec: C) -> Result<Self, &'static str> {
        let c = codec.into();
        self.union_ndim(&c)?;
        self.codecs.replace_ab_codec(Some(c));
        Ok(self)
    }

    /// Append an inner array->array codec.
    ///
    /// This will be the last AA encoder, or first AA decoder.
    ///
    /// Fails if the dimensions are not compatible with the sub-chunks.
    pub fn push_aa_codec<C: Into<AACodecType>>(mut self, codec: C) -> Result<Self, &'static str> {
        let c = codec.into();
        self.union_ndim(&c)?;
        self.codecs.aa_codecs_mut().push(c);
        Ok(self)
    }

    /// Append an inner bytes->bytes codec.
    ///
    /// This will be the last BB encoder, or first BB decoder.
    pub fn push_bb_codec<C: Into<BBCodecType>>(mut self, codec: C) -> Self {
        let c = codec.into();
        self.codecs.bb_codecs_mut().push(c);
        self
    }

    /// Sub-chunk count per axis for an outer chunk of the given shape.
    pub fn sub_chunks_per_axis(&self, shard_shape: &[u64]) -> Result<GridCoord, CodecError> {
        if shard_shape.len() != self.chunk_shape.len()
            || self
                .chunk_shape
                .iter()
                .zip(shard_shape.iter())
                .any(|(c, s)| *c == 0 || s % c != 0)
        {
            return Err(CodecError::ShardShapeMismatch {
                shard: shard_shape.to_vec(),
                sub_chunk: self.chunk_shape.to_vec(),
            });
        }
        Ok(self
            .chunk_shape
            .iter()
            .zip(shard_shape.iter())
            .map(|(c, s)| s / c)
            .collect())
    }

    fn sub_chunk_repr<T: ReflectedType>(&self, fill_value: T) -> ArrayRepr<T> {
        ArrayRepr {
            shape: self.chunk_shape.clone(),
            fill_value,
        }
    }

    fn sub_chunk_region(&self, coord: &[u64]) -> ArrayRegion {
        let origin: GridCoord = coord
            .iter()
            .zip(self.chunk_shape.iter())
            .map(|(k, c)| k * c)
            .collect();
        ArrayRegion::from_offset_shape(&origin, &self.chunk_shape)
    }

    /// Decode only the parts of the shard which intersect `selection`,
    /// using the tail index and ranged reads; never fetches untouched
    /// sub-chunks. [None] means the shard object is absent entirely.
    pub async fn decode_partial<'a, S: Store, T: ReflectedType>(
        &self,
        handle: &ValueHandle<'a, S, T>,
        selection: &ArrayRegion,
        decoded_repr: &ArrayRepr<T>,
    ) -> Result<Option<ArcArrayD<T>>, Error> {
        let n = self.sub_chunks_per_axis(&decoded_repr.shape)?;
        let n_total: u64 = n.iter().product();

        let index_bytes = match handle
            .get_partial(&[ByteRange::Suffix(ShardIndex::nbytes_for(n_total))])
            .await
        {
            Ok(Some(mut v)) => v.swap_remove(0),
            Ok(None) => return Ok(None),
            Err(e) => return Err(remap_range_error(e)),
        };
        let index = ShardIndex::from_bytes(&index_bytes, n)?;

        let grid = RegularChunkGrid::new(self.chunk_shape.clone());
        let mut out = ArrayRepr::new(&selection.shape(), decoded_repr.fill_value).empty_array();

        let mut touched: Vec<(PartialChunk, ChunkAddress)> = Vec::new();
        for pc in grid.chunks_in_region(selection) {
            let addr = index.get(&pc.chunk_idx);
            if !addr.is_empty() {
                touched.push((pc, addr));
            }
        }
        trace!(
            "partial shard read: {} of {} sub-chunks live",
            touched.len(),
            n_total
        );
        if touched.is_empty() {
            return Ok(Some(out));
        }

        let ranges: Vec<ByteRange> = touched
            .iter()
            .map(|(_, addr)| ByteRange::Interval {
                offset: addr.offset,
                length: addr.nbytes,
            })
            .collect();
        let fetched = match handle.get_partial(&ranges).await {
            Ok(Some(v)) => v,
            Ok(None) => return Ok(None),
            Err(e) => return Err(remap_range_error(e)),
        };

        let sub_repr = self.sub_chunk_repr(decoded_repr.fill_value);
        for ((pc, _), bytes) in touched.iter().zip(fetched) {
            let sub = self.codecs.decode(bytes, &sub_repr)?;
            out.slice_mut(pc.out_region.slice_info())
                .assign(&sub.slice(pc.chunk_region.slice_info()));
        }
        Ok(Some(out))
    }

    /// Merge `values` (shaped like `selection`) into the shard behind
    /// `handle` without rewriting untouched sub-chunks' bytes.
    ///
    /// Fully covered sub-chunks are re-encoded from the new values;
    /// partially covered ones are read, merged, and re-encoded. New
    /// payloads are appended after the existing end of payload, so
    /// untouched index entries are unchanged. Returns the replacement
    /// value for the shard key: bytes, or absence when every sub-chunk
    /// ends up at the fill value.
    pub async fn encode_partial<'a, S: Store, T: ReflectedType>(
        &self,
        handle: &ValueHandle<'a, S, T>,
        values: &ArcArrayD<T>,
        selection: &ArrayRegion,
        decoded_repr: &ArrayRepr<T>,
    ) -> Result<ValueHandle<'a, S, T>, Error> {
        let n = self.sub_chunks_per_axis(&decoded_repr.shape)?;
        let n_total: u64 = n.iter().product();
        let index_len = ShardIndex::nbytes_for(n_total);
        let sub_repr = self.sub_chunk_repr(decoded_repr.fill_value);

        let (mut index, mut payload) = match handle.to_bytes().await? {
            Some(b) => {
                if (b.len() as u64) < index_len {
                    return Err(CodecError::MalformedShard(format!(
                        "shard of {} bytes is smaller than its {} byte index",
                        b.len(),
                        index_len
                    ))
                    .into());
                }
                let split = b.len() - index_len as usize;
                (
                    ShardIndex::from_bytes(&b[split..], n.clone())?,
                    b[..split].to_vec(),
                )
            }
            None => (ShardIndex::new_empty(n.clone()), Vec::new()),
        };

        let grid = RegularChunkGrid::new(self.chunk_shape.clone());
        for pc in grid.chunks_in_region(selection) {
            let new_block: ArcArrayD<T> = if pc.chunk_region.is_whole(&self.chunk_shape) {
                values.slice(pc.out_region.slice_info()).to_shared()
            } else {
                let old_addr = index.get(&pc.chunk_idx);
                let old_arr = if old_addr.is_empty() {
                    sub_repr.empty_array()
                } else {
                    let end = old_addr.offset + old_addr.nbytes;
                    if end > payload.len() as u64 {
                        return Err(CodecError::ShardIndexOutOfRange {
                            offset: old_addr.offset,
                            length: old_addr.nbytes,
                            payload_size: payload.len() as u64,
                        }
                        .into());
                    }
                    let bytes = Bytes::copy_from_slice(
                        &payload[old_addr.offset as usize..end as usize],
                    );
                    self.codecs.decode(bytes, &sub_repr)?
                };
                let mut merged = old_arr.to_owned();
                merged
                    .slice_mut(pc.chunk_region.slice_info())
                    .assign(&values.slice(pc.out_region.slice_info()));
                merged.into_shared()
            };

            if new_block.iter().all(|v| *v == decoded_repr.fill_value) {
                index.set(&pc.chunk_idx, ChunkAddress::empty());
            } else {
                let b = self.codecs.encode(new_block, &sub_repr)?;
                index.set(
                    &pc.chunk_idx,
                    ChunkAddress {
                        offset: payload.len() as u64,
                        nbytes: b.len() as u64,
                    },
                );
                payload.extend_from_slice(&b);
            }
        }

        if index.is_all_empty() {
            return Ok(ValueHandle::Absent);
        }
        index.write_to(&mut payload).map_err(CodecError::Io)?;
        Ok(ValueHandle::Bytes(payload.into()))
    }
}

/// Ranged reads driven by index entries fail at the store when an
/// entry points outside the object; surface that as the codec error
/// it really is.
fn remap_range_error(e: Error) -> Error {
    match e {
        Error::Store(StoreError::OutOfRange(range, size)) => {
            Error::Codec(CodecError::ShardIndexOutOfRange {
                offset: range.start(size),
                length: range.length(size),
                payload_size: size,
            })
        }
        other => other,
    }
}

impl ABCodec for ShardingIndexedCodec {
    fn encode<T: ReflectedType>(
        &self,
        decoded: ArcArrayD<T>,
        decoded_repr: &ArrayRepr<T>,
    ) -> Result<Bytes, CodecError> {
        let shard_shape: GridCoord = decoded.shape().iter().map(|s| *s as u64).collect();
        let n = self.sub_chunks_per_axis(&shard_shape)?;
        let sub_repr = self.sub_chunk_repr(decoded_repr.fill_value);

        let mut index = ShardIndex::new_empty(n.clone());
        let mut payload: Vec<u8> = Vec::new();
        for coord in morton_order_iter(&n) {
            let region = self.sub_chunk_region(&coord);
            let view = decoded.slice(region.slice_info());
            if view.iter().all(|v| *v == decoded_repr.fill_value) {
                continue;
            }
            let b = self.codecs.encode(view.to_shared(), &sub_repr)?;
            index.set(
                &coord,
                ChunkAddress {
                    offset: payload.len() as u64,
                    nbytes: b.len() as u64,
                },
            );
            payload.extend_from_slice(&b);
        }
        index.write_to(&mut payload)?;
        Ok(payload.into())
    }

    fn decode<T: ReflectedType>(
        &self,
        encoded: Bytes,
        decoded_repr: &ArrayRepr<T>,
    ) -> Result<ArcArrayD<T>, CodecError> {
        let n = self.sub_chunks_per_axis(&decoded_repr.shape)?;
        let n_total: u64 = n.iter().product();
        let index_len = ShardIndex::nbytes_for(n_total);
        if (encoded.len() as u64) < index_len {
            return Err(CodecError::MalformedShard(format!(
                "shard of {} bytes is smaller than its {} byte index",
                encoded.len(),
                index_len
            )));
        }
        let payload_size = encoded.len() as u64 - index_len;
        let index = ShardIndex::from_bytes(&encoded[payload_size as usize..], n.clone())?;

        let mut arr = decoded_repr.empty_array();
        let sub_repr = self.sub_chunk_repr(decoded_repr.fill_value);
        for coord in morton_order_iter(&n) {
            let addr = index.get(&coord);
            if addr.is_empty() {
                continue;
            }
            if addr.offset + addr.nbytes > payload_size {
                return Err(CodecError::ShardIndexOutOfRange {
                    offset: addr.offset,
                    length: addr.nbytes,
                    payload_size,
                });
            }
            let sub_bytes =
                encoded.slice(addr.offset as usize..(addr.offset + addr.nbytes) as usize);
            let sub = self.codecs.decode(sub_bytes, &sub_repr)?;
            let region = self.sub_chunk_region(&coord);
            arr.slice_mut(region.slice_info()).assign(&sub);
        }
        Ok(arr)
    }
}
