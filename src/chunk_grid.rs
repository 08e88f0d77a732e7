use ndarray::{IxDyn, SliceInfo, SliceInfoElem};
use serde::{Deserialize, Serialize};

use crate::{CoordVec, Error, GridCoord, MaybeNdim, Ndim};

/// Half-open extent along one axis: `[offset, offset + shape)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ArraySlice {
    pub offset: u64,
    pub shape: u64,
}

impl ArraySlice {
    pub fn new(offset: u64, shape: u64) -> Self {
        Self { offset, shape }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.shape
    }
}

/// An axis-aligned box within an array, as one [ArraySlice] per axis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArrayRegion(CoordVec<ArraySlice>);

impl FromIterator<ArraySlice> for ArrayRegion {
    fn from_iter<T: IntoIterator<Item = ArraySlice>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Ndim for ArrayRegion {
    fn ndim(&self) -> usize {
        self.0.len()
    }
}

impl ArrayRegion {
    pub fn from_offset_shape(offset: &[u64], shape: &[u64]) -> Self {
        offset
            .iter()
            .zip(shape.iter())
            .map(|(o, s)| ArraySlice::new(*o, *s))
            .collect()
    }

    /// Region of the same shape with all offsets zero.
    pub fn at_origin(&self) -> Self {
        self.0
            .iter()
            .map(|sl| ArraySlice::new(0, sl.shape))
            .collect()
    }

    /// Whether this region covers the whole of an array with the given
    /// shape, i.e. every axis slice is `0..shape[i]`.
    pub fn is_whole(&self, shape: &[u64]) -> bool {
        self.0.len() == shape.len()
            && self
                .0
                .iter()
                .zip(shape.iter())
                .all(|(sl, sh)| sl.offset == 0 && &sl.shape == sh)
    }

    pub fn offset(&self) -> GridCoord {
        self.0.iter().map(|s| s.offset).collect()
    }

    pub fn shape(&self) -> GridCoord {
        self.0.iter().map(|s| s.shape).collect()
    }

    pub fn end(&self) -> GridCoord {
        self.0.iter().map(|s| s.end()).collect()
    }

    pub fn numel(&self) -> u64 {
        self.0.iter().map(|s| s.shape).product()
    }

    pub fn slices(&self) -> &[ArraySlice] {
        self.0.as_slice()
    }

    /// An [ndarray] slice argument selecting this region.
    pub fn slice_info(&self) -> SliceInfo<Vec<SliceInfoElem>, IxDyn, IxDyn> {
        let indices: Vec<_> = self
            .0
            .iter()
            .map(|sl| SliceInfoElem::Slice {
                start: sl.offset as isize,
                end: Some(sl.end() as isize),
                step: 1,
            })
            .collect();
        SliceInfo::try_from(indices).expect("Bad index size")
    }
}

/// One element of a user selection along one axis.
///
/// Open bounds default to the full extent of the axis. Steps other
/// than 1 are rejected when the selection is normalized.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Slice {
    pub start: Option<u64>,
    pub stop: Option<u64>,
    pub step: Option<u64>,
}

impl Slice {
    pub fn full() -> Self {
        Self::default()
    }

    pub fn new(start: u64, stop: u64) -> Self {
        Self {
            start: Some(start),
            stop: Some(stop),
            step: None,
        }
    }
}

impl From<std::ops::Range<u64>> for Slice {
    fn from(r: std::ops::Range<u64>) -> Self {
        Self::new(r.start, r.end)
    }
}

impl From<std::ops::RangeFull> for Slice {
    fn from(_: std::ops::RangeFull) -> Self {
        Self::full()
    }
}

/// Normalize a user selection against an array shape.
///
/// The selection is broadcast to the array's rank: missing trailing
/// axes select their full extent. Non-unit steps, out-of-bounds stops,
/// inverted bounds, and selections of higher rank than the array are
/// all [Error::InvalidSelection].
pub fn normalize_selection(selection: &[Slice], shape: &[u64]) -> Result<ArrayRegion, Error> {
    if selection.len() > shape.len() {
        return Err(Error::selection(format!(
            "selection has rank {}, array has rank {}",
            selection.len(),
            shape.len()
        )));
    }
    let mut slices = CoordVec::with_capacity(shape.len());
    for (idx, dim) in shape.iter().enumerate() {
        let sel = selection.get(idx).copied().unwrap_or_default();
        if let Some(step) = sel.step {
            if step != 1 {
                return Err(Error::selection(format!("step {} is unsupported", step)));
            }
        }
        let start = sel.start.unwrap_or(0);
        let stop = sel.stop.unwrap_or(*dim);
        if stop > *dim {
            return Err(Error::selection(format!(
                "axis {}: stop {} exceeds extent {}",
                idx, stop, dim
            )));
        }
        if start > stop {
            return Err(Error::selection(format!(
                "axis {}: start {} exceeds stop {}",
                idx, start, stop
            )));
        }
        slices.push(ArraySlice::new(start, stop - start));
    }
    Ok(ArrayRegion(slices))
}

/// The intersection of one chunk with a selected region:
/// the chunk's grid coordinates, the selected box within the chunk,
/// and the matching box within the selection's output array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartialChunk {
    pub chunk_idx: GridCoord,
    pub chunk_region: ArrayRegion,
    pub out_region: ArrayRegion,
}

/// Iterator over the chunks intersecting a region of the array.
///
/// Chunks are visited in row-major order of their grid coordinates,
/// but callers must not rely on the order: per-chunk work is issued
/// concurrently.
pub struct PartialChunkIter {
    region: ArrayRegion,
    chunk_shape: GridCoord,
    first_chunk: GridCoord,
    end_chunk: GridCoord,
    next: Option<GridCoord>,
}

impl PartialChunkIter {
    fn new(region: ArrayRegion, chunk_shape: GridCoord) -> Self {
        let mut first_chunk = GridCoord::with_capacity(region.ndim());
        let mut end_chunk = GridCoord::with_capacity(region.ndim());
        let mut is_empty = false;
        for (sl, cs) in region.slices().iter().zip(chunk_shape.iter()) {
            if sl.shape == 0 {
                is_empty = true;
            }
            first_chunk.push(sl.offset / cs);
            end_chunk.push((sl.end() + cs - 1) / cs);
        }
        let next = if is_empty {
            None
        } else {
            Some(first_chunk.clone())
        };
        Self {
            region,
            chunk_shape,
            first_chunk,
            end_chunk,
            next,
        }
    }

    fn project(&self, chunk_idx: &GridCoord) -> PartialChunk {
        let mut chunk_region = CoordVec::with_capacity(chunk_idx.len());
        let mut out_region = CoordVec::with_capacity(chunk_idx.len());
        for ((k, cs), sl) in chunk_idx
            .iter()
            .zip(self.chunk_shape.iter())
            .zip(self.region.slices().iter())
        {
            let origin = k * cs;
            let start = sl.offset.max(origin);
            let end = sl.end().min(origin + cs);
            chunk_region.push(ArraySlice::new(start - origin, end - start));
            out_region.push(ArraySlice::new(start - sl.offset, end - start));
        }
        PartialChunk {
            chunk_idx: chunk_idx.clone(),
            chunk_region: ArrayRegion(chunk_region),
            out_region: ArrayRegion(out_region),
        }
    }
}

impl Iterator for PartialChunkIter {
    type Item = PartialChunk;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        let out = self.project(&current);

        // odometer advance, last axis fastest;
        // a zero-dimensional region has exactly one (scalar) chunk
        let mut advanced = current;
        let mut done = true;
        for axis in (0..advanced.len()).rev() {
            advanced[axis] += 1;
            if advanced[axis] < self.end_chunk[axis] {
                done = false;
                break;
            }
            advanced[axis] = self.first_chunk[axis];
        }
        if !done {
            self.next = Some(advanced);
        }
        Some(out)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RegularChunkGrid {
    chunk_shape: GridCoord,
}

impl RegularChunkGrid {
    pub fn new<T: Into<GridCoord>>(chunk_shape: T) -> Self {
        let chunk_shape = chunk_shape.into();
        Self { chunk_shape }
    }

    pub fn chunk_shape(&self) -> &[u64] {
        &self.chunk_shape
    }

    /// Enumerate the chunks intersecting the region with their
    /// in-chunk and in-output sub-regions.
    pub fn chunks_in_region(&self, region: &ArrayRegion) -> PartialChunkIter {
        PartialChunkIter::new(region.clone(), self.chunk_shape.clone())
    }
}

impl Ndim for RegularChunkGrid {
    fn ndim(&self) -> usize {
        self.chunk_shape.len()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "name", content = "configuration", rename_all = "lowercase")]
pub enum ChunkGridType {
    Regular(RegularChunkGrid),
}

impl MaybeNdim for ChunkGridType {
    fn maybe_ndim(&self) -> Option<usize> {
        match self {
            Self::Regular(g) => Some(g.ndim()),
        }
    }
}

impl From<&[u64]> for ChunkGridType {
    fn from(value: &[u64]) -> Self {
        let cs: GridCoord = value.iter().cloned().collect();
        Self::Regular(RegularChunkGrid::new(cs))
    }
}

impl ChunkGridType {
    pub fn chunk_shape(&self) -> &[u64] {
        match self {
            Self::Regular(g) => g.chunk_shape(),
        }
    }

    pub fn chunks_in_region(&self, region: &ArrayRegion) -> PartialChunkIter {
        match self {
            Self::Regular(g) => g.chunks_in_region(region),
        }
    }
}
