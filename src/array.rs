use futures::{stream, StreamExt};
use log::{debug, trace};
use ndarray::{IxDyn, ShapeBuilder};

use crate::{
    chunk_grid::{normalize_selection, ArrayRegion, PartialChunk, Slice},
    chunk_key_encoding::ChunkKeyEncoder,
    codecs::ArrayRepr,
    data_type::ReflectedType,
    metadata::ArrayMetadata,
    store::{NodeKey, Store},
    to_usize,
    value_handle::ValueHandle,
    ArcArrayD, Error, GridCoord, Ndim,
};

/// Upper bound on in-flight chunk tasks per call; the effective limit
/// is the smaller of this and the number of chunks touched.
const MAX_CONCURRENT_CHUNKS: usize = 32;

fn chunk_concurrency(n_chunks: usize) -> usize {
    MAX_CONCURRENT_CHUNKS.min(n_chunks).max(1)
}

/// In-memory layout of buffers returned by reads. Independent of any
/// transpose codec: this is about the caller's view, not storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryOrder {
    #[default]
    C,
    F,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfiguration {
    pub order: MemoryOrder,
}

impl RuntimeConfiguration {
    pub fn new(order: MemoryOrder) -> Self {
        Self { order }
    }
}

/// Handle to one stored array: metadata plus the store it lives in.
///
/// The handle is read-only after construction and can be shared across
/// tasks. Reads and writes fan out over the touched chunks with
/// bounded concurrency; the first failing chunk task fails the whole
/// call and cancels the rest. Writes to the same chunk from separate
/// concurrent `set` calls are last-write-wins at the store; concurrent
/// writers from separate processes are not supported.
pub struct Array<'s, S: Store, T: ReflectedType> {
    store: &'s S,
    key: NodeKey,
    meta_key: NodeKey,
    metadata: ArrayMetadata,
    fill_value: T,
    runtime: RuntimeConfiguration,
}

impl<'s, S: Store, T: ReflectedType> Ndim for Array<'s, S, T> {
    fn ndim(&self) -> usize {
        self.metadata.ndim()
    }
}

impl<'s, S: Store, T: ReflectedType> Array<'s, S, T> {
    fn new(
        store: &'s S,
        key: NodeKey,
        metadata: ArrayMetadata,
        runtime: RuntimeConfiguration,
    ) -> Result<Self, Error> {
        let mut meta_key = key.clone();
        meta_key.with_metadata();
        let fill_value = metadata.get_effective_fill_value()?;
        Ok(Self {
            store,
            key,
            meta_key,
            metadata,
            fill_value,
            runtime,
        })
    }

    /// Create the array: validate the metadata, persist `zarr.json`,
    /// return the handle.
    pub async fn create(
        store: &'s S,
        key: NodeKey,
        metadata: ArrayMetadata,
        runtime: RuntimeConfiguration,
    ) -> Result<Self, Error> {
        metadata.validate()?;
        let array = Self::new(store, key, metadata, runtime)?;
        array.write_meta().await?;
        Ok(array)
    }

    /// Open an existing array by reading and validating its `zarr.json`.
    pub async fn open(
        store: &'s S,
        key: NodeKey,
        runtime: RuntimeConfiguration,
    ) -> Result<Self, Error> {
        let mut meta_key = key.clone();
        meta_key.with_metadata();
        let bytes = store
            .get(&meta_key)
            .await?
            .ok_or_else(|| Error::metadata(format!("no array metadata at {}", meta_key)))?;
        let metadata: ArrayMetadata =
            serde_json::from_slice(&bytes).map_err(|e| Error::metadata(e.to_string()))?;
        metadata.validate()?;
        debug!("opened array at {}", key);
        Self::new(store, key, metadata, runtime)
    }

    async fn write_meta(&self) -> Result<(), Error> {
        let buf = serde_json::to_vec_pretty(&self.metadata)
            .map_err(|e| Error::metadata(e.to_string()))?;
        debug!("writing array metadata to {}", self.meta_key);
        self.store.set(&self.meta_key, buf.into()).await?;
        Ok(())
    }

    pub fn metadata(&self) -> &ArrayMetadata {
        &self.metadata
    }

    pub fn shape(&self) -> &[u64] {
        self.metadata.shape()
    }

    pub fn chunk_shape(&self) -> &[u64] {
        self.metadata.chunk_shape()
    }

    pub fn fill_value(&self) -> T {
        self.fill_value
    }

    fn chunk_repr(&self) -> ArrayRepr<T> {
        ArrayRepr::new(self.chunk_shape(), self.fill_value)
    }

    fn chunk_handle(&self, chunk_idx: &[u64]) -> ValueHandle<'s, S, T> {
        let key = self
            .metadata
            .chunk_key_encoding()
            .chunk_key(&self.key, chunk_idx);
        ValueHandle::file(self.store, key)
    }

    /// Allocate in the runtime-configured memory order.
    fn new_filled(&self, shape: &[u64], value: T) -> ArcArrayD<T> {
        let shape = to_usize(shape);
        match self.runtime.order {
            MemoryOrder::C => ArcArrayD::from_elem(shape.as_slice(), value),
            MemoryOrder::F => ArcArrayD::from_elem(IxDyn(shape.as_slice()).f(), value),
        }
    }

    async fn fetch_chunk(
        &self,
        pc: PartialChunk,
    ) -> Result<(ArrayRegion, Option<ArcArrayD<T>>), Error> {
        let handle = self.chunk_handle(&pc.chunk_idx);
        trace!("reading chunk {:?}", pc.chunk_idx.as_slice());

        if let Some(sharding) = self.metadata.codecs().sharding() {
            let arr = sharding
                .decode_partial(&handle, &pc.chunk_region, &self.chunk_repr())
                .await?;
            return Ok((pc.out_region, arr));
        }

        match handle.to_bytes().await? {
            None => Ok((pc.out_region, None)),
            Some(bytes) => {
                let chunk = self.metadata.codecs().decode(bytes, &self.chunk_repr())?;
                let sub = chunk.slice(pc.chunk_region.slice_info()).to_shared();
                Ok((pc.out_region, Some(sub)))
            }
        }
    }

    /// Read a selection into a freshly allocated array of the
    /// selection's shape. Missing chunks and sub-chunks read as the
    /// fill value.
    pub async fn get(&self, selection: &[Slice]) -> Result<ArcArrayD<T>, Error> {
        let region = normalize_selection(selection, self.shape())?;
        let mut out = self.new_filled(&region.shape(), self.fill_value);

        let chunks: Vec<PartialChunk> =
            self.metadata.chunk_grid().chunks_in_region(&region).collect();
        let limit = chunk_concurrency(chunks.len());
        let mut results =
            stream::iter(chunks.into_iter().map(|pc| self.fetch_chunk(pc))).buffer_unordered(limit);
        while let Some(res) = results.next().await {
            let (out_region, fetched) = res?;
            if let Some(arr) = fetched {
                out.slice_mut(out_region.slice_info()).assign(&arr);
            }
        }
        Ok(out)
    }

    /// Encode and store one whole chunk, eliding it when it is
    /// entirely the fill value.
    async fn write_chunk(
        &self,
        handle: &ValueHandle<'s, S, T>,
        chunk_array: ArcArrayD<T>,
    ) -> Result<(), Error> {
        if chunk_array.iter().all(|v| *v == self.fill_value) {
            handle.set(ValueHandle::Absent).await
        } else {
            let bytes = self
                .metadata
                .codecs()
                .encode(chunk_array, &self.chunk_repr())?;
            handle.set(ValueHandle::Bytes(bytes)).await
        }
    }

    async fn write_chunk_selection(
        &self,
        pc: PartialChunk,
        value: &ArcArrayD<T>,
    ) -> Result<(), Error> {
        let handle = self.chunk_handle(&pc.chunk_idx);
        trace!("writing chunk {:?}", pc.chunk_idx.as_slice());

        if pc.chunk_region.is_whole(self.chunk_shape()) {
            // the fast path: replace the chunk outright
            let chunk_array = value.slice(pc.out_region.slice_info()).to_shared();
            return self.write_chunk(&handle, chunk_array).await;
        }

        if let Some(sharding) = self.metadata.codecs().sharding() {
            let slab = value.slice(pc.out_region.slice_info()).to_shared();
            let new_value = sharding
                .encode_partial(&handle, &slab, &pc.chunk_region, &self.chunk_repr())
                .await?;
            return handle.set(new_value).await;
        }

        // read-modify-write of a whole chunk
        let existing = match handle.to_bytes().await? {
            Some(bytes) => self.metadata.codecs().decode(bytes, &self.chunk_repr())?,
            None => self.chunk_repr().empty_array(),
        };
        let mut chunk = existing.to_owned();
        chunk
            .slice_mut(pc.chunk_region.slice_info())
            .assign(&value.slice(pc.out_region.slice_info()));
        self.write_chunk(&handle, chunk.into_shared()).await
    }

    /// Write `value` (shaped like the selection) into the selection.
    ///
    /// Chunks covered entirely are replaced; partially covered chunks
    /// are merged with their existing contents (through the sharding
    /// codec's partial path when it is the pipeline). Any chunk left
    /// entirely at the fill value has its key deleted.
    pub async fn set(&self, selection: &[Slice], value: &ArcArrayD<T>) -> Result<(), Error> {
        let region = normalize_selection(selection, self.shape())?;
        let value_shape: GridCoord = value.shape().iter().map(|s| *s as u64).collect();
        if value_shape != region.shape() {
            return Err(Error::selection(format!(
                "value shape {:?} mismatches selection shape {:?}",
                value_shape.as_slice(),
                region.shape().as_slice()
            )));
        }

        let chunks: Vec<PartialChunk> =
            self.metadata.chunk_grid().chunks_in_region(&region).collect();
        let limit = chunk_concurrency(chunks.len());
        let mut results = stream::iter(
            chunks
                .into_iter()
                .map(|pc| self.write_chunk_selection(pc, value)),
        )
        .buffer_unordered(limit);
        while let Some(res) = results.next().await {
            res?;
        }
        Ok(())
    }

    /// Broadcast a scalar over the selection.
    pub async fn set_scalar(&self, selection: &[Slice], value: T) -> Result<(), Error> {
        let region = normalize_selection(selection, self.shape())?;
        let arr = ArcArrayD::from_elem(to_usize(&region.shape()).as_slice(), value);
        self.set(selection, &arr).await
    }

    /// Remove the array: its metadata object and every chunk under
    /// its prefix.
    pub async fn erase(self) -> Result<(), Error> {
        for key in self.store.list_prefix(&self.key).await? {
            self.store.erase(&key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chunk_key_encoding::{Separator, V2ChunkKeyEncoding},
        codecs::{
            aa::TransposeCodec,
            ab::{endian::EndianCodec, sharding_indexed::ShardingIndexedCodec},
        },
        metadata::ArrayMetadataBuilder,
        store::MemoryStore,
    };
    use smallvec::smallvec;

    fn node_key(s: &str) -> NodeKey {
        s.parse().unwrap()
    }

    fn arange(n: usize) -> Vec<u16> {
        (0..n as u16).collect()
    }

    /// Deterministic pseudo-random bytes.
    fn scramble(n: usize) -> Vec<u8> {
        let mut state = 0x2545_f491u32;
        (0..n)
            .map(|_| {
                state = state.wrapping_mul(1103515245).wrapping_add(12345);
                (state >> 16) as u8
            })
            .collect()
    }

    async fn simple_array<'s>(
        store: &'s MemoryStore,
        chunk_shape: &[u64],
    ) -> Array<'s, MemoryStore, u16> {
        let meta = ArrayMetadataBuilder::<u16>::new(&[16, 16])
            .chunk_grid(chunk_shape)
            .unwrap()
            .build()
            .unwrap();
        Array::create(store, node_key("data"), meta, Default::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn roundtrip_single_chunk() {
        let store = MemoryStore::new();
        let array = simple_array(&store, &[16, 16]).await;

        let data = ArcArrayD::from_shape_vec(vec![16, 16], arange(256)).unwrap();
        array.set(&[], &data).await.unwrap();

        let read = array.get(&[]).await.unwrap();
        assert_eq!(read, data);

        // one chunk object under the default key encoding, plus metadata
        assert!(store.has_key(&node_key("data/c/0/0")).await.unwrap());
        assert!(store.has_key(&node_key("data/zarr.json")).await.unwrap());
    }

    #[tokio::test]
    async fn reopen_and_read() {
        let store = MemoryStore::new();
        let data = ArcArrayD::from_shape_vec(vec![16, 16], arange(256)).unwrap();
        {
            let array = simple_array(&store, &[4, 4]).await;
            array.set(&[], &data).await.unwrap();
        }
        let array: Array<_, u16> =
            Array::open(&store, node_key("data"), Default::default())
                .await
                .unwrap();
        assert_eq!(array.chunk_shape(), &[4, 4]);
        let read = array.get(&[]).await.unwrap();
        assert_eq!(read, data);
    }

    #[tokio::test]
    async fn open_missing_is_invalid_metadata() {
        let store = MemoryStore::new();
        let res: Result<Array<_, u16>, _> =
            Array::open(&store, node_key("nothing"), Default::default()).await;
        assert!(matches!(res, Err(Error::InvalidMetadata(_))));
    }

    #[tokio::test]
    async fn missing_chunks_read_as_fill() {
        let store = MemoryStore::new();
        let meta = ArrayMetadataBuilder::<f64>::new(&[8, 8])
            .chunk_grid(vec![4, 4].as_slice())
            .unwrap()
            .fill_value(2.5)
            .build()
            .unwrap();
        let array: Array<_, f64> = Array::create(&store, node_key("data"), meta, Default::default())
            .await
            .unwrap();

        let read = array.get(&[Slice::new(1, 7), Slice::new(0, 3)]).await.unwrap();
        assert_eq!(read.shape(), &[6, 3]);
        assert!(read.iter().all(|v| *v == 2.5));
    }

    #[tokio::test]
    async fn fill_value_chunks_are_elided() {
        let store = MemoryStore::new();
        let array = simple_array(&store, &[16, 16]).await;
        let chunk_key = node_key("data/c/0/0");

        let data = ArcArrayD::from_shape_vec(vec![16, 16], arange(256)).unwrap();
        array.set(&[], &data).await.unwrap();
        assert!(store.has_key(&chunk_key).await.unwrap());

        // overwriting with fill deletes the key
        array.set_scalar(&[], 0).await.unwrap();
        assert!(!store.has_key(&chunk_key).await.unwrap());

        let read = array.get(&[]).await.unwrap();
        assert!(read.iter().all(|v| *v == 0));
    }

    #[tokio::test]
    async fn partial_write_merges_with_existing() {
        let store = MemoryStore::new();
        let array = simple_array(&store, &[4, 4]).await;

        let base = ArcArrayD::from_shape_vec(vec![16, 16], arange(256)).unwrap();
        array.set(&[], &base).await.unwrap();

        // a write crossing chunk borders, not aligned to any of them
        let patch = ArcArrayD::from_elem(vec![5, 3], 999u16);
        array
            .set(&[Slice::new(2, 7), Slice::new(3, 6)], &patch)
            .await
            .unwrap();

        let read = array.get(&[]).await.unwrap();
        for i in 0..16 {
            for j in 0..16 {
                let expected = if (2..7).contains(&i) && (3..6).contains(&j) {
                    999
                } else {
                    base[[i, j]]
                };
                assert_eq!(read[[i, j]], expected, "at ({}, {})", i, j);
            }
        }
    }

    #[tokio::test]
    async fn partial_write_into_absent_chunks() {
        let store = MemoryStore::new();
        let array = simple_array(&store, &[4, 4]).await;

        let patch = ArcArrayD::from_elem(vec![2, 2], 7u16);
        array
            .set(&[Slice::new(3, 5), Slice::new(3, 5)], &patch)
            .await
            .unwrap();

        let read = array.get(&[]).await.unwrap();
        assert_eq!(read[[3, 3]], 7);
        assert_eq!(read[[4, 4]], 7);
        assert_eq!(read[[0, 0]], 0);
        assert_eq!(read[[5, 5]], 0);
    }

    #[tokio::test]
    async fn selection_errors() {
        let store = MemoryStore::new();
        let array = simple_array(&store, &[4, 4]).await;

        let res = array.get(&[Slice::new(0, 17)]).await;
        assert!(matches!(res, Err(Error::InvalidSelection(_))));

        let stepped = Slice {
            start: Some(0),
            stop: Some(8),
            step: Some(2),
        };
        let res = array.get(&[stepped]).await;
        assert!(matches!(res, Err(Error::InvalidSelection(_))));

        let wrong_shape = ArcArrayD::from_elem(vec![3, 3], 0u16);
        let res = array.set(&[Slice::new(0, 2), Slice::new(0, 2)], &wrong_shape).await;
        assert!(matches!(res, Err(Error::InvalidSelection(_))));
    }

    #[tokio::test]
    async fn order_f_reads_f_contiguous() {
        let store = MemoryStore::new();
        let meta = ArrayMetadataBuilder::<u16>::new(&[16, 16])
            .chunk_grid(vec![16, 16].as_slice())
            .unwrap()
            .push_aa_codec(TransposeCodec::new_f())
            .unwrap()
            .build()
            .unwrap();
        let array = Array::create(
            &store,
            node_key("data"),
            meta,
            RuntimeConfiguration::new(MemoryOrder::F),
        )
        .await
        .unwrap();

        let data = ArcArrayD::from_shape_vec(vec![16, 16], arange(256)).unwrap();
        array.set(&[], &data).await.unwrap();

        // bytes on disk are the F-order (column-major) layout
        let raw = store.get(&node_key("data/c/0/0")).await.unwrap().unwrap();
        assert_eq!(&raw[..6], &[0, 0, 16, 0, 32, 0]);

        let read = array.get(&[]).await.unwrap();
        assert_eq!(read, data);
        assert!(read.t().is_standard_layout());
        assert!(!read.is_standard_layout());
    }

    #[tokio::test]
    async fn order_c_reads_c_contiguous() {
        let store = MemoryStore::new();
        let meta = ArrayMetadataBuilder::<u16>::new(&[16, 16])
            .chunk_grid(vec![16, 16].as_slice())
            .unwrap()
            .push_aa_codec(TransposeCodec::new_c())
            .unwrap()
            .build()
            .unwrap();
        let array = Array::create(&store, node_key("data"), meta, Default::default())
            .await
            .unwrap();

        let data = ArcArrayD::from_shape_vec(vec![16, 16], arange(256)).unwrap();
        array.set(&[], &data).await.unwrap();
        let read = array.get(&[]).await.unwrap();
        assert_eq!(read, data);
        assert!(read.is_standard_layout());
    }

    #[cfg(feature = "gzip")]
    #[tokio::test]
    async fn roundtrip_compressed_pipeline() {
        use crate::codecs::bb::GzipCodec;

        let store = MemoryStore::new();
        let meta = ArrayMetadataBuilder::<i32>::new(&[10, 10])
            .chunk_grid(vec![4, 4].as_slice())
            .unwrap()
            .push_aa_codec(TransposeCodec::new_f())
            .unwrap()
            .ab_codec(EndianCodec::new_big())
            .unwrap()
            .push_bb_codec(GzipCodec::default())
            .build()
            .unwrap();
        let array = Array::create(&store, node_key("data"), meta, Default::default())
            .await
            .unwrap();

        let data =
            ArcArrayD::from_shape_vec(vec![10, 10], (0..100).map(|v| v * 3 - 50).collect())
                .unwrap();
        array.set(&[], &data).await.unwrap();

        let read = array.get(&[]).await.unwrap();
        assert_eq!(read, data);

        // partial read across chunk borders
        let part = array
            .get(&[Slice::new(2, 9), Slice::new(3, 10)])
            .await
            .unwrap();
        assert_eq!(
            part,
            data.slice(ArrayRegion::from_offset_shape(&[2, 3], &[7, 7]).slice_info())
                .to_shared()
        );
    }

    #[tokio::test]
    async fn roundtrip_ranks_and_dtypes() {
        let store = MemoryStore::new();

        // rank 1, bool
        let meta = ArrayMetadataBuilder::<bool>::new(&[10])
            .chunk_grid(vec![4].as_slice())
            .unwrap()
            .build()
            .unwrap();
        let array = Array::create(&store, node_key("bools"), meta, Default::default())
            .await
            .unwrap();
        let data = ArcArrayD::from_shape_vec(vec![10], (0..10).map(|v| v % 3 == 0).collect())
            .unwrap();
        array.set(&[], &data).await.unwrap();
        assert_eq!(array.get(&[]).await.unwrap(), data);

        // rank 3, i64, chunks not dividing the shape
        let meta = ArrayMetadataBuilder::<i64>::new(&[5, 6, 7])
            .chunk_grid(vec![2, 3, 4].as_slice())
            .unwrap()
            .fill_value(-1)
            .build()
            .unwrap();
        let array = Array::create(&store, node_key("cube"), meta, Default::default())
            .await
            .unwrap();
        let data = ArcArrayD::from_shape_vec(
            vec![5, 6, 7],
            (0..5 * 6 * 7).map(|v| v as i64 - 100).collect(),
        )
        .unwrap();
        array.set(&[], &data).await.unwrap();
        assert_eq!(array.get(&[]).await.unwrap(), data);

        // rank 4, u8
        let meta = ArrayMetadataBuilder::<u8>::new(&[4, 4, 4, 4])
            .chunk_grid(vec![2, 2, 2, 2].as_slice())
            .unwrap()
            .build()
            .unwrap();
        let array = Array::create(&store, node_key("hyper"), meta, Default::default())
            .await
            .unwrap();
        let data = ArcArrayD::from_shape_vec(vec![4, 4, 4, 4], scramble(256)).unwrap();
        array.set(&[], &data).await.unwrap();
        assert_eq!(array.get(&[]).await.unwrap(), data);
    }

    #[tokio::test]
    async fn scalar_array() {
        let store = MemoryStore::new();
        let meta = ArrayMetadataBuilder::<u16>::new(&[]).build().unwrap();
        let array: Array<_, u16> = Array::create(&store, node_key("scalar"), meta, Default::default())
            .await
            .unwrap();

        array.set_scalar(&[], 42).await.unwrap();
        assert!(store.has_key(&node_key("scalar/c")).await.unwrap());

        let read = array.get(&[]).await.unwrap();
        assert_eq!(read.ndim(), 0);
        assert_eq!(read.iter().copied().next(), Some(42));
    }

    #[tokio::test]
    async fn v2_chunk_keys() {
        let store = MemoryStore::new();
        let meta = ArrayMetadataBuilder::<u16>::new(&[8, 8])
            .chunk_grid(vec![4, 4].as_slice())
            .unwrap()
            .chunk_key_encoding(V2ChunkKeyEncoding::new(Separator::Dot))
            .build()
            .unwrap();
        let array = Array::create(&store, node_key("data"), meta, Default::default())
            .await
            .unwrap();

        let data = ArcArrayD::from_shape_vec(vec![8, 8], arange(64)).unwrap();
        array.set(&[], &data).await.unwrap();

        assert!(store.has_key(&node_key("data/0.0")).await.unwrap());
        assert!(store.has_key(&node_key("data/1.1")).await.unwrap());
        assert_eq!(array.get(&[]).await.unwrap(), data);
    }

    #[tokio::test]
    async fn erase_removes_everything() {
        let store = MemoryStore::new();
        let array = simple_array(&store, &[4, 4]).await;
        let data = ArcArrayD::from_shape_vec(vec![16, 16], arange(256)).unwrap();
        array.set(&[], &data).await.unwrap();

        let array: Array<_, u16> =
            Array::open(&store, node_key("data"), Default::default())
                .await
                .unwrap();
        array.erase().await.unwrap();
        assert!(store.list_prefix(&node_key("data")).await.unwrap().is_empty());
    }

    fn sharded_meta(inner_gzip: bool) -> ArrayMetadata {
        let mut codec = ShardingIndexedCodec::new(smallvec![4u64, 4])
            .push_aa_codec(TransposeCodec::new_f())
            .unwrap();
        #[cfg(feature = "gzip")]
        if inner_gzip {
            codec = codec.push_bb_codec(crate::codecs::bb::GzipCodec::default());
        }
        #[cfg(not(feature = "gzip"))]
        let _ = inner_gzip;

        ArrayMetadataBuilder::<u16>::new(&[16, 16])
            .chunk_grid(vec![8, 8].as_slice())
            .unwrap()
            .ab_codec(codec)
            .unwrap()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn sharded_roundtrip() {
        let store = MemoryStore::new();
        let array = Array::create(&store, node_key("data"), sharded_meta(true), Default::default())
            .await
            .unwrap();

        let data = ArcArrayD::from_shape_vec(
            vec![16, 16],
            scramble(256).into_iter().map(|v| v as u16 + 1).collect(),
        )
        .unwrap();
        array.set(&[], &data).await.unwrap();

        // four shard objects, no plain chunk keys
        assert!(store.has_key(&node_key("data/c/0/0")).await.unwrap());
        assert!(store.has_key(&node_key("data/c/1/1")).await.unwrap());

        assert_eq!(array.get(&[]).await.unwrap(), data);

        // ranged read within one shard
        let part = array
            .get(&[Slice::new(1, 7), Slice::new(2, 8)])
            .await
            .unwrap();
        assert_eq!(
            part,
            data.slice(ArrayRegion::from_offset_shape(&[1, 2], &[6, 6]).slice_info())
                .to_shared()
        );

        // ranged read across shards
        let part = array
            .get(&[Slice::new(6, 12), Slice::new(6, 12)])
            .await
            .unwrap();
        assert_eq!(
            part,
            data.slice(ArrayRegion::from_offset_shape(&[6, 6], &[6, 6]).slice_info())
                .to_shared()
        );
    }

    #[tokio::test]
    async fn sharded_zero_subchunks_are_sentinels() {
        use crate::codecs::ab::sharding_indexed::ShardIndex;

        let store = MemoryStore::new();
        let array = Array::create(&store, node_key("data"), sharded_meta(false), Default::default())
            .await
            .unwrap();

        // only the top-left sub-chunk of the top-left shard has data
        let mut data = ArcArrayD::from_elem(vec![16, 16], 0u16);
        data[[0, 0]] = 1;
        data[[3, 3]] = 2;
        array.set(&[], &data).await.unwrap();

        // all-fill shards are elided entirely
        assert!(store.has_key(&node_key("data/c/0/0")).await.unwrap());
        assert!(!store.has_key(&node_key("data/c/0/1")).await.unwrap());
        assert!(!store.has_key(&node_key("data/c/1/0")).await.unwrap());
        assert!(!store.has_key(&node_key("data/c/1/1")).await.unwrap());

        let shard = store.get(&node_key("data/c/0/0")).await.unwrap().unwrap();
        let index =
            ShardIndex::from_bytes(&shard[shard.len() - 64..], smallvec![2, 2]).unwrap();
        assert!(!index.get(&[0, 0]).is_empty());
        assert!(index.get(&[0, 1]).is_empty());
        assert!(index.get(&[1, 0]).is_empty());
        assert!(index.get(&[1, 1]).is_empty());

        assert_eq!(array.get(&[]).await.unwrap(), data);
    }

    #[tokio::test]
    async fn sharded_partial_write_preserves_neighbours() {
        use crate::codecs::ab::sharding_indexed::ShardIndex;

        let store = MemoryStore::new();
        let array = Array::create(&store, node_key("data"), sharded_meta(true), Default::default())
            .await
            .unwrap();

        let data = ArcArrayD::from_shape_vec(
            vec![16, 16],
            scramble(256).into_iter().map(|v| v as u16 + 1).collect(),
        )
        .unwrap();
        array.set(&[], &data).await.unwrap();

        let shard_key = node_key("data/c/0/0");
        let before = store.get(&shard_key).await.unwrap().unwrap();
        let index_before =
            ShardIndex::from_bytes(&before[before.len() - 64..], smallvec![2, 2]).unwrap();
        let neighbour_before = store.get(&node_key("data/c/1/1")).await.unwrap().unwrap();

        // overwrite one sub-chunk of one shard
        let patch = ArcArrayD::from_elem(vec![4, 4], 9999u16);
        array
            .set(&[Slice::new(4, 8), Slice::new(0, 4)], &patch)
            .await
            .unwrap();

        let after = store.get(&shard_key).await.unwrap().unwrap();
        let index_after =
            ShardIndex::from_bytes(&after[after.len() - 64..], smallvec![2, 2]).unwrap();
        for coord in [[0u64, 0], [0, 1], [1, 1]] {
            assert_eq!(index_before.get(&coord), index_after.get(&coord));
        }

        // other shards' bytes are untouched
        assert_eq!(
            store.get(&node_key("data/c/1/1")).await.unwrap().unwrap(),
            neighbour_before
        );

        let read = array.get(&[]).await.unwrap();
        for i in 0..16 {
            for j in 0..16 {
                let expected = if (4..8).contains(&i) && j < 4 {
                    9999
                } else {
                    data[[i, j]]
                };
                assert_eq!(read[[i, j]], expected, "at ({}, {})", i, j);
            }
        }
    }

    #[cfg(feature = "blosc")]
    #[tokio::test]
    async fn sharded_blosc_cube() {
        use crate::codecs::{ab::sharding_indexed::ShardIndex, bb::BloscCodec};

        let store = MemoryStore::new();
        let codec = ShardingIndexedCodec::new(smallvec![16u64, 16, 16])
            .push_aa_codec(TransposeCodec::new_f())
            .unwrap()
            .push_bb_codec(BloscCodec::default());
        let meta = ArrayMetadataBuilder::<u8>::new(&[64, 64, 64])
            .chunk_grid(vec![64, 64, 64].as_slice())
            .unwrap()
            .ab_codec(codec)
            .unwrap()
            .build()
            .unwrap();
        let array = Array::create(&store, node_key("cube"), meta, Default::default())
            .await
            .unwrap();

        // random-ish data with one all-zero sub-chunk at the origin
        let mut values = scramble(64 * 64 * 64);
        for x in 0..16 {
            for y in 0..16 {
                for z in 0..16 {
                    values[(x * 64 + y) * 64 + z] = 0;
                }
            }
        }
        let data = ArcArrayD::from_shape_vec(vec![64, 64, 64], values).unwrap();
        array.set(&[], &data).await.unwrap();

        assert_eq!(array.get(&[]).await.unwrap(), data);

        let shard = store.get(&node_key("cube/c/0/0/0")).await.unwrap().unwrap();
        let n = 4 * 4 * 4;
        let index =
            ShardIndex::from_bytes(&shard[shard.len() - 16 * n..], smallvec![4, 4, 4]).unwrap();
        assert!(index.get(&[0, 0, 0]).is_empty());
        assert!(!index.get(&[0, 0, 1]).is_empty());
    }
}
