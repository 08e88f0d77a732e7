use ndarray::{ArcArray, IxDyn};
use smallvec::SmallVec;

pub mod array;
pub mod chunk_grid;
pub mod chunk_key_encoding;
pub mod codecs;
pub mod data_type;
mod error;
pub mod metadata;
pub mod store;
mod util;
pub mod value_handle;

pub use error::Error;

const COORD_SMALLVEC_SIZE: usize = 6;
pub const ZARR_FORMAT: usize = 3;

pub type CoordVec<T> = SmallVec<[T; COORD_SMALLVEC_SIZE]>;
pub type GridCoord = CoordVec<u64>;
pub type ArcArrayD<T> = ArcArray<T, IxDyn>;

pub(crate) fn to_usize(coord: &[u64]) -> CoordVec<usize> {
    coord.iter().map(|c| *c as usize).collect()
}

pub trait Ndim {
    fn ndim(&self) -> usize;

    fn same_ndim<T: Ndim>(&self, other: &T) -> Result<usize, &'static str> {
        let n = self.ndim();
        if n == other.ndim() {
            Ok(n)
        } else {
            Err("Inconsistent dimensionalities")
        }
    }
}

pub trait MaybeNdim {
    fn maybe_ndim(&self) -> Option<usize>;

    fn union_ndim<T: MaybeNdim>(&self, other: &T) -> Result<Option<usize>, &'static str> {
        if let Some(n1) = self.maybe_ndim() {
            if let Some(n2) = other.maybe_ndim() {
                if n1 == n2 {
                    Ok(Some(n1))
                } else {
                    Err("Inconsistent dimensionalities")
                }
            } else {
                Ok(Some(n1))
            }
        } else {
            Ok(other.maybe_ndim())
        }
    }

    fn validate_ndim(&self) -> Result<(), &'static str> {
        Ok(())
    }
}

impl<T: Ndim> MaybeNdim for T {
    fn maybe_ndim(&self) -> Option<usize> {
        Some(self.ndim())
    }
}
