//! Reference numeric kernels shared by the CPU and simulated GPU backends.
//!
//! Kernels work on `f32` slices and take the storage [`Layout`] of their
//! rank 4 operands, so each backend can run them directly on its native
//! buffers. They are correctness references, not tuned implementations.

pub mod concat;
pub mod conv;
pub mod elementwise;
pub mod fully_connected;
pub mod layout;
pub mod op;
pub mod pool;
pub mod softmax;

pub use concat::concat;
pub use conv::{conv2d, Conv2DGeometry};
pub use elementwise::{activation_inplace, add, cast};
pub use fully_connected::fully_connected;
pub use layout::{convert, storage_axis, storage_dims, FeatureIndexer};
pub use op::KernelOp;
pub use pool::{avg_pool2d, max_pool2d, Pool2DGeometry};
pub use softmax::softmax;

pub use crate::graph::Layout;

/// Explicit spatial padding in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Padding {
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
}

/// Input coordinate for output position `out` and kernel tap `k`, if it
/// falls inside the unpadded input.
#[inline]
pub(crate) fn input_coord(out: usize, stride: usize, k: usize, pad: usize, extent: usize) -> Option<usize> {
    let pos = (out * stride + k) as isize - pad as isize;
    if pos < 0 || pos as usize >= extent {
        None
    } else {
        Some(pos as usize)
    }
}
