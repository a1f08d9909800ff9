//! Execution sessions over a compiled plan.

mod session;
mod sink;
mod source;

pub use session::{Execution, SessionState};
pub use sink::Sink;
pub use source::Source;

use crate::error::{ExecutionError, ForgeResult};
use crate::graph::{FeatureShape, OperandIndex, Shape};

/// How a caller buffer is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoShape {
    /// Rank 2 operand with a single row.
    Vector(usize),
    /// Rank 4 NHWC feature map.
    Feature(FeatureShape),
}

impl IoShape {
    pub fn of(index: OperandIndex, shape: &Shape) -> ForgeResult<Self> {
        match shape.dims() {
            &[1, len] => Ok(IoShape::Vector(len)),
            &[_, _, _, _] => shape
                .as_feature()
                .map(IoShape::Feature)
                .ok_or_else(|| unsupported(index, shape)),
            _ => Err(unsupported(index, shape)),
        }
    }

    pub fn num_elements(&self) -> usize {
        match self {
            IoShape::Vector(len) => *len,
            IoShape::Feature(f) => f.n * f.h * f.w * f.c,
        }
    }
}

fn unsupported(index: OperandIndex, shape: &Shape) -> crate::error::ForgeError {
    ExecutionError::UnsupportedOperandRank {
        index,
        rank: shape.rank(),
    }
    .into()
}
