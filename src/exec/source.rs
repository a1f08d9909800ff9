//! Caller input buffers.

use super::IoShape;
use crate::backend::Tensor;
use crate::error::{ExecutionError, ForgeResult};
use crate::graph::{DataType, Operand, OperandIndex};

/// Borrowed little-endian input bytes in logical (NHWC) order.
#[derive(Debug)]
pub struct Source<'a> {
    operand: OperandIndex,
    shape: IoShape,
    dtype: DataType,
    buffer: &'a [u8],
}

impl<'a> Source<'a> {
    pub fn new(index: OperandIndex, operand: &Operand, buffer: &'a [u8]) -> ForgeResult<Self> {
        let shape = IoShape::of(index, &operand.shape)?;
        let required = operand.byte_size();
        if buffer.len() < required {
            return Err(ExecutionError::BufferTooSmall {
                index,
                required,
                actual: buffer.len(),
            }
            .into());
        }
        Ok(Self {
            operand: index,
            shape,
            dtype: operand.dtype(),
            buffer,
        })
    }

    pub fn operand(&self) -> OperandIndex {
        self.operand
    }

    pub fn shape(&self) -> IoShape {
        self.shape
    }

    /// Decoded elements as raw `f32` values.
    pub fn values(&self) -> Vec<f32> {
        (0..self.shape.num_elements())
            .map(|i| self.dtype.decode(self.buffer, i))
            .collect()
    }

    pub fn push(&self, tensor: &dyn Tensor) -> ForgeResult<()> {
        tensor.write_logical(&self.values())
    }
}
