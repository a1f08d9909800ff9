//! Caller output buffers.

use super::IoShape;
use crate::backend::Tensor;
use crate::error::{ExecutionError, ForgeResult};
use crate::graph::{DataType, Operand, OperandIndex};

/// Borrowed output bytes, filled in logical (NHWC) order after a run.
#[derive(Debug)]
pub struct Sink<'a> {
    operand: OperandIndex,
    shape: IoShape,
    dtype: DataType,
    buffer: &'a mut [u8],
}

impl<'a> Sink<'a> {
    pub fn new(index: OperandIndex, operand: &Operand, buffer: &'a mut [u8]) -> ForgeResult<Self> {
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

    pub fn pull(&mut self, tensor: &dyn Tensor) -> ForgeResult<()> {
        let values = tensor.read_logical()?;
        for (i, value) in values.iter().take(self.shape.num_elements()).enumerate() {
            self.dtype.encode(*value, self.buffer, i);
        }
        Ok(())
    }

    pub fn bytes(&self) -> &[u8] {
        &*self.buffer
    }
}
