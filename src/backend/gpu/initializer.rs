//! Weight initializers for channel-first convolution.

use crate::backend::{Initializer, InitializerGenerator, Tensor};
use crate::error::{ForgeResult, GraphError};
use crate::graph::{ConstData, Conv2DParam, KernelShape, Layout, Node, OperandSet};

/// Writes an OHWI convolution kernel in the storage order of the target
/// tensor: reordered to OIHW for channel-first tensors, as given otherwise.
#[derive(Debug, Clone)]
pub struct KernelInitializer {
    pub data: ConstData,
    pub shape: KernelShape,
}

impl KernelInitializer {
    fn oihw(&self, ohwi: &[f32]) -> Vec<f32> {
        let KernelShape { n, h, w, c } = self.shape;
        let mut out = vec![0.0; ohwi.len()];
        for o in 0..n {
            for y in 0..h {
                for x in 0..w {
                    for i in 0..c {
                        out[((o * c + i) * h + y) * w + x] = ohwi[((o * h + y) * w + x) * c + i];
                    }
                }
            }
        }
        out
    }
}

impl Initializer for KernelInitializer {
    fn initialize(&self, tensor: &dyn Tensor) -> ForgeResult<()> {
        let ohwi = self.data.words(tensor.info().type_info.dtype);
        match tensor.layout() {
            Layout::Nchw => tensor.write(&self.oihw(&ohwi)),
            Layout::Nhwc => tensor.write(&ohwi),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GpuInitializerGenerator;

impl InitializerGenerator for GpuInitializerGenerator {
    fn conv2d_kernel(&self, node: &Node<Conv2DParam>, operands: &OperandSet) -> ForgeResult<Box<dyn Initializer>> {
        let index = node.input(Conv2DParam::KERNEL);
        let shape = operands.kernel(index)?;
        let data = operands.at(index)?.data().cloned().ok_or(GraphError::NotAConstant(index))?;
        Ok(Box::new(KernelInitializer { data, shape }))
    }
}
