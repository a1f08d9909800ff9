use std::sync::Arc;

use super::device::GpuDevice;
use super::tensor::GpuTensor;
use crate::backend::builder::BuilderState;
use crate::backend::{ShapeConstraints, Tensor, TensorBuilder, TensorBuilderStats, TensorInfo};
use crate::error::ForgeResult;
use crate::graph::OperandIndex;

#[derive(Debug)]
pub struct GpuTensorBuilder {
    device: Arc<GpuDevice>,
    state: BuilderState<GpuTensor>,
}

impl GpuTensorBuilder {
    pub fn new(backend: impl Into<String>, device: Arc<GpuDevice>) -> Self {
        Self {
            device,
            state: BuilderState::new(backend),
        }
    }
}

impl TensorBuilder for GpuTensorBuilder {
    fn backend(&self) -> &str {
        self.state.backend()
    }

    fn mark(&mut self, index: OperandIndex) -> ForgeResult<()> {
        self.state.mark(index)
    }

    fn prepare(&mut self, constraints: &ShapeConstraints) -> ForgeResult<()> {
        let backend = self.state.backend().to_string();
        let device = Arc::clone(&self.device);
        self.state.prepare(constraints, |_, info| {
            Ok(GpuTensor::new(backend.clone(), Arc::clone(&device), info.clone()))
        })
    }

    fn allocate(&mut self) -> ForgeResult<()> {
        self.state.allocate(GpuTensor::allocate)
    }

    fn at(&self, index: OperandIndex) -> ForgeResult<Arc<dyn Tensor>> {
        self.state.at(index)
    }

    fn scratch(&mut self, info: TensorInfo) -> ForgeResult<Arc<dyn Tensor>> {
        let tensor = GpuTensor::new(self.state.backend(), Arc::clone(&self.device), info);
        Ok(self.state.scratch(tensor, GpuTensor::allocate)? as Arc<dyn Tensor>)
    }

    fn marked(&self) -> Vec<OperandIndex> {
        self.state.marked()
    }

    fn synchronize(&self) -> ForgeResult<()> {
        self.device.synchronize()
    }

    fn stats(&self) -> TensorBuilderStats {
        self.state.stats()
    }
}
