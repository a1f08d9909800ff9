use std::sync::Arc;

use super::tensor::CpuTensor;
use crate::backend::builder::BuilderState;
use crate::backend::{ShapeConstraints, Tensor, TensorBuilder, TensorBuilderStats, TensorInfo};
use crate::error::ForgeResult;
use crate::graph::OperandIndex;

#[derive(Debug)]
pub struct CpuTensorBuilder {
    state: BuilderState<CpuTensor>,
}

impl CpuTensorBuilder {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            state: BuilderState::new(backend),
        }
    }
}

impl TensorBuilder for CpuTensorBuilder {
    fn backend(&self) -> &str {
        self.state.backend()
    }

    fn mark(&mut self, index: OperandIndex) -> ForgeResult<()> {
        self.state.mark(index)
    }

    fn prepare(&mut self, constraints: &ShapeConstraints) -> ForgeResult<()> {
        let backend = self.state.backend().to_string();
        self.state
            .prepare(constraints, |_, info| Ok(CpuTensor::new(backend.clone(), info.clone())))
    }

    fn allocate(&mut self) -> ForgeResult<()> {
        self.state.allocate(CpuTensor::allocate)
    }

    fn at(&self, index: OperandIndex) -> ForgeResult<Arc<dyn Tensor>> {
        self.state.at(index)
    }

    fn scratch(&mut self, info: TensorInfo) -> ForgeResult<Arc<dyn Tensor>> {
        let tensor = CpuTensor::new(self.state.backend(), info);
        Ok(self.state.scratch(tensor, CpuTensor::allocate)? as Arc<dyn Tensor>)
    }

    fn marked(&self) -> Vec<OperandIndex> {
        self.state.marked()
    }

    fn synchronize(&self) -> ForgeResult<()> {
        Ok(())
    }

    fn stats(&self) -> TensorBuilderStats {
        self.state.stats()
    }
}
