//! Host backend.
//!
//! Tensors live in host memory in logical NHWC order and every kernel runs
//! synchronously on the calling thread.

mod stage;
mod tensor;
mod tensor_builder;

use std::sync::Arc;

pub use stage::{CpuStage, CpuStageGenerator};
pub use tensor::CpuTensor;
pub use tensor_builder::CpuTensorBuilder;

use super::{
    Backend, BackendConfig, InitializerGenFactory, InitializerGenerator, StageGenFactory, StageGenerator,
    TensorBuilder,
};
use crate::error::ForgeResult;
use crate::graph::{Layout, OpKind};

pub const CPU_BACKEND: &str = "cpu";

#[derive(Debug, Clone, Default)]
pub struct CpuConfig;

impl BackendConfig for CpuConfig {
    fn initialize(&self) -> ForgeResult<()> {
        tracing::debug!(threads = 1, "cpu backend ready");
        Ok(())
    }

    fn layout(&self) -> Layout {
        Layout::Nhwc
    }

    fn supports(&self, _kind: OpKind) -> bool {
        true
    }
}

/// Constants are copied as-is; host weights keep their logical order.
#[derive(Debug, Clone, Default)]
pub struct CpuInitializerGenerator;

impl InitializerGenerator for CpuInitializerGenerator {}

pub fn initializer_gen_factory() -> InitializerGenFactory {
    Arc::new(|| Box::new(CpuInitializerGenerator) as Box<dyn InitializerGenerator>)
}

/// Stage generators and tensor builders registered under `backend`.
pub fn stage_gen_factory(backend: &str) -> StageGenFactory {
    let backend = backend.to_string();
    Arc::new(move || {
        Ok((
            Box::new(CpuStageGenerator::new(backend.clone())) as Box<dyn StageGenerator>,
            Box::new(CpuTensorBuilder::new(backend.clone())) as Box<dyn TensorBuilder>,
        ))
    })
}

pub struct CpuBackend;

impl CpuBackend {
    pub fn create() -> Backend {
        Backend::new(
            CPU_BACKEND,
            Arc::new(CpuConfig),
            initializer_gen_factory(),
            stage_gen_factory(CPU_BACKEND),
        )
    }
}
