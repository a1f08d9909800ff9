//! Simulated GPU backend.
//!
//! Tensors are device buffers in channel-first order and kernels execute
//! asynchronously on the device queue. Host code observes results only
//! after a synchronize, which reading a tensor performs implicitly.

pub mod device;
mod initializer;
mod stage;
mod tensor;
mod tensor_builder;

use std::sync::Arc;

pub use device::{DeviceBuffer, DeviceStats, GpuDevice};
pub use initializer::{GpuInitializerGenerator, KernelInitializer};
pub use stage::{Flatten, GpuStage, GpuStageGenerator};
pub use tensor::GpuTensor;
pub use tensor_builder::GpuTensorBuilder;

use super::{
    Backend, BackendConfig, InitializerGenFactory, InitializerGenerator, StageGenFactory, StageGenerator,
    TensorBuilder,
};
use crate::config::RuntimeConfig;
use crate::error::ForgeResult;
use crate::graph::{Layout, OpKind};

pub const GPU_BACKEND: &str = "gpu";

#[derive(Debug)]
pub struct GpuConfig {
    device: Arc<GpuDevice>,
}

impl GpuConfig {
    pub fn new(device: Arc<GpuDevice>) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &Arc<GpuDevice> {
        &self.device
    }

    pub fn memory_limit_bytes(&self) -> Option<usize> {
        self.device.memory_limit()
    }
}

impl BackendConfig for GpuConfig {
    /// Drain the queue once so a dead worker is reported before planning.
    fn initialize(&self) -> ForgeResult<()> {
        self.device.synchronize()?;
        tracing::info!(memory_limit = ?self.memory_limit_bytes(), "gpu device initialized");
        Ok(())
    }

    fn layout(&self) -> Layout {
        Layout::Nchw
    }

    fn supports(&self, _kind: OpKind) -> bool {
        true
    }
}

pub fn initializer_gen_factory() -> InitializerGenFactory {
    Arc::new(|| Box::new(GpuInitializerGenerator) as Box<dyn InitializerGenerator>)
}

pub fn stage_gen_factory(backend: &str, device: Arc<GpuDevice>) -> StageGenFactory {
    let backend = backend.to_string();
    Arc::new(move || {
        Ok((
            Box::new(GpuStageGenerator::new(backend.clone())) as Box<dyn StageGenerator>,
            Box::new(GpuTensorBuilder::new(backend.clone(), Arc::clone(&device))) as Box<dyn TensorBuilder>,
        ))
    })
}

pub struct GpuBackend;

impl GpuBackend {
    /// GPU backend on a fresh device sized by `config`.
    pub fn create(config: &RuntimeConfig) -> ForgeResult<Backend> {
        let device = Arc::new(GpuDevice::new(config.gpu_memory_limit)?);
        Ok(Self::with_device(device))
    }

    /// GPU backend on an existing device, e.g. one a test injects faults into.
    pub fn with_device(device: Arc<GpuDevice>) -> Backend {
        Backend::new(
            GPU_BACKEND,
            Arc::new(GpuConfig::new(Arc::clone(&device))),
            initializer_gen_factory(),
            stage_gen_factory(GPU_BACKEND, device),
        )
    }
}
