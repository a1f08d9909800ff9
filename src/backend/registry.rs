//! Explicit backend registry.
//!
//! Built once at process start and passed by reference to every compilation.
//! There is no global instance.

use std::sync::Arc;

use super::cpu::CpuBackend;
use super::gpu::GpuBackend;
use super::{Backend, BackendConfig, InitializerGenFactory, StageGenFactory};
use crate::config::RuntimeConfig;
use crate::error::{ForgeResult, ResolutionError};

#[derive(Debug, Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<Backend>>,
}

impl BackendRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the GPU and CPU backends enabled in `config`.
    pub fn with_default_backends(config: &RuntimeConfig) -> ForgeResult<Self> {
        let mut registry = Self::new();
        if config.enable_gpu {
            registry.add(GpuBackend::create(config)?);
        }
        if config.enable_cpu {
            registry.add(CpuBackend::create());
        }
        Ok(registry)
    }

    /// Register a backend under `id`. An existing entry with the same id is
    /// replaced.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        config: Arc<dyn BackendConfig>,
        initializer_gen_factory: InitializerGenFactory,
        stage_gen_factory: StageGenFactory,
    ) {
        self.add(Backend::new(id, config, initializer_gen_factory, stage_gen_factory));
    }

    /// Add a constructed backend, replacing any entry with the same id.
    pub fn add(&mut self, backend: Backend) {
        let backend = Arc::new(backend);
        match self.backends.iter_mut().find(|b| b.id() == backend.id()) {
            Some(existing) => {
                tracing::warn!(backend = backend.id(), "replacing registered backend");
                *existing = backend;
            }
            None => {
                tracing::debug!(backend = backend.id(), "registered backend");
                self.backends.push(backend);
            }
        }
    }

    pub fn lookup(&self, id: &str) -> ForgeResult<Arc<Backend>> {
        self.backends
            .iter()
            .find(|b| b.id() == id)
            .cloned()
            .ok_or_else(|| ResolutionError::UnknownBackend(id.to_string()).into())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.backends.iter().any(|b| b.id() == id)
    }

    /// Registered ids, in registration order.
    pub fn ids(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
