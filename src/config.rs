//! Process-wide runtime configuration
//!
//! [`RuntimeConfig`] controls which backends the default registry builds
//! and how the simulated GPU device is sized. Backend overrides for
//! individual operations are handled by
//! [`BackendPolicy`](crate::codegen::resolver::BackendPolicy).

use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, ForgeResult};

/// Backend used when no override applies
pub const DEFAULT_BACKEND: &str = "gpu";

const DEFAULT_BACKEND_ENV: &str = "NNFORGE_DEFAULT_BACKEND";
const GPU_MEMORY_LIMIT_ENV: &str = "NNFORGE_GPU_MEMORY_LIMIT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Backend id the resolver falls back to
    pub default_backend: String,

    /// Device memory budget of the GPU backend in bytes; `None` is unbounded
    pub gpu_memory_limit: Option<usize>,

    /// Register the CPU backend
    pub enable_cpu: bool,

    /// Register the GPU backend
    pub enable_gpu: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            default_backend: DEFAULT_BACKEND.to_string(),
            gpu_memory_limit: None,
            enable_cpu: true,
            enable_gpu: true,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `NNFORGE_DEFAULT_BACKEND` and
    /// `NNFORGE_GPU_MEMORY_LIMIT`.
    pub fn from_env() -> ForgeResult<Self> {
        let mut config = Self::default();
        if let Ok(backend) = std::env::var(DEFAULT_BACKEND_ENV) {
            if !backend.trim().is_empty() {
                config.default_backend = backend.trim().to_string();
            }
        }
        if let Ok(limit) = std::env::var(GPU_MEMORY_LIMIT_ENV) {
            let bytes = limit.trim().parse::<usize>().map_err(|e| {
                ForgeError::Config(format!("{}={:?}: {}", GPU_MEMORY_LIMIT_ENV, limit, e))
            })?;
            config.gpu_memory_limit = Some(bytes);
        }
        Ok(config)
    }

    pub fn with_default_backend(mut self, backend: impl Into<String>) -> Self {
        self.default_backend = backend.into();
        self
    }

    pub fn with_gpu_memory_limit(mut self, bytes: usize) -> Self {
        self.gpu_memory_limit = Some(bytes);
        self
    }

    pub fn with_cpu(mut self, enabled: bool) -> Self {
        self.enable_cpu = enabled;
        self
    }

    pub fn with_gpu(mut self, enabled: bool) -> Self {
        self.enable_gpu = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_runtime_config_default() {
        let config = RuntimeConfig::default();
        assert_eq!(config.default_backend, "gpu");
        assert_eq!(config.gpu_memory_limit, None);
        assert!(config.enable_cpu && config.enable_gpu);
    }

    #[test]
    fn test_runtime_config_builder() {
        let config = RuntimeConfig::new()
            .with_default_backend("cpu")
            .with_gpu_memory_limit(1 << 20)
            .with_gpu(false);
        assert_eq!(config.default_backend, "cpu");
        assert_eq!(config.gpu_memory_limit, Some(1 << 20));
        assert!(!config.enable_gpu);
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_limit() {
        std::env::set_var(GPU_MEMORY_LIMIT_ENV, "lots");
        let result = RuntimeConfig::from_env();
        std::env::remove_var(GPU_MEMORY_LIMIT_ENV);
        assert!(matches!(result, Err(ForgeError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_from_env_reads_overrides() {
        std::env::set_var(DEFAULT_BACKEND_ENV, "cpu");
        std::env::set_var(GPU_MEMORY_LIMIT_ENV, "4096");
        let config = RuntimeConfig::from_env().unwrap();
        std::env::remove_var(DEFAULT_BACKEND_ENV);
        std::env::remove_var(GPU_MEMORY_LIMIT_ENV);
        assert_eq!(config.default_backend, "cpu");
        assert_eq!(config.gpu_memory_limit, Some(4096));
    }
}
