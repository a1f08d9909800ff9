//! Backend annotations attached to operations and operands during lowering.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Memory ordering of a rank 4 tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layout {
    /// Batch, height, width, channel. The model's logical order.
    Nhwc,
    /// Batch, channel, height, width.
    Nchw,
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Nhwc => f.write_str("NHWC"),
            Layout::Nchw => f.write_str("NCHW"),
        }
    }
}

/// The backend chosen for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LowerInfo {
    backend: String,
    layout: Layout,
}

impl LowerInfo {
    pub fn new(backend: impl Into<String>, layout: Layout) -> Self {
        Self {
            backend: backend.into(),
            layout,
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Preferred layout of the chosen backend.
    pub fn layout(&self) -> Layout {
        self.layout
    }
}

/// A backend touching an operand, with the layout it stores it in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendUse {
    pub backend: String,
    pub layout: Layout,
}

/// Per-operand summary of which backends write and read it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OperandLowerInfo {
    shape: [usize; 4],
    def_backends: Vec<BackendUse>,
    use_backends: Vec<BackendUse>,
}

impl OperandLowerInfo {
    pub fn new(shape: [usize; 4]) -> Self {
        Self {
            shape,
            def_backends: Vec::new(),
            use_backends: Vec::new(),
        }
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn def_backends(&self) -> &[BackendUse] {
        &self.def_backends
    }

    pub fn use_backends(&self) -> &[BackendUse] {
        &self.use_backends
    }

    pub fn add_def_backend(&mut self, info: &LowerInfo) {
        push_unique(&mut self.def_backends, info);
    }

    pub fn add_use_backend(&mut self, info: &LowerInfo) {
        push_unique(&mut self.use_backends, info);
    }

    /// Every distinct backend that needs a tensor for this operand.
    pub fn backends(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for b in self.def_backends.iter().chain(self.use_backends.iter()) {
            if !out.contains(&b.backend.as_str()) {
                out.push(&b.backend);
            }
        }
        out
    }
}

fn push_unique(list: &mut Vec<BackendUse>, info: &LowerInfo) {
    if !list.iter().any(|b| b.backend == info.backend()) {
        list.push(BackendUse {
            backend: info.backend().to_string(),
            layout: info.layout(),
        });
    }
}
