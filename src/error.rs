//! Unified error handling for nnforge
//!
//! Errors are grouped by the phase that raises them:
//! - Graph errors (malformed indices, cycles, rank or shape violations)
//! - Resolution errors (no backend can take an operation)
//! - Allocation errors (tensor builder preparation and allocation)
//! - Execution errors (per-run failures, device faults, caller buffers)
//!
//! Everything raised before a plan exists is fatal for that compilation.
//! Execution errors are reported per call and leave the plan usable.

use std::fmt;

use crate::graph::{IoIndex, OpKind, OperandIndex, OperationIndex};

pub use thiserror;

/// Malformed or inconsistent graph.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("operand {0} does not exist")]
    InvalidOperandIndex(OperandIndex),

    #[error("operation {0} does not exist")]
    InvalidOperationIndex(OperationIndex),

    #[error("io index {0} is out of range")]
    InvalidIoIndex(IoIndex),

    #[error("operand {0} is written by more than one operation")]
    MultipleWriters(OperandIndex),

    #[error("operation graph contains a cycle through operand {0}")]
    Cycle(OperandIndex),

    #[error("operand {index} has rank {actual}, expected {expected}")]
    UnsupportedRank {
        index: OperandIndex,
        expected: String,
        actual: usize,
    },

    #[error("{kind}: shape mismatch on operand {index}: {reason}")]
    ShapeMismatch {
        kind: OpKind,
        index: OperandIndex,
        reason: String,
    },

    #[error("{kind}: invalid parameter operand {index}: {reason}")]
    InvalidParam {
        kind: OpKind,
        index: OperandIndex,
        reason: String,
    },

    #[error("operand {0} is read but never written, not a constant and not a model input")]
    UndefinedOperand(OperandIndex),

    #[error("model output {0} is a model input that no operation reads")]
    DetachedOutput(OperandIndex),

    #[error("operand {index} expects {expected} bytes of constant data, got {actual}")]
    DataLength {
        index: OperandIndex,
        expected: usize,
        actual: usize,
    },

    #[error("operand {0} is not a constant")]
    NotAConstant(OperandIndex),

    #[error("operand {index} has type {actual}, expected {expected}")]
    TypeMismatch {
        index: OperandIndex,
        expected: String,
        actual: String,
    },

    #[error("{kind} expects {expected} inputs, got {actual}")]
    ArityMismatch {
        kind: OpKind,
        expected: String,
        actual: usize,
    },

    #[error("model is in phase {actual}, operation requires {expected}")]
    InvalidPhase { expected: String, actual: String },

    #[error("unknown operation code {0}")]
    UnknownOperationCode(i32),
}

/// No backend can take an operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("no backend claims operation kind {kind}")]
    UnresolvedOperation { kind: OpKind },

    #[error("unknown backend: {0}")]
    UnknownBackend(String),
}

/// Tensor builder preparation and allocation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    #[error("operand {0} was marked but has no shape constraint")]
    MissingShapeConstraint(OperandIndex),

    #[error("operand {index} constrained to {existing:?}, then to {requested:?}")]
    InconsistentShapeConstraint {
        index: OperandIndex,
        existing: Vec<usize>,
        requested: Vec<usize>,
    },

    #[error("backend {backend} has no tensor for operand {index}")]
    UnboundOperand { backend: String, index: OperandIndex },

    #[error("tensor builder for {0} is already prepared")]
    AlreadyPrepared(String),

    #[error("tensor builder for {0} is not prepared")]
    NotPrepared(String),

    #[error("tensor builder for {0} is already allocated")]
    AlreadyAllocated(String),

    #[error("tensor builder for {0} has not allocated its tensors yet")]
    NotAllocated(String),

    #[error("out of device memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },
}

/// Per-run failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    #[error("backend {backend} failed: {message}")]
    Backend { backend: String, message: String },

    #[error("io operand {index} has unsupported rank {rank}")]
    UnsupportedOperandRank { index: OperandIndex, rank: usize },

    #[error("buffer for operand {index} holds {actual} bytes, needs {required}")]
    BufferTooSmall {
        index: OperandIndex,
        required: usize,
        actual: usize,
    },

    #[error("io index {index} is out of range ({count} available)")]
    InvalidIoIndex { index: IoIndex, count: usize },

    #[error("input {0} is not bound")]
    UnboundInput(IoIndex),

    #[error("output {0} is not bound")]
    UnboundOutput(IoIndex),
}

/// Unified error type for nnforge
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("allocation error: {0}")]
    Allocation(#[from] AllocationError),

    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Lock poisoned (indicates a panic on another thread)
    #[error("internal lock poisoned: {0}")]
    LockPoisoned(String),

    /// Internal error (indicates a bug)
    #[error("internal error: {0}")]
    Internal(String),
}

impl ForgeError {
    /// Categorize the error by the phase that raised it.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ForgeError::Graph(_) => ErrorCategory::Graph,
            ForgeError::Resolution(_) => ErrorCategory::Resolution,
            ForgeError::Allocation(_) => ErrorCategory::Allocation,
            ForgeError::Execution(_) => ErrorCategory::Execution,
            ForgeError::Config(_) => ErrorCategory::Config,
            ForgeError::LockPoisoned(_) | ForgeError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Raised while compiling a model; the compilation produced no plan.
    pub fn is_compile_time(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Graph
                | ErrorCategory::Resolution
                | ErrorCategory::Allocation
                | ErrorCategory::Config
        )
    }

    /// The plan is still valid and the caller may run again.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Execution)
    }

    /// Check if this is an internal error (indicates a bug)
    pub fn is_internal_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Graph,
    Resolution,
    Allocation,
    Execution,
    Config,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Graph => write!(f, "Graph"),
            ErrorCategory::Resolution => write!(f, "Resolution"),
            ErrorCategory::Allocation => write!(f, "Allocation"),
            ErrorCategory::Execution => write!(f, "Execution"),
            ErrorCategory::Config => write!(f, "Config"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for ForgeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        ForgeError::LockPoisoned(err.to_string())
    }
}

/// Helper type alias for Results using ForgeError
pub type ForgeResult<T> = std::result::Result<T, ForgeError>;

/// Create an internal error with context
///
/// # Examples
/// ```ignore
/// return Err(internal_error!("stage list applied twice"));
/// ```
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::error::ForgeError::Internal($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::ForgeError::Internal(format!($fmt, $($arg)*))
    };
}

/// Create a backend execution error for `backend`.
pub fn backend_err(backend: &str, message: impl Into<String>) -> ForgeError {
    ExecutionError::Backend {
        backend: backend.to_string(),
        message: message.into(),
    }
    .into()
}
