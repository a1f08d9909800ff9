//! nnforge - heterogeneous neural network inference runtime
//!
//! Takes a typed operation graph, assigns every operation to a compute
//! backend, inserts cross-backend copies, plans and allocates backend
//! tensors, and runs the resulting plan against caller buffers.
//!
//! Two backends ship with the crate: a host backend (`cpu`, NHWC) and a
//! simulated GPU backend (`gpu`, NCHW, asynchronous device queue).

#![allow(clippy::too_many_arguments)] // Kernel entry points take full geometry
#![allow(clippy::needless_range_loop)] // Index loops mirror the tensor math
#![allow(clippy::type_complexity)] // Factory closures are spelled out in full

pub mod backend;
pub mod codegen;
pub mod config;
pub mod error;
pub mod exec;
pub mod frontend;
pub mod graph;
pub mod kernel;
pub mod logging;

pub use backend::{Backend, BackendRegistry, Tensor, TensorBuilder};
pub use codegen::{compile, BackendPolicy, Plan};
pub use config::RuntimeConfig;
pub use error::{ErrorCategory, ForgeError, ForgeResult};
pub use exec::Execution;
pub use graph::{Model, OpKind, OperandIndex, Shape, TypeInfo};
pub use logging::{init_logging_default, init_logging_from_env};
