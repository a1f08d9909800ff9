//! NNAPI-shaped entry points with integer result codes.
//!
//! These wrap the typed core API for callers that speak NNAPI operation
//! codes and status integers. Failures are logged with their full error
//! and reported as a [`ResultCode`].

mod compilation;
mod execution;
mod model;

pub use compilation::Compilation;
pub use execution::{execution_create, execution_free, execution_run, execution_set_input, execution_set_output};
pub use model::{ModelBuilder, OperandType};

use std::fmt;

use crate::error::{AllocationError, ExecutionError, ForgeError, GraphError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ResultCode {
    NoError = 0,
    OutOfMemory = 1,
    Incomplete = 2,
    UnexpectedNull = 3,
    BadData = 4,
    OpFailed = 5,
    BadState = 6,
}

impl ResultCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        self == ResultCode::NoError
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResultCode::NoError => "ANEURALNETWORKS_NO_ERROR",
            ResultCode::OutOfMemory => "ANEURALNETWORKS_OUT_OF_MEMORY",
            ResultCode::Incomplete => "ANEURALNETWORKS_INCOMPLETE",
            ResultCode::UnexpectedNull => "ANEURALNETWORKS_UNEXPECTED_NULL",
            ResultCode::BadData => "ANEURALNETWORKS_BAD_DATA",
            ResultCode::OpFailed => "ANEURALNETWORKS_OP_FAILED",
            ResultCode::BadState => "ANEURALNETWORKS_BAD_STATE",
        };
        f.write_str(name)
    }
}

impl From<&ForgeError> for ResultCode {
    fn from(err: &ForgeError) -> Self {
        match err {
            ForgeError::Graph(GraphError::InvalidPhase { .. }) => ResultCode::BadState,
            ForgeError::Graph(_) | ForgeError::Resolution(_) | ForgeError::Config(_) => ResultCode::BadData,
            ForgeError::Allocation(AllocationError::OutOfMemory { .. }) => ResultCode::OutOfMemory,
            ForgeError::Allocation(_) => ResultCode::BadData,
            ForgeError::Execution(ExecutionError::Backend { .. }) => ResultCode::OpFailed,
            ForgeError::Execution(ExecutionError::UnboundInput(_) | ExecutionError::UnboundOutput(_)) => {
                ResultCode::BadState
            }
            ForgeError::Execution(_) => ResultCode::BadData,
            ForgeError::LockPoisoned(_) | ForgeError::Internal(_) => ResultCode::OpFailed,
        }
    }
}

impl<T> From<&crate::error::ForgeResult<T>> for ResultCode {
    fn from(result: &crate::error::ForgeResult<T>) -> Self {
        match result {
            Ok(_) => ResultCode::NoError,
            Err(err) => err.into(),
        }
    }
}

/// Log a failed call and convert it to a result code.
pub(crate) fn report<T>(call: &str, result: crate::error::ForgeResult<T>) -> ResultCode {
    if let Err(err) = &result {
        tracing::warn!(call, error = %err, category = %err.category(), "call failed");
    }
    ResultCode::from(&result)
}

/// NNAPI operation codes understood by [`ModelBuilder::add_operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum OperationCode {
    Add = 0,
    AveragePool2D = 1,
    Concatenation = 2,
    Conv2D = 3,
    FullyConnected = 9,
    MaxPool2D = 17,
    Reshape = 22,
    Softmax = 25,
    CastEx = 50000,
}

impl OperationCode {
    pub fn from_code(code: i32) -> Option<Self> {
        let op = match code {
            0 => OperationCode::Add,
            1 => OperationCode::AveragePool2D,
            2 => OperationCode::Concatenation,
            3 => OperationCode::Conv2D,
            9 => OperationCode::FullyConnected,
            17 => OperationCode::MaxPool2D,
            22 => OperationCode::Reshape,
            25 => OperationCode::Softmax,
            50000 => OperationCode::CastEx,
            _ => return None,
        };
        Some(op)
    }
}
