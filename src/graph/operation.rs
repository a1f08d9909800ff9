//! Operation nodes.
//!
//! Every node keeps its data operands in `inputs`/`outputs` and its
//! attributes (stride, padding code, activation, axis, ...) as operand
//! indices of scalar constants in a per-kind param struct.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::OperandIndex;
use crate::error::{ForgeResult, GraphError};

/// Fieldless tag of an [`Operation`], named after the NNAPI operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OpKind {
    Conv2D,
    MaxPool2D,
    AvgPool2D,
    Concat,
    FullyConnected,
    Reshape,
    Softmax,
    Add,
    Cast,
    Nop,
    Permute,
}

impl OpKind {
    pub const ALL: [OpKind; 11] = [
        OpKind::Conv2D,
        OpKind::MaxPool2D,
        OpKind::AvgPool2D,
        OpKind::Concat,
        OpKind::FullyConnected,
        OpKind::Reshape,
        OpKind::Softmax,
        OpKind::Add,
        OpKind::Cast,
        OpKind::Nop,
        OpKind::Permute,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Conv2D => "CONV_2D",
            OpKind::MaxPool2D => "MAX_POOL_2D",
            OpKind::AvgPool2D => "AVERAGE_POOL_2D",
            OpKind::Concat => "CONCATENATION",
            OpKind::FullyConnected => "FULLY_CONNECTED",
            OpKind::Reshape => "RESHAPE",
            OpKind::Softmax => "SOFTMAX",
            OpKind::Add => "ADD",
            OpKind::Cast => "CAST_EX",
            OpKind::Nop => "NOP",
            OpKind::Permute => "PERMUTE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        OpKind::ALL.iter().copied().find(|k| k.name() == name)
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// NNAPI fused activation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Activation {
    None,
    Relu,
    Relu1,
    Relu6,
}

impl Activation {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Activation::None),
            1 => Some(Activation::Relu),
            2 => Some(Activation::Relu1),
            3 => Some(Activation::Relu6),
            _ => None,
        }
    }

    pub fn apply(&self, x: f32) -> f32 {
        match self {
            Activation::None => x,
            Activation::Relu => x.max(0.0),
            Activation::Relu1 => x.clamp(-1.0, 1.0),
            Activation::Relu6 => x.clamp(0.0, 6.0),
        }
    }
}

/// NNAPI implicit padding code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaddingType {
    Same,
    Valid,
}

impl PaddingType {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(PaddingType::Same),
            2 => Some(PaddingType::Valid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conv2DParam {
    pub padding: OperandIndex,
    pub hstride: OperandIndex,
    pub vstride: OperandIndex,
    pub activation: OperandIndex,
}

impl Conv2DParam {
    pub const INPUT: usize = 0;
    pub const KERNEL: usize = 1;
    pub const BIAS: usize = 2;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool2DParam {
    pub padding: OperandIndex,
    pub hstride: OperandIndex,
    pub vstride: OperandIndex,
    pub kw: OperandIndex,
    pub kh: OperandIndex,
    pub activation: OperandIndex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcatParam {
    pub axis: OperandIndex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullyConnectedParam {
    pub activation: OperandIndex,
}

impl FullyConnectedParam {
    pub const INPUT: usize = 0;
    pub const WEIGHT: usize = 1;
    pub const BIAS: usize = 2;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReshapeParam {
    /// Optional 1-D INT32 target shape.
    pub shape: Option<OperandIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftmaxParam {
    pub beta: OperandIndex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddParam {
    pub activation: OperandIndex,
}

impl AddParam {
    pub const LHS: usize = 0;
    pub const RHS: usize = 1;
}

/// Inserted by lowering on an edge between two backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermuteParam {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node<P> {
    pub inputs: Vec<OperandIndex>,
    pub outputs: Vec<OperandIndex>,
    pub param: P,
}

impl<P> Node<P> {
    pub fn new(inputs: Vec<OperandIndex>, outputs: Vec<OperandIndex>, param: P) -> Self {
        Self {
            inputs,
            outputs,
            param,
        }
    }

    pub fn input(&self, role: usize) -> OperandIndex {
        self.inputs[role]
    }

    pub fn output(&self) -> OperandIndex {
        self.outputs[0]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Conv2D(Node<Conv2DParam>),
    MaxPool2D(Node<Pool2DParam>),
    AvgPool2D(Node<Pool2DParam>),
    Concat(Node<ConcatParam>),
    FullyConnected(Node<FullyConnectedParam>),
    Reshape(Node<ReshapeParam>),
    Softmax(Node<SoftmaxParam>),
    Add(Node<AddParam>),
    Cast(Node<()>),
    Nop(Node<()>),
    Permute(Node<PermuteParam>),
}

impl Operation {
    pub fn kind(&self) -> OpKind {
        match self {
            Operation::Conv2D(_) => OpKind::Conv2D,
            Operation::MaxPool2D(_) => OpKind::MaxPool2D,
            Operation::AvgPool2D(_) => OpKind::AvgPool2D,
            Operation::Concat(_) => OpKind::Concat,
            Operation::FullyConnected(_) => OpKind::FullyConnected,
            Operation::Reshape(_) => OpKind::Reshape,
            Operation::Softmax(_) => OpKind::Softmax,
            Operation::Add(_) => OpKind::Add,
            Operation::Cast(_) => OpKind::Cast,
            Operation::Nop(_) => OpKind::Nop,
            Operation::Permute(_) => OpKind::Permute,
        }
    }

    pub fn inputs(&self) -> &[OperandIndex] {
        match self {
            Operation::Conv2D(n) => &n.inputs,
            Operation::MaxPool2D(n) | Operation::AvgPool2D(n) => &n.inputs,
            Operation::Concat(n) => &n.inputs,
            Operation::FullyConnected(n) => &n.inputs,
            Operation::Reshape(n) => &n.inputs,
            Operation::Softmax(n) => &n.inputs,
            Operation::Add(n) => &n.inputs,
            Operation::Cast(n) | Operation::Nop(n) => &n.inputs,
            Operation::Permute(n) => &n.inputs,
        }
    }

    pub fn outputs(&self) -> &[OperandIndex] {
        match self {
            Operation::Conv2D(n) => &n.outputs,
            Operation::MaxPool2D(n) | Operation::AvgPool2D(n) => &n.outputs,
            Operation::Concat(n) => &n.outputs,
            Operation::FullyConnected(n) => &n.outputs,
            Operation::Reshape(n) => &n.outputs,
            Operation::Softmax(n) => &n.outputs,
            Operation::Add(n) => &n.outputs,
            Operation::Cast(n) | Operation::Nop(n) => &n.outputs,
            Operation::Permute(n) => &n.outputs,
        }
    }

    fn inputs_mut(&mut self) -> &mut Vec<OperandIndex> {
        match self {
            Operation::Conv2D(n) => &mut n.inputs,
            Operation::MaxPool2D(n) | Operation::AvgPool2D(n) => &mut n.inputs,
            Operation::Concat(n) => &mut n.inputs,
            Operation::FullyConnected(n) => &mut n.inputs,
            Operation::Reshape(n) => &mut n.inputs,
            Operation::Softmax(n) => &mut n.inputs,
            Operation::Add(n) => &mut n.inputs,
            Operation::Cast(n) | Operation::Nop(n) => &mut n.inputs,
            Operation::Permute(n) => &mut n.inputs,
        }
    }

    /// Scalar attribute operands referenced by this node.
    pub fn param_operands(&self) -> Vec<OperandIndex> {
        match self {
            Operation::Conv2D(n) => {
                let p = &n.param;
                vec![p.padding, p.hstride, p.vstride, p.activation]
            }
            Operation::MaxPool2D(n) | Operation::AvgPool2D(n) => {
                let p = &n.param;
                vec![p.padding, p.hstride, p.vstride, p.kw, p.kh, p.activation]
            }
            Operation::Concat(n) => vec![n.param.axis],
            Operation::FullyConnected(n) => vec![n.param.activation],
            Operation::Reshape(n) => n.param.shape.into_iter().collect(),
            Operation::Softmax(n) => vec![n.param.beta],
            Operation::Add(n) => vec![n.param.activation],
            Operation::Cast(_) | Operation::Nop(_) | Operation::Permute(_) => Vec::new(),
        }
    }

    /// Replace every occurrence of `from` among the data inputs with `to`.
    pub fn replace_input(&mut self, from: OperandIndex, to: OperandIndex) {
        for input in self.inputs_mut().iter_mut() {
            if *input == from {
                *input = to;
            }
        }
    }

    /// Check input and output counts for this kind.
    pub fn check_arity(&self) -> ForgeResult<()> {
        let kind = self.kind();
        let (expected, ok) = match self {
            Operation::Conv2D(_) | Operation::FullyConnected(_) => ("3", self.inputs().len() == 3),
            Operation::Add(_) => ("2", self.inputs().len() == 2),
            Operation::Concat(_) => ("at least 1", !self.inputs().is_empty()),
            Operation::MaxPool2D(_)
            | Operation::AvgPool2D(_)
            | Operation::Reshape(_)
            | Operation::Softmax(_)
            | Operation::Cast(_)
            | Operation::Nop(_)
            | Operation::Permute(_) => ("1", self.inputs().len() == 1),
        };
        if !ok {
            return Err(GraphError::ArityMismatch {
                kind,
                expected: expected.to_string(),
                actual: self.inputs().len(),
            }
            .into());
        }
        if self.outputs().len() != 1 {
            return Err(GraphError::ArityMismatch {
                kind,
                expected: "1 output".to_string(),
                actual: self.outputs().len(),
            }
            .into());
        }
        Ok(())
    }
}
