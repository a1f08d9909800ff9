//! CPU stages. Activations are fused into the producing kernel.

use std::sync::{Arc, RwLock};

use super::tensor::CpuTensor;
use crate::backend::{Stage, StageGenerator, Tensor};
use crate::codegen::{geometry, permute};
use crate::codegen::plan::{ExecutionBuilder, Runnable};
use crate::error::ForgeResult;
use crate::graph::{
    AddParam, ConcatParam, Conv2DParam, FullyConnectedParam, Layout, Node, OpKind, OperandIndex,
    OperandSet, Operation, Pool2DParam, ReshapeParam, SoftmaxParam,
};
use crate::internal_error;
use crate::kernel::KernelOp;

pub struct CpuStageGenerator {
    backend: String,
}

impl CpuStageGenerator {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
        }
    }

    fn stage<P>(&self, op: KernelOp, node: &Node<P>) -> ForgeResult<Box<dyn Stage>> {
        Ok(Box::new(CpuStage {
            backend: self.backend.clone(),
            op,
            inputs: node.inputs.clone(),
            output: node.output(),
        }))
    }
}

impl CpuStageGenerator {
    fn conv2d(&self, node: &Node<Conv2DParam>, operands: &OperandSet) -> ForgeResult<Box<dyn Stage>> {
        let (geometry, activation) = geometry::conv2d(node, operands)?;
        self.stage(KernelOp::Conv2D { geometry, activation }, node)
    }

    fn max_pool2d(&self, node: &Node<Pool2DParam>, operands: &OperandSet) -> ForgeResult<Box<dyn Stage>> {
        let (geometry, activation) = geometry::pool2d(OpKind::MaxPool2D, node, operands)?;
        self.stage(KernelOp::MaxPool2D { geometry, activation }, node)
    }

    fn avg_pool2d(&self, node: &Node<Pool2DParam>, operands: &OperandSet) -> ForgeResult<Box<dyn Stage>> {
        let (geometry, activation) = geometry::pool2d(OpKind::AvgPool2D, node, operands)?;
        self.stage(KernelOp::AvgPool2D { geometry, activation }, node)
    }

    fn concat(&self, node: &Node<ConcatParam>, operands: &OperandSet) -> ForgeResult<Box<dyn Stage>> {
        let axis = geometry::concat_axis(node, operands)?;
        let dims = node
            .inputs
            .iter()
            .map(|input| Ok(operands.shape(*input)?.dims().to_vec()))
            .collect::<ForgeResult<Vec<_>>>()?;
        self.stage(KernelOp::Concat { dims, axis }, node)
    }

    fn fully_connected(
        &self,
        node: &Node<FullyConnectedParam>,
        operands: &OperandSet,
    ) -> ForgeResult<Box<dyn Stage>> {
        let (fc, activation) = geometry::fully_connected(node, operands)?;
        self.stage(
            KernelOp::FullyConnected {
                batch: fc.batch,
                input_size: fc.input_size,
                activation,
            },
            node,
        )
    }

    fn reshape(&self, node: &Node<ReshapeParam>, operands: &OperandSet) -> ForgeResult<Box<dyn Stage>> {
        let op = KernelOp::Reshape {
            input_dims: operands.shape(node.input(0))?.dims().to_vec(),
            output_dims: operands.shape(node.output())?.dims().to_vec(),
        };
        self.stage(op, node)
    }

    fn softmax(&self, node: &Node<SoftmaxParam>, operands: &OperandSet) -> ForgeResult<Box<dyn Stage>> {
        let beta = operands.scalar_f32(node.param.beta)?;
        let (outer, axis_len, inner) = geometry::softmax_extents(operands.shape(node.input(0))?, Layout::Nhwc);
        self.stage(
            KernelOp::Softmax {
                outer,
                axis_len,
                inner,
                beta,
            },
            node,
        )
    }

    fn add(&self, node: &Node<AddParam>, operands: &OperandSet) -> ForgeResult<Box<dyn Stage>> {
        let activation = geometry::activation(OpKind::Add, operands, node.param.activation)?;
        self.stage(KernelOp::Add { activation }, node)
    }

    fn cast(&self, node: &Node<()>, operands: &OperandSet) -> ForgeResult<Box<dyn Stage>> {
        let op = KernelOp::Cast {
            from: operands.at(node.input(0))?.type_info,
            to: operands.at(node.output())?.type_info,
        };
        self.stage(op, node)
    }

    fn nop(&self, node: &Node<()>, _operands: &OperandSet) -> ForgeResult<Box<dyn Stage>> {
        self.stage(KernelOp::Copy, node)
    }
}

impl StageGenerator for CpuStageGenerator {
    fn backend(&self) -> &str {
        &self.backend
    }

    fn generate(&self, operation: &Operation, operands: &OperandSet) -> ForgeResult<Box<dyn Stage>> {
        match operation {
            Operation::Conv2D(node) => self.conv2d(node, operands),
            Operation::MaxPool2D(node) => self.max_pool2d(node, operands),
            Operation::AvgPool2D(node) => self.avg_pool2d(node, operands),
            Operation::Concat(node) => self.concat(node, operands),
            Operation::FullyConnected(node) => self.fully_connected(node, operands),
            Operation::Reshape(node) => self.reshape(node, operands),
            Operation::Softmax(node) => self.softmax(node, operands),
            Operation::Add(node) => self.add(node, operands),
            Operation::Cast(node) => self.cast(node, operands),
            Operation::Nop(node) => self.nop(node, operands),
            Operation::Permute(node) => permute::generate(node, operands),
        }
    }
}

/// One kernel over host tensors, resolved when applied.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuStage {
    pub backend: String,
    pub op: KernelOp,
    pub inputs: Vec<OperandIndex>,
    pub output: OperandIndex,
}

impl Stage for CpuStage {
    fn apply(&self, builder: &mut ExecutionBuilder<'_>) -> ForgeResult<()> {
        let inputs = self
            .inputs
            .iter()
            .map(|index| self.storage(builder, *index))
            .collect::<ForgeResult<Vec<_>>>()?;
        let output = self.storage(builder, self.output)?;
        builder.append(Box::new(CpuRunnable {
            label: format!("cpu {} {}", self.op.name(), self.output),
            op: self.op.clone(),
            inputs,
            output,
        }));
        Ok(())
    }
}

impl CpuStage {
    fn storage(&self, builder: &ExecutionBuilder<'_>, index: OperandIndex) -> ForgeResult<Arc<RwLock<Vec<f32>>>> {
        let tensor = builder.tensor(&self.backend, index)?;
        host_storage(tensor.as_ref())
            .ok_or_else(|| internal_error!("operand {} on {} is not a host tensor", index, self.backend))
    }
}

fn host_storage(tensor: &dyn Tensor) -> Option<Arc<RwLock<Vec<f32>>>> {
    tensor.as_any().downcast_ref::<CpuTensor>().map(CpuTensor::storage)
}

#[derive(Debug)]
struct CpuRunnable {
    label: String,
    op: KernelOp,
    inputs: Vec<Arc<RwLock<Vec<f32>>>>,
    output: Arc<RwLock<Vec<f32>>>,
}

impl Runnable for CpuRunnable {
    fn name(&self) -> &str {
        &self.label
    }

    fn run(&self) -> ForgeResult<()> {
        let guards = self
            .inputs
            .iter()
            .map(|input| input.read())
            .collect::<Result<Vec<_>, _>>()?;
        let inputs: Vec<&[f32]> = guards.iter().map(|guard| guard.as_slice()).collect();
        let mut output = self.output.write()?;
        self.op.compute(Layout::Nhwc, &inputs, &mut output);
        Ok(())
    }
}
