//! GPU stages.
//!
//! Kernels run on the device queue in channel-first storage. Fused
//! activations are not folded into the kernels; the generator appends a
//! separate in-place activation runnable instead.

use std::sync::Arc;

use super::device::{DeviceBuffer, GpuDevice};
use super::tensor::GpuTensor;
use crate::backend::{Stage, StageGenerator, Tensor, TensorInfo};
use crate::codegen::{geometry, permute};
use crate::codegen::plan::{ExecutionBuilder, Runnable};
use crate::error::ForgeResult;
use crate::graph::{
    Activation, AddParam, ConcatParam, Conv2DParam, FullyConnectedParam, Layout, Node, OpKind,
    OperandIndex, OperandSet, Operation, Pool2DParam, ReshapeParam, Shape, SoftmaxParam,
};
use crate::internal_error;
use crate::kernel::{self, KernelOp};

pub struct GpuStageGenerator {
    backend: String,
}

impl GpuStageGenerator {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
        }
    }

    fn stage<P>(&self, op: KernelOp, activation: Activation, node: &Node<P>) -> ForgeResult<Box<dyn Stage>> {
        Ok(Box::new(GpuStage {
            backend: self.backend.clone(),
            op,
            activation,
            inputs: node.inputs.clone(),
            output: node.output(),
            flatten: None,
        }))
    }
}

impl GpuStageGenerator {
    fn conv2d(&self, node: &Node<Conv2DParam>, operands: &OperandSet) -> ForgeResult<Box<dyn Stage>> {
        let (geometry, activation) = geometry::conv2d(node, operands)?;
        let op = KernelOp::Conv2D {
            geometry,
            activation: Activation::None,
        };
        self.stage(op, activation, node)
    }

    fn max_pool2d(&self, node: &Node<Pool2DParam>, operands: &OperandSet) -> ForgeResult<Box<dyn Stage>> {
        let (geometry, activation) = geometry::pool2d(OpKind::MaxPool2D, node, operands)?;
        let op = KernelOp::MaxPool2D {
            geometry,
            activation: Activation::None,
        };
        self.stage(op, activation, node)
    }

    fn avg_pool2d(&self, node: &Node<Pool2DParam>, operands: &OperandSet) -> ForgeResult<Box<dyn Stage>> {
        let (geometry, activation) = geometry::pool2d(OpKind::AvgPool2D, node, operands)?;
        let op = KernelOp::AvgPool2D {
            geometry,
            activation: Activation::None,
        };
        self.stage(op, activation, node)
    }

    fn concat(&self, node: &Node<ConcatParam>, operands: &OperandSet) -> ForgeResult<Box<dyn Stage>> {
        let axis = geometry::concat_axis(node, operands)?;
        let mut rank = 0;
        let dims = node
            .inputs
            .iter()
            .map(|input| {
                let logical = operands.shape(*input)?.dims();
                rank = logical.len();
                Ok(kernel::storage_dims(logical, Layout::Nchw))
            })
            .collect::<ForgeResult<Vec<_>>>()?;
        let op = KernelOp::Concat {
            dims,
            axis: kernel::storage_axis(axis, rank, Layout::Nchw),
        };
        self.stage(op, Activation::None, node)
    }

    /// Rank 4 inputs are brought back to logical order before the matrix
    /// product, since rows are flattened NHWC.
    fn fully_connected(
        &self,
        node: &Node<FullyConnectedParam>,
        operands: &OperandSet,
    ) -> ForgeResult<Box<dyn Stage>> {
        let (fc, activation) = geometry::fully_connected(node, operands)?;
        let input = operands.at(node.input(FullyConnectedParam::INPUT))?;
        let input_dims = input.shape.dims().to_vec();
        let rows = vec![fc.batch, fc.input_size];
        let flatten = (input_dims.len() == 4).then(|| Flatten {
            op: KernelOp::Reshape {
                input_dims,
                output_dims: rows.clone(),
            },
            scratch: TensorInfo::new(Shape::new(rows), input.type_info),
        });
        let op = KernelOp::FullyConnected {
            batch: fc.batch,
            input_size: fc.input_size,
            activation: Activation::None,
        };
        Ok(Box::new(GpuStage {
            backend: self.backend.clone(),
            op,
            activation,
            inputs: node.inputs.clone(),
            output: node.output(),
            flatten,
        }))
    }

    fn reshape(&self, node: &Node<ReshapeParam>, operands: &OperandSet) -> ForgeResult<Box<dyn Stage>> {
        let op = KernelOp::Reshape {
            input_dims: operands.shape(node.input(0))?.dims().to_vec(),
            output_dims: operands.shape(node.output())?.dims().to_vec(),
        };
        self.stage(op, Activation::None, node)
    }

    fn softmax(&self, node: &Node<SoftmaxParam>, operands: &OperandSet) -> ForgeResult<Box<dyn Stage>> {
        let beta = operands.scalar_f32(node.param.beta)?;
        let (outer, axis_len, inner) = geometry::softmax_extents(operands.shape(node.input(0))?, Layout::Nchw);
        let op = KernelOp::Softmax {
            outer,
            axis_len,
            inner,
            beta,
        };
        self.stage(op, Activation::None, node)
    }

    fn add(&self, node: &Node<AddParam>, operands: &OperandSet) -> ForgeResult<Box<dyn Stage>> {
        let activation = geometry::activation(OpKind::Add, operands, node.param.activation)?;
        let op = KernelOp::Add {
            activation: Activation::None,
        };
        self.stage(op, activation, node)
    }

    fn cast(&self, node: &Node<()>, operands: &OperandSet) -> ForgeResult<Box<dyn Stage>> {
        let op = KernelOp::Cast {
            from: operands.at(node.input(0))?.type_info,
            to: operands.at(node.output())?.type_info,
        };
        self.stage(op, Activation::None, node)
    }

    fn nop(&self, node: &Node<()>, _operands: &OperandSet) -> ForgeResult<Box<dyn Stage>> {
        self.stage(KernelOp::Copy, Activation::None, node)
    }
}

impl StageGenerator for GpuStageGenerator {
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

/// One device kernel, an optional input flattening step and an optional
/// trailing activation.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuStage {
    pub backend: String,
    pub op: KernelOp,
    pub activation: Activation,
    pub inputs: Vec<OperandIndex>,
    pub output: OperandIndex,
    pub flatten: Option<Flatten>,
}

/// Rewrites the first input into a scratch tensor, which `op` then reads
/// in its place.
#[derive(Debug, Clone, PartialEq)]
pub struct Flatten {
    pub op: KernelOp,
    pub scratch: TensorInfo,
}

impl Stage for GpuStage {
    fn apply(&self, builder: &mut ExecutionBuilder<'_>) -> ForgeResult<()> {
        let (device, output) = self.buffer(builder, self.output)?;
        let mut inputs = self
            .inputs
            .iter()
            .map(|index| Ok(self.buffer(builder, *index)?.1))
            .collect::<ForgeResult<Vec<_>>>()?;

        if let (Some(flatten), Some(first)) = (&self.flatten, inputs.first_mut()) {
            let tensor = builder.scratch(&self.backend, flatten.scratch.clone())?;
            let (_, scratch) = device_buffer(tensor.as_ref())?;
            builder.append(Box::new(GpuRunnable {
                label: format!("gpu flatten {}", self.inputs[0]),
                device: Arc::clone(&device),
                op: flatten.op.clone(),
                inputs: vec![first.clone()],
                output: scratch.clone(),
            }));
            *first = scratch;
        }

        builder.append(Box::new(GpuRunnable {
            label: format!("gpu {} {}", self.op.name(), self.output),
            device: Arc::clone(&device),
            op: self.op.clone(),
            inputs,
            output: output.clone(),
        }));

        if self.activation != Activation::None {
            builder.append(Box::new(GpuRunnable {
                label: format!("gpu activation {}", self.output),
                device,
                op: KernelOp::Activation(self.activation),
                inputs: Vec::new(),
                output,
            }));
        }
        Ok(())
    }
}

impl GpuStage {
    fn buffer(&self, builder: &ExecutionBuilder<'_>, index: OperandIndex) -> ForgeResult<(Arc<GpuDevice>, DeviceBuffer)> {
        device_buffer(builder.tensor(&self.backend, index)?.as_ref())
    }
}

fn device_buffer(tensor: &dyn Tensor) -> ForgeResult<(Arc<GpuDevice>, DeviceBuffer)> {
    let gpu = tensor
        .as_any()
        .downcast_ref::<GpuTensor>()
        .ok_or_else(|| internal_error!("{:?} on {} is not a device tensor", tensor.info(), tensor.backend()))?;
    Ok((Arc::clone(gpu.device()), gpu.buffer()?.clone()))
}

/// Submits its kernel to the device queue when run.
#[derive(Debug)]
struct GpuRunnable {
    label: String,
    device: Arc<GpuDevice>,
    op: KernelOp,
    inputs: Vec<DeviceBuffer>,
    output: DeviceBuffer,
}

impl Runnable for GpuRunnable {
    fn name(&self) -> &str {
        &self.label
    }

    fn run(&self) -> ForgeResult<()> {
        let op = self.op.clone();
        let inputs = self.inputs.clone();
        let output = self.output.clone();
        self.device.enqueue(self.label.clone(), move || {
            let guards = inputs
                .iter()
                .map(DeviceBuffer::load)
                .collect::<Result<Vec<_>, _>>()?;
            let slices: Vec<&[f32]> = guards.iter().map(|guard| guard.as_slice()).collect();
            let mut out = output.store()?;
            op.compute(Layout::Nchw, &slices, &mut out);
            Ok(())
        })
    }
}
