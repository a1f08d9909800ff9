//! A configured kernel invocation, independent of where its buffers live.

use super::{
    activation_inplace, add, avg_pool2d, cast, concat, conv2d, convert, fully_connected,
    max_pool2d, softmax, Conv2DGeometry, Layout, Pool2DGeometry,
};
use crate::graph::{Activation, TypeInfo};

/// Scalar configuration of one runnable kernel.
///
/// Inputs are passed in node order; every op writes exactly one output.
/// Shapes and axes are already expressed in the executing backend's
/// storage order.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelOp {
    Conv2D {
        geometry: Conv2DGeometry,
        activation: Activation,
    },
    MaxPool2D {
        geometry: Pool2DGeometry,
        activation: Activation,
    },
    AvgPool2D {
        geometry: Pool2DGeometry,
        activation: Activation,
    },
    /// Storage dims of every input and the storage axis.
    Concat { dims: Vec<Vec<usize>>, axis: usize },
    FullyConnected {
        batch: usize,
        input_size: usize,
        activation: Activation,
    },
    Softmax {
        outer: usize,
        axis_len: usize,
        inner: usize,
        beta: f32,
    },
    Add { activation: Activation },
    Cast { from: TypeInfo, to: TypeInfo },
    /// Logical reshape between two logical shapes.
    Reshape {
        input_dims: Vec<usize>,
        output_dims: Vec<usize>,
    },
    Copy,
    /// Applied in place on the output; takes no inputs.
    Activation(Activation),
}

impl KernelOp {
    pub fn name(&self) -> &'static str {
        match self {
            KernelOp::Conv2D { .. } => "conv2d",
            KernelOp::MaxPool2D { .. } => "max_pool2d",
            KernelOp::AvgPool2D { .. } => "avg_pool2d",
            KernelOp::Concat { .. } => "concat",
            KernelOp::FullyConnected { .. } => "fully_connected",
            KernelOp::Softmax { .. } => "softmax",
            KernelOp::Add { .. } => "add",
            KernelOp::Cast { .. } => "cast",
            KernelOp::Reshape { .. } => "reshape",
            KernelOp::Copy => "copy",
            KernelOp::Activation(_) => "activation",
        }
    }

    /// Run the kernel on storage-order buffers laid out as `layout`.
    pub fn compute(&self, layout: Layout, inputs: &[&[f32]], output: &mut [f32]) {
        match self {
            KernelOp::Conv2D {
                geometry,
                activation,
            } => conv2d(geometry, layout, inputs[0], inputs[1], inputs[2], *activation, output),
            KernelOp::MaxPool2D {
                geometry,
                activation,
            } => max_pool2d(geometry, layout, inputs[0], *activation, output),
            KernelOp::AvgPool2D {
                geometry,
                activation,
            } => avg_pool2d(geometry, layout, inputs[0], *activation, output),
            KernelOp::Concat { dims, axis } => {
                let parts: Vec<(&[f32], &[usize])> = inputs
                    .iter()
                    .zip(dims)
                    .map(|(data, dims)| (*data, dims.as_slice()))
                    .collect();
                concat(&parts, *axis, output);
            }
            KernelOp::FullyConnected {
                batch,
                input_size,
                activation,
            } => fully_connected(
                inputs[0],
                *batch,
                *input_size,
                inputs[1],
                inputs[2],
                *activation,
                output,
            ),
            KernelOp::Softmax {
                outer,
                axis_len,
                inner,
                beta,
            } => softmax(inputs[0], *outer, *axis_len, *inner, *beta, output),
            KernelOp::Add { activation } => add(inputs[0], inputs[1], *activation, output),
            KernelOp::Cast { from, to } => cast(inputs[0], from, to, output),
            KernelOp::Reshape {
                input_dims,
                output_dims,
            } => {
                let logical = convert(inputs[0], input_dims, layout, Layout::Nhwc);
                let stored = convert(&logical, output_dims, Layout::Nhwc, layout);
                output.copy_from_slice(&stored);
            }
            KernelOp::Copy => output.copy_from_slice(inputs[0]),
            KernelOp::Activation(activation) => activation_inplace(output, *activation),
        }
    }
}
