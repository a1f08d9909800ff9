//! Kernel geometry derived from node parameters.
//!
//! Shared by the planner, which checks the derived output against the
//! declared one, and by the stage generators, which configure kernels.

use super::padding;
use crate::error::{ForgeResult, GraphError};
use crate::graph::{
    Activation, ConcatParam, Conv2DParam, FeatureShape, FullyConnectedParam, Layout, Node, OpKind, OperandIndex,
    OperandSet, Pool2DParam, Shape,
};
use crate::kernel::{Conv2DGeometry, Pool2DGeometry};

pub fn activation(kind: OpKind, operands: &OperandSet, index: OperandIndex) -> ForgeResult<Activation> {
    let code = operands.scalar_i32(index)?;
    Activation::from_code(code).ok_or_else(|| invalid(kind, index, format!("unknown fused activation {}", code)))
}

/// A strictly positive integer scalar (stride or window extent).
pub fn positive(kind: OpKind, operands: &OperandSet, index: OperandIndex) -> ForgeResult<usize> {
    let value = operands.scalar_i32(index)?;
    if value <= 0 {
        return Err(invalid(kind, index, format!("expected a positive value, got {}", value)));
    }
    Ok(value as usize)
}

fn invalid(kind: OpKind, index: OperandIndex, reason: String) -> crate::error::ForgeError {
    GraphError::InvalidParam { kind, index, reason }.into()
}

fn window_output(
    kind: OpKind,
    index: OperandIndex,
    padding: crate::graph::PaddingType,
    input: usize,
    kernel: usize,
    stride: usize,
) -> ForgeResult<usize> {
    padding::output_extent(padding, input, kernel, stride).ok_or_else(|| {
        invalid(
            kind,
            index,
            format!("window {} does not fit input extent {}", kernel, input),
        )
    })
}

pub fn conv2d(node: &Node<Conv2DParam>, operands: &OperandSet) -> ForgeResult<(Conv2DGeometry, Activation)> {
    let kind = OpKind::Conv2D;
    let p = &node.param;
    let input = operands.feature(node.input(Conv2DParam::INPUT))?;
    let kernel = operands.kernel(node.input(Conv2DParam::KERNEL))?;
    let padding_type = padding::decode(kind, operands, p.padding)?;
    let stride_w = positive(kind, operands, p.hstride)?;
    let stride_h = positive(kind, operands, p.vstride)?;
    let output = FeatureShape {
        n: input.n,
        h: window_output(kind, p.padding, padding_type, input.h, kernel.h, stride_h)?,
        w: window_output(kind, p.padding, padding_type, input.w, kernel.w, stride_w)?,
        c: kernel.n,
    };
    let padding = padding::explicit(padding_type, input, output, kernel.h, kernel.w, stride_h, stride_w);
    let geometry = Conv2DGeometry {
        input,
        kernel,
        output,
        stride_h,
        stride_w,
        padding,
    };
    Ok((geometry, activation(kind, operands, p.activation)?))
}

pub fn pool2d(
    kind: OpKind,
    node: &Node<Pool2DParam>,
    operands: &OperandSet,
) -> ForgeResult<(Pool2DGeometry, Activation)> {
    let p = &node.param;
    let input = operands.feature(node.input(0))?;
    let padding_type = padding::decode(kind, operands, p.padding)?;
    let stride_w = positive(kind, operands, p.hstride)?;
    let stride_h = positive(kind, operands, p.vstride)?;
    let kernel_w = positive(kind, operands, p.kw)?;
    let kernel_h = positive(kind, operands, p.kh)?;
    let output = FeatureShape {
        n: input.n,
        h: window_output(kind, p.padding, padding_type, input.h, kernel_h, stride_h)?,
        w: window_output(kind, p.padding, padding_type, input.w, kernel_w, stride_w)?,
        c: input.c,
    };
    let padding = padding::explicit(padding_type, input, output, kernel_h, kernel_w, stride_h, stride_w);
    let geometry = Pool2DGeometry {
        input,
        output,
        kernel_h,
        kernel_w,
        stride_h,
        stride_w,
        padding,
    };
    Ok((geometry, activation(kind, operands, p.activation)?))
}

/// Batch and input size of a fully connected layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullyConnectedGeometry {
    pub batch: usize,
    pub input_size: usize,
    pub num_units: usize,
}

pub fn fully_connected(
    node: &Node<FullyConnectedParam>,
    operands: &OperandSet,
) -> ForgeResult<(FullyConnectedGeometry, Activation)> {
    let kind = OpKind::FullyConnected;
    let input = node.input(FullyConnectedParam::INPUT);
    let (num_units, input_size) = operands.matrix(node.input(FullyConnectedParam::WEIGHT))?;
    let elements = operands.shape(input)?.num_elements();
    if input_size == 0 || elements % input_size != 0 {
        return Err(GraphError::ShapeMismatch {
            kind,
            index: input,
            reason: format!("{} elements are not a multiple of input size {}", elements, input_size),
        }
        .into());
    }
    let geometry = FullyConnectedGeometry {
        batch: elements / input_size,
        input_size,
        num_units,
    };
    Ok((geometry, activation(kind, operands, node.param.activation)?))
}

/// Concatenation axis, checked against the rank of the first input.
pub fn concat_axis(node: &Node<ConcatParam>, operands: &OperandSet) -> ForgeResult<usize> {
    let axis = operands.scalar_i32(node.param.axis)?;
    let rank = operands.shape(node.input(0))?.rank();
    if axis < 0 || axis as usize >= rank {
        return Err(invalid(
            OpKind::Concat,
            node.param.axis,
            format!("axis {} out of range for rank {}", axis, rank),
        ));
    }
    Ok(axis as usize)
}

/// `(outer, axis_len, inner)` of a softmax over the last logical axis.
pub fn softmax_extents(shape: &Shape, layout: Layout) -> (usize, usize, usize) {
    match (shape.dims(), layout) {
        (&[n, h, w, c], Layout::Nchw) => (n, c, h * w),
        (dims, _) => {
            let axis_len = dims.last().copied().unwrap_or(1);
            let outer = dims.iter().rev().skip(1).product();
            (outer, axis_len, 1)
        }
    }
}
