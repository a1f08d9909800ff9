//! Per-operation validation and planning.
//!
//! For every node in execution order the planner checks operand shapes and
//! types, records tensor shape constraints, registers constant
//! initializers and asks the node's backend for a stage.

use std::collections::BTreeMap;

use super::geometry;
use super::plan_builder::PlanBuilder;
use crate::backend::{BackendContext, Initializer, TensorInfo};
use crate::error::{ForgeError, ForgeResult, GraphError, ResolutionError};
use crate::graph::{
    AddParam, ConcatParam, Conv2DParam, DataType, FeatureShape, FullyConnectedParam, LowerInfo, Node,
    OpKind, OperandIndex, OperandSet, Operation, Pool2DParam, ReshapeParam, Shape, SoftmaxParam,
};

pub struct Planner<'a> {
    operands: &'a OperandSet,
    contexts: &'a BTreeMap<String, BackendContext>,
    builder: &'a mut PlanBuilder,
}

impl<'a> Planner<'a> {
    pub fn new(
        operands: &'a OperandSet,
        contexts: &'a BTreeMap<String, BackendContext>,
        builder: &'a mut PlanBuilder,
    ) -> Self {
        Self {
            operands,
            contexts,
            builder,
        }
    }

    pub fn visit(&mut self, operation: &Operation, info: &LowerInfo) -> ForgeResult<()> {
        let contexts = self.contexts;
        let context = contexts
            .get(info.backend())
            .ok_or_else(|| ResolutionError::UnknownBackend(info.backend().to_string()))?;
        let kind = operation.kind();
        operation.check_arity()?;

        match operation {
            Operation::Conv2D(node) => self.conv2d(node, context)?,
            Operation::MaxPool2D(node) => self.pool2d(OpKind::MaxPool2D, node)?,
            Operation::AvgPool2D(node) => self.pool2d(OpKind::AvgPool2D, node)?,
            Operation::Concat(node) => self.concat(node)?,
            Operation::FullyConnected(node) => self.fully_connected(node, context)?,
            Operation::Reshape(node) => self.reshape(node)?,
            Operation::Softmax(node) => self.softmax(node)?,
            Operation::Add(node) => self.add(node)?,
            Operation::Cast(node) => self.same_shape(kind, node.input(0), node.output())?,
            Operation::Nop(node) => {
                self.same_shape(kind, node.input(0), node.output())?;
                self.same_type(node.input(0), node.output())?;
            }
            Operation::Permute(node) => {
                self.same_shape(kind, node.input(0), node.output())?;
                self.same_type(node.input(0), node.output())?;
            }
        }

        for index in operation.inputs().iter().chain(operation.outputs()) {
            let operand = self.operands.at(*index)?;
            self.builder
                .add_shape_constraint(*index, TensorInfo::new(operand.shape.clone(), operand.type_info))?;
        }
        self.generic_constants(operation, context)?;

        let stage = context.stage_gen.generate(operation, self.operands)?;
        tracing::trace!(%kind, backend = info.backend(), ?stage, "planned operation");
        self.builder.add_stage(stage);
        Ok(())
    }

    // ========== Per-kind validation ==========

    fn conv2d(&mut self, node: &Node<Conv2DParam>, context: &BackendContext) -> ForgeResult<()> {
        let kind = OpKind::Conv2D;
        let input = node.input(Conv2DParam::INPUT);
        let kernel_index = node.input(Conv2DParam::KERNEL);
        let bias_index = node.input(Conv2DParam::BIAS);
        self.float32(&[input, kernel_index, bias_index, node.output()])?;

        let ifm = self.operands.feature(input)?;
        let kernel = self.operands.kernel(kernel_index)?;
        let bias = self.operands.vector(bias_index)?;
        if kernel.c != ifm.c {
            return Err(mismatch(
                kind,
                kernel_index,
                format!("kernel depth {} does not match input channels {}", kernel.c, ifm.c),
            ));
        }
        if bias != kernel.n {
            return Err(mismatch(
                kind,
                bias_index,
                format!("bias length {} does not match output channels {}", bias, kernel.n),
            ));
        }
        let (geometry, _) = geometry::conv2d(node, self.operands)?;
        self.expect_feature(kind, node.output(), geometry.output)?;

        let generator = &context.initializer_gen;
        if self.is_constant(kernel_index)? {
            let init = generator.conv2d_kernel(node, self.operands)?;
            self.builder.add_initializer(kernel_index, init);
        }
        if self.is_constant(bias_index)? {
            let init = generator.conv2d_bias(node, self.operands)?;
            self.builder.add_initializer(bias_index, init);
        }
        Ok(())
    }

    fn pool2d(&mut self, kind: OpKind, node: &Node<Pool2DParam>) -> ForgeResult<()> {
        if kind == OpKind::AvgPool2D {
            self.float32(&[node.input(0), node.output()])?;
        } else {
            self.same_type(node.input(0), node.output())?;
            let dtype = self.operands.at(node.input(0))?.dtype();
            if !matches!(dtype, DataType::Float32 | DataType::QuantAsymm8) {
                return Err(GraphError::TypeMismatch {
                    index: node.input(0),
                    expected: DataType::Float32.to_string(),
                    actual: dtype.to_string(),
                }
                .into());
            }
        }
        let (geometry, _) = geometry::pool2d(kind, node, self.operands)?;
        self.expect_feature(kind, node.output(), geometry.output)
    }

    fn concat(&mut self, node: &Node<ConcatParam>) -> ForgeResult<()> {
        let kind = OpKind::Concat;
        let axis = geometry::concat_axis(node, self.operands)?;
        let output = node.output();
        let first = self.operands.shape(node.input(0))?.dims().to_vec();
        let mut expected = first.clone();
        expected[axis] = 0;

        for input in &node.inputs {
            self.same_type(*input, output)?;
            let dims = self.operands.shape(*input)?.dims();
            if dims.len() != first.len() {
                return Err(GraphError::UnsupportedRank {
                    index: *input,
                    expected: first.len().to_string(),
                    actual: dims.len(),
                }
                .into());
            }
            let off_axis = dims
                .iter()
                .zip(&first)
                .enumerate()
                .any(|(d, (a, b))| d != axis && a != b);
            if off_axis {
                return Err(mismatch(
                    kind,
                    *input,
                    format!("{:?} differs from {:?} off axis {}", dims, first, axis),
                ));
            }
            expected[axis] += dims[axis];
        }
        self.expect_dims(kind, output, &expected)
    }

    fn fully_connected(&mut self, node: &Node<FullyConnectedParam>, context: &BackendContext) -> ForgeResult<()> {
        let kind = OpKind::FullyConnected;
        let weight_index = node.input(FullyConnectedParam::WEIGHT);
        let bias_index = node.input(FullyConnectedParam::BIAS);
        self.float32(&[node.input(FullyConnectedParam::INPUT), weight_index, bias_index, node.output()])?;

        let (fc, _) = geometry::fully_connected(node, self.operands)?;
        let bias = self.operands.vector(bias_index)?;
        if bias != fc.num_units {
            return Err(mismatch(
                kind,
                bias_index,
                format!("bias length {} does not match {} units", bias, fc.num_units),
            ));
        }
        self.expect_dims(kind, node.output(), &[fc.batch, fc.num_units])?;

        let generator = &context.initializer_gen;
        if self.is_constant(weight_index)? {
            let init = generator.fully_connected_weight(node, self.operands)?;
            self.builder.add_initializer(weight_index, init);
        }
        if self.is_constant(bias_index)? {
            let init = generator.fully_connected_bias(node, self.operands)?;
            self.builder.add_initializer(bias_index, init);
        }
        Ok(())
    }

    fn reshape(&mut self, node: &Node<ReshapeParam>) -> ForgeResult<()> {
        let kind = OpKind::Reshape;
        let (input, output) = (node.input(0), node.output());
        self.same_type(input, output)?;
        let from = self.operands.shape(input)?.num_elements();
        let to = self.operands.shape(output)?;
        if from != to.num_elements() {
            return Err(mismatch(
                kind,
                output,
                format!("{} elements cannot be reshaped into {:?}", from, to.dims()),
            ));
        }
        if let Some(shape_index) = node.param.shape {
            let operand = self.operands.at(shape_index)?;
            if let Some(data) = operand.data() {
                let requested = data.to_i32_vec();
                let matches = requested.len() == to.rank()
                    && requested
                        .iter()
                        .zip(to.dims())
                        .all(|(r, d)| *r == -1 || *r as usize == *d);
                if !matches {
                    return Err(GraphError::InvalidParam {
                        kind,
                        index: shape_index,
                        reason: format!("target shape {:?} disagrees with output {:?}", requested, to.dims()),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    fn softmax(&mut self, node: &Node<SoftmaxParam>) -> ForgeResult<()> {
        let kind = OpKind::Softmax;
        let (input, output) = (node.input(0), node.output());
        self.float32(&[input, output])?;
        self.same_shape(kind, input, output)?;
        let rank = self.operands.shape(input)?.rank();
        if rank != 2 && rank != 4 {
            return Err(GraphError::UnsupportedRank {
                index: input,
                expected: "2 or 4".to_string(),
                actual: rank,
            }
            .into());
        }
        let beta = self.operands.scalar_f32(node.param.beta)?;
        if beta.is_nan() || beta <= 0.0 {
            return Err(GraphError::InvalidParam {
                kind,
                index: node.param.beta,
                reason: format!("beta must be positive, got {}", beta),
            }
            .into());
        }
        Ok(())
    }

    fn add(&mut self, node: &Node<AddParam>) -> ForgeResult<()> {
        let kind = OpKind::Add;
        let (lhs, rhs, output) = (node.input(AddParam::LHS), node.input(AddParam::RHS), node.output());
        self.float32(&[lhs, rhs, output])?;
        self.same_shape(kind, lhs, output)?;
        self.same_shape(kind, rhs, output)?;
        geometry::activation(kind, self.operands, node.param.activation)?;
        Ok(())
    }

    // ========== Constants ==========

    /// Constant inputs without a weight role get a plain copy.
    fn generic_constants(&mut self, operation: &Operation, context: &BackendContext) -> ForgeResult<()> {
        let roles: &[usize] = match operation {
            Operation::Conv2D(_) => &[Conv2DParam::KERNEL, Conv2DParam::BIAS],
            Operation::FullyConnected(_) => &[FullyConnectedParam::WEIGHT, FullyConnectedParam::BIAS],
            _ => &[],
        };
        for (role, index) in operation.inputs().iter().enumerate() {
            if roles.contains(&role) || !self.is_constant(*index)? {
                continue;
            }
            let init: Box<dyn Initializer> = context.initializer_gen.constant(*index, self.operands)?;
            self.builder.add_initializer(*index, init);
        }
        Ok(())
    }

    fn is_constant(&self, index: OperandIndex) -> ForgeResult<bool> {
        Ok(self.operands.at(index)?.is_constant())
    }

    // ========== Checks ==========

    fn float32(&self, indices: &[OperandIndex]) -> ForgeResult<()> {
        for index in indices {
            let dtype = self.operands.at(*index)?.dtype();
            if dtype != DataType::Float32 {
                return Err(GraphError::TypeMismatch {
                    index: *index,
                    expected: DataType::Float32.to_string(),
                    actual: dtype.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn same_type(&self, input: OperandIndex, output: OperandIndex) -> ForgeResult<()> {
        let expected = self.operands.at(output)?.type_info;
        let actual = self.operands.at(input)?.type_info;
        if expected != actual {
            return Err(GraphError::TypeMismatch {
                index: input,
                expected: expected.dtype.to_string(),
                actual: actual.dtype.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn same_shape(&self, kind: OpKind, input: OperandIndex, output: OperandIndex) -> ForgeResult<()> {
        let expected = self.operands.shape(output)?.dims();
        self.expect_dims(kind, input, expected)
    }

    fn expect_feature(&self, kind: OpKind, index: OperandIndex, expected: FeatureShape) -> ForgeResult<()> {
        self.expect_dims(kind, index, &[expected.n, expected.h, expected.w, expected.c])
    }

    fn expect_dims(&self, kind: OpKind, index: OperandIndex, expected: &[usize]) -> ForgeResult<()> {
        let actual: &Shape = self.operands.shape(index)?;
        if actual.dims() != expected {
            return Err(mismatch(
                kind,
                index,
                format!("declared {:?}, expected {:?}", actual.dims(), expected),
            ));
        }
        Ok(())
    }
}

fn mismatch(kind: OpKind, index: OperandIndex, reason: String) -> ForgeError {
    GraphError::ShapeMismatch { kind, index, reason }.into()
}
