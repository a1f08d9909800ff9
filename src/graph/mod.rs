//! Backend-agnostic model IR.
//!
//! A [`Model`] is an arena of operands plus a list of operations that refer
//! to operands by index. It moves through three phases: `Building` (mutable,
//! filled by the caller), `Model` (verified, read-only) and `Lowered` (every
//! operation carries a backend assignment and cross-backend edges have been
//! split by permute nodes).

pub mod index;
pub mod linear;
pub mod lower_info;
pub mod operand;
pub mod operation;
pub mod verifier;

use std::collections::HashMap;
use std::fmt;

pub use index::{IoIndex, OperandIndex, OperationIndex};
pub use linear::Linear;
pub use lower_info::{BackendUse, Layout, LowerInfo, OperandLowerInfo};
pub use operand::{
    ConstData, DataType, FeatureShape, KernelShape, Operand, OperandSet, Shape, TypeInfo,
};
pub use operation::{
    Activation, AddParam, ConcatParam, Conv2DParam, FullyConnectedParam, Node, OpKind, Operation,
    PaddingType, PermuteParam, Pool2DParam, ReshapeParam, SoftmaxParam,
};

use crate::error::{ForgeResult, GraphError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Building,
    Model,
    Lowered,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Building => f.write_str("building"),
            Phase::Model => f.write_str("model"),
            Phase::Lowered => f.write_str("lowered"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Model {
    operands: OperandSet,
    operations: Vec<Operation>,
    lower_infos: Vec<Option<LowerInfo>>,
    inputs: Vec<OperandIndex>,
    outputs: Vec<OperandIndex>,
    phase: Phase,
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl Model {
    pub fn new() -> Self {
        Self {
            operands: OperandSet::new(),
            operations: Vec::new(),
            lower_infos: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            phase: Phase::Building,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn expect_phase(&self, expected: Phase) -> ForgeResult<()> {
        if self.phase != expected {
            return Err(GraphError::InvalidPhase {
                expected: expected.to_string(),
                actual: self.phase.to_string(),
            }
            .into());
        }
        Ok(())
    }

    // ========== Building ==========

    pub fn add_operand(&mut self, shape: impl Into<Shape>, type_info: TypeInfo) -> ForgeResult<OperandIndex> {
        self.expect_phase(Phase::Building)?;
        Ok(self.operands.append(Operand::new(shape.into(), type_info)))
    }

    /// Attach immutable constant data to an operand.
    pub fn set_operand_value(&mut self, index: OperandIndex, data: ConstData) -> ForgeResult<()> {
        self.expect_phase(Phase::Building)?;
        let operand = self.operands.at_mut(index)?;
        let expected = operand.byte_size();
        if data.len() != expected {
            return Err(GraphError::DataLength {
                index,
                expected,
                actual: data.len(),
            }
            .into());
        }
        operand.set_data(data);
        Ok(())
    }

    pub fn add_operation(&mut self, operation: Operation) -> ForgeResult<OperationIndex> {
        self.expect_phase(Phase::Building)?;
        operation.check_arity()?;
        let index = OperationIndex(self.operations.len() as u32);
        self.operations.push(operation);
        self.lower_infos.push(None);
        Ok(index)
    }

    pub fn add_input(&mut self, index: OperandIndex) -> ForgeResult<IoIndex> {
        self.expect_phase(Phase::Building)?;
        self.operands.at(index)?;
        self.inputs.push(index);
        Ok(IoIndex(self.inputs.len() as u32 - 1))
    }

    pub fn add_output(&mut self, index: OperandIndex) -> ForgeResult<IoIndex> {
        self.expect_phase(Phase::Building)?;
        self.operands.at(index)?;
        self.outputs.push(index);
        Ok(IoIndex(self.outputs.len() as u32 - 1))
    }

    /// Compute def-use links, verify the graph and freeze it.
    pub fn finish_building(&mut self) -> ForgeResult<()> {
        self.expect_phase(Phase::Building)?;
        verifier::verify_indices(self)?;
        self.link_operands()?;
        verifier::verify(self)?;
        self.phase = Phase::Model;
        tracing::debug!(
            operands = self.operands.len(),
            operations = self.operations.len(),
            inputs = self.inputs.len(),
            outputs = self.outputs.len(),
            "model finished"
        );
        Ok(())
    }

    fn link_operands(&mut self) -> ForgeResult<()> {
        for (_, operand) in self.operands.iter_mut() {
            operand.clear_links();
        }
        for (i, op) in self.operations.iter().enumerate() {
            let op_index = OperationIndex(i as u32);
            for input in op.inputs() {
                self.operands.at_mut(*input)?.append_use(op_index);
            }
            for output in op.outputs() {
                let operand = self.operands.at_mut(*output)?;
                if operand.def().is_some() {
                    return Err(GraphError::MultipleWriters(*output).into());
                }
                operand.set_def(op_index);
            }
        }
        Ok(())
    }

    // ========== Read access ==========

    pub fn operands(&self) -> &OperandSet {
        &self.operands
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    pub fn operation(&self, index: OperationIndex) -> ForgeResult<&Operation> {
        self.operations
            .get(index.as_usize())
            .ok_or_else(|| GraphError::InvalidOperationIndex(index).into())
    }

    pub fn operations(&self) -> impl Iterator<Item = (OperationIndex, &Operation)> {
        self.operations
            .iter()
            .enumerate()
            .map(|(i, op)| (OperationIndex(i as u32), op))
    }

    pub fn inputs(&self) -> &[OperandIndex] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OperandIndex] {
        &self.outputs
    }

    pub fn input_at(&self, io: IoIndex) -> ForgeResult<OperandIndex> {
        self.inputs
            .get(io.as_usize())
            .copied()
            .ok_or_else(|| GraphError::InvalidIoIndex(io).into())
    }

    pub fn output_at(&self, io: IoIndex) -> ForgeResult<OperandIndex> {
        self.outputs
            .get(io.as_usize())
            .copied()
            .ok_or_else(|| GraphError::InvalidIoIndex(io).into())
    }

    pub fn lower_info(&self, index: OperationIndex) -> ForgeResult<&LowerInfo> {
        self.lower_infos
            .get(index.as_usize())
            .and_then(|info| info.as_ref())
            .ok_or_else(|| {
                GraphError::InvalidPhase {
                    expected: Phase::Lowered.to_string(),
                    actual: self.phase.to_string(),
                }
                .into()
            })
    }

    // ========== Lowering ==========

    /// Attach one backend assignment per operation and split every edge
    /// whose producer and consumer run on different backends.
    pub fn lower(&mut self, assignments: Vec<LowerInfo>) -> ForgeResult<()> {
        self.expect_phase(Phase::Model)?;
        if assignments.len() != self.operations.len() {
            return Err(crate::internal_error!(
                "{} backend assignments for {} operations",
                assignments.len(),
                self.operations.len()
            ));
        }
        self.lower_infos = assignments.into_iter().map(Some).collect();

        let inserted = self.insert_permutes()?;
        self.link_operands()?;
        self.compute_operand_lower_info()?;
        verifier::verify(self)?;
        self.phase = Phase::Lowered;
        tracing::debug!(permutes = inserted, "model lowered");
        Ok(())
    }

    fn insert_permutes(&mut self) -> ForgeResult<usize> {
        // (operand, destination backend) -> permuted copy
        let mut copies: HashMap<(OperandIndex, String), OperandIndex> = HashMap::new();
        let original_count = self.operations.len();
        let mut inserted = 0;

        for producer in 0..original_count {
            let producer_info = self.lower_infos[producer].clone().ok_or_else(|| {
                crate::internal_error!("operation {} has no backend", producer)
            })?;
            let outputs = self.operations[producer].outputs().to_vec();
            for output in outputs {
                let users = self.operands.at(output)?.uses().to_vec();
                for user in users {
                    let user_info = self.lower_infos[user.as_usize()]
                        .clone()
                        .ok_or_else(|| crate::internal_error!("operation {} has no backend", user))?;
                    if user_info.backend() == producer_info.backend() {
                        continue;
                    }
                    let key = (output, user_info.backend().to_string());
                    let copy = match copies.get(&key) {
                        Some(copy) => *copy,
                        None => {
                            let source = self.operands.at(output)?;
                            let operand = Operand::new(source.shape.clone(), source.type_info);
                            let copy = self.operands.append(operand);
                            self.operations.push(Operation::Permute(Node::new(
                                vec![output],
                                vec![copy],
                                PermuteParam {
                                    from: producer_info.backend().to_string(),
                                    to: user_info.backend().to_string(),
                                },
                            )));
                            self.lower_infos.push(Some(user_info.clone()));
                            copies.insert(key, copy);
                            inserted += 1;
                            tracing::trace!(
                                operand = %output,
                                from = producer_info.backend(),
                                to = user_info.backend(),
                                "inserted permute"
                            );
                            copy
                        }
                    };
                    self.operations[user.as_usize()].replace_input(output, copy);
                }
            }
        }
        Ok(inserted)
    }

    fn compute_operand_lower_info(&mut self) -> ForgeResult<()> {
        let mut infos: HashMap<OperandIndex, OperandLowerInfo> = HashMap::new();
        let layouts: HashMap<String, Layout> = self
            .lower_infos
            .iter()
            .flatten()
            .map(|info| (info.backend().to_string(), info.layout()))
            .collect();

        for (i, op) in self.operations.iter().enumerate() {
            let info = self.lower_infos[i]
                .as_ref()
                .ok_or_else(|| crate::internal_error!("operation {} has no backend", i))?;
            let input_info = match op {
                Operation::Permute(node) => {
                    let layout = layouts.get(&node.param.from).copied().unwrap_or(Layout::Nhwc);
                    LowerInfo::new(node.param.from.clone(), layout)
                }
                _ => info.clone(),
            };
            for input in op.inputs() {
                let shape = self.operands.at(*input)?.shape.as_4d();
                infos
                    .entry(*input)
                    .or_insert_with(|| OperandLowerInfo::new(shape))
                    .add_use_backend(&input_info);
            }
            for output in op.outputs() {
                let shape = self.operands.at(*output)?.shape.as_4d();
                infos
                    .entry(*output)
                    .or_insert_with(|| OperandLowerInfo::new(shape))
                    .add_def_backend(info);
            }
        }

        for (index, info) in infos {
            self.operands.at_mut(index)?.set_lower_info(info);
        }
        Ok(())
    }

    /// Compute a topological order of the lowered model.
    pub fn linearize(&self) -> ForgeResult<Linear> {
        self.expect_phase(Phase::Lowered)?;
        Linear::build(self)
    }
}
