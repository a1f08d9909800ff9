//! Structural checks run when a model leaves the building phase and again
//! after lowering.

use std::collections::HashMap;

use super::{Model, OperandIndex, OperationIndex};
use crate::error::{ForgeResult, GraphError};

/// Run every structural check.
pub fn verify(model: &Model) -> ForgeResult<()> {
    verify_indices(model)?;
    verify_single_writer(model)?;
    verify_defined(model)?;
    verify_dag(model)
}

/// Every referenced operand exists and node arities match their kind.
pub fn verify_indices(model: &Model) -> ForgeResult<()> {
    let operands = model.operands();
    for (_, op) in model.operations() {
        op.check_arity()?;
        for index in op
            .inputs()
            .iter()
            .chain(op.outputs())
            .copied()
            .chain(op.param_operands())
        {
            if !operands.exist(index) {
                return Err(GraphError::InvalidOperandIndex(index).into());
            }
        }
    }
    for index in model.inputs().iter().chain(model.outputs()) {
        if !operands.exist(*index) {
            return Err(GraphError::InvalidOperandIndex(*index).into());
        }
    }
    Ok(())
}

/// No operand is written by two operations, and constants and model
/// inputs are never written at all.
pub fn verify_single_writer(model: &Model) -> ForgeResult<()> {
    let mut writers: HashMap<OperandIndex, OperationIndex> = HashMap::new();
    for (op_index, op) in model.operations() {
        for output in op.outputs() {
            let operand = model.operands().at(*output)?;
            if operand.is_constant() || model.inputs().contains(output) {
                return Err(GraphError::MultipleWriters(*output).into());
            }
            if writers.insert(*output, op_index).is_some() {
                return Err(GraphError::MultipleWriters(*output).into());
            }
        }
    }
    Ok(())
}

/// Every data input is produced somewhere: by an operation, as a constant
/// or as a model input. A model output that is also a model input must be
/// read by some operation, otherwise no backend holds a tensor for it.
pub fn verify_defined(model: &Model) -> ForgeResult<()> {
    for (_, op) in model.operations() {
        for input in op.inputs() {
            let operand = model.operands().at(*input)?;
            if operand.def().is_none()
                && !operand.is_constant()
                && !model.inputs().contains(input)
            {
                return Err(GraphError::UndefinedOperand(*input).into());
            }
        }
    }
    for output in model.outputs() {
        let operand = model.operands().at(*output)?;
        if operand.def().is_none() {
            if !model.inputs().contains(output) {
                return Err(GraphError::UndefinedOperand(*output).into());
            }
            if operand.uses().is_empty() {
                return Err(GraphError::DetachedOutput(*output).into());
            }
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// The data-dependency graph between operations is acyclic.
pub fn verify_dag(model: &Model) -> ForgeResult<()> {
    let count = model.operation_count();
    let mut marks = vec![Mark::Unvisited; count];

    for start in 0..count {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        // (operation, next output-use edge to explore)
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        marks[start] = Mark::OnStack;
        while let Some((current, edge)) = stack.pop() {
            let successors = successors(model, OperationIndex(current as u32))?;
            if edge < successors.len() {
                stack.push((current, edge + 1));
                let (via, next) = successors[edge];
                match marks[next.as_usize()] {
                    Mark::OnStack => return Err(GraphError::Cycle(via).into()),
                    Mark::Unvisited => {
                        marks[next.as_usize()] = Mark::OnStack;
                        stack.push((next.as_usize(), 0));
                    }
                    Mark::Done => {}
                }
            } else {
                marks[current] = Mark::Done;
            }
        }
    }
    Ok(())
}

/// Operations consuming any output of `op`, with the operand linking them.
pub(crate) fn successors(
    model: &Model,
    op: OperationIndex,
) -> ForgeResult<Vec<(OperandIndex, OperationIndex)>> {
    let mut out = Vec::new();
    for output in model.operation(op)?.outputs() {
        for user in model.operands().at(*output)?.uses() {
            out.push((*output, *user));
        }
    }
    Ok(out)
}
