//! Topological order of a lowered model.

use super::verifier::successors;
use super::{LowerInfo, Model, Operation, OperandIndex, OperationIndex, PermuteParam};
use crate::error::ForgeResult;

/// Operations of a lowered model in a valid execution order.
///
/// Built by a post-order walk along def-use edges, then reversed, so every
/// producer precedes all of its consumers.
#[derive(Debug, Clone)]
pub struct Linear {
    order: Vec<OperationIndex>,
}

impl Linear {
    pub(crate) fn build(model: &Model) -> ForgeResult<Self> {
        let count = model.operation_count();
        let mut visited = vec![false; count];
        let mut post_order = Vec::with_capacity(count);

        for start in 0..count {
            if visited[start] {
                continue;
            }
            visited[start] = true;
            let mut stack: Vec<(OperationIndex, usize)> = vec![(OperationIndex(start as u32), 0)];
            while let Some((current, edge)) = stack.pop() {
                let next = successors(model, current)?;
                if edge < next.len() {
                    stack.push((current, edge + 1));
                    let (_, user) = next[edge];
                    if !visited[user.as_usize()] {
                        visited[user.as_usize()] = true;
                        stack.push((user, 0));
                    }
                } else {
                    post_order.push(current);
                }
            }
        }

        post_order.reverse();
        Ok(Self { order: post_order })
    }

    pub fn order(&self) -> &[OperationIndex] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Walk operations in order together with their backend assignment.
    pub fn iter<'m>(
        &'m self,
        model: &'m Model,
    ) -> impl Iterator<Item = ForgeResult<(OperationIndex, &'m Operation, &'m LowerInfo)>> + 'm {
        self.order.iter().map(move |index| {
            let op = model.operation(*index)?;
            let info = model.lower_info(*index)?;
            Ok((*index, op, info))
        })
    }

    /// Report every (backend, operand) pair that needs a backend tensor.
    ///
    /// Inputs and outputs of a node belong to the node's backend, except
    /// for permutes whose input lives on the source backend.
    pub fn for_each_tensor<F>(&self, model: &Model, mut mark: F) -> ForgeResult<()>
    where
        F: FnMut(&str, OperandIndex) -> ForgeResult<()>,
    {
        for entry in self.iter(model) {
            let (_, op, info) = entry?;
            match op {
                Operation::Permute(node) => {
                    let PermuteParam { from, to } = &node.param;
                    for input in &node.inputs {
                        mark(from, *input)?;
                    }
                    for output in &node.outputs {
                        mark(to, *output)?;
                    }
                }
                _ => {
                    for index in op.inputs().iter().chain(op.outputs()) {
                        mark(info.backend(), *index)?;
                    }
                }
            }
        }
        Ok(())
    }
}
