//! Cross-backend copies inserted by lowering.
//!
//! A permute reads the source tensor in logical order and writes it into
//! the destination tensor, which stores it in its own layout. Reading a
//! device tensor waits for the device queue, so this is also where CPU
//! consumers synchronize with GPU producers.

use std::sync::Arc;

use super::plan::{ExecutionBuilder, Runnable};
use crate::backend::{Stage, Tensor};
use crate::error::ForgeResult;
use crate::graph::{Node, OperandIndex, OperandSet, PermuteParam};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermuteStage {
    pub input: OperandIndex,
    pub output: OperandIndex,
    pub from: String,
    pub to: String,
}

pub fn generate(node: &Node<PermuteParam>, _operands: &OperandSet) -> ForgeResult<Box<dyn Stage>> {
    Ok(Box::new(PermuteStage {
        input: node.input(0),
        output: node.output(),
        from: node.param.from.clone(),
        to: node.param.to.clone(),
    }))
}

impl Stage for PermuteStage {
    fn apply(&self, builder: &mut ExecutionBuilder<'_>) -> ForgeResult<()> {
        let source = builder.tensor(&self.from, self.input)?;
        let destination = builder.tensor(&self.to, self.output)?;
        builder.append(Box::new(PermuteRunnable {
            label: format!("permute {}->{} {}", self.from, self.to, self.output),
            source,
            destination,
        }));
        Ok(())
    }
}

#[derive(Debug)]
struct PermuteRunnable {
    label: String,
    source: Arc<dyn Tensor>,
    destination: Arc<dyn Tensor>,
}

impl Runnable for PermuteRunnable {
    fn name(&self) -> &str {
        &self.label
    }

    fn run(&self) -> ForgeResult<()> {
        let data = self.source.read_logical()?;
        self.destination.write_logical(&data)
    }
}
