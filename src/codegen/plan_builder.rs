//! Accumulates planner output and turns it into a [`Plan`].

use std::collections::BTreeMap;

use super::plan::{ExecutionBuilder, Plan};
use crate::backend::{Initializer, ShapeConstraints, Stage, TensorBuilder, TensorInfo};
use crate::error::{AllocationError, ForgeResult};
use crate::graph::{Model, OperandIndex};

#[derive(Debug, Default)]
pub struct PlanBuilder {
    constraints: ShapeConstraints,
    initializers: BTreeMap<OperandIndex, Box<dyn Initializer>>,
    stages: Vec<Box<dyn Stage>>,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the tensor shape of `index`. Re-recording the same shape is
    /// allowed; a different shape is an error.
    pub fn add_shape_constraint(&mut self, index: OperandIndex, info: TensorInfo) -> ForgeResult<()> {
        if let Some(existing) = self.constraints.get(&index) {
            if existing.shape != info.shape {
                return Err(AllocationError::InconsistentShapeConstraint {
                    index,
                    existing: existing.shape.dims().to_vec(),
                    requested: info.shape.dims().to_vec(),
                }
                .into());
            }
        }
        self.constraints.insert(index, info);
        Ok(())
    }

    pub fn add_initializer(&mut self, index: OperandIndex, initializer: Box<dyn Initializer>) {
        if self.initializers.insert(index, initializer).is_some() {
            tracing::trace!(operand = %index, "replaced initializer");
        }
    }

    pub fn add_stage(&mut self, stage: Box<dyn Stage>) {
        self.stages.push(stage);
    }

    pub fn constraints(&self) -> &ShapeConstraints {
        &self.constraints
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn initializer_count(&self) -> usize {
        self.initializers.len()
    }

    /// Prepare and allocate every tensor builder, bind stages to tensors,
    /// then fill constants into every tensor created for them.
    pub fn finalize(self, model: Model, mut tensor_builders: Vec<Box<dyn TensorBuilder>>) -> ForgeResult<Plan> {
        for builder in tensor_builders.iter_mut() {
            builder.prepare(&self.constraints)?;
        }
        for builder in tensor_builders.iter_mut() {
            builder.allocate()?;
        }

        let mut execution = ExecutionBuilder::new(&mut tensor_builders);
        for stage in &self.stages {
            stage.apply(&mut execution)?;
        }
        let runnables = execution.into_runnables();

        let plan = Plan::new(model, tensor_builders, runnables)?;
        for (index, initializer) in &self.initializers {
            for tensor in plan.tensors(*index) {
                initializer.initialize(tensor.as_ref())?;
            }
        }
        plan.synchronize()?;

        tracing::info!(
            stages = self.stages.len(),
            runnables = plan.runnables().len(),
            constants = self.initializers.len(),
            backends = ?plan.backends(),
            "plan finalized"
        );
        Ok(plan)
    }
}
