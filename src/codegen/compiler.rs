//! Model to plan pipeline: resolve, lower, linearize, mark, plan, finalize.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use super::plan::Plan;
use super::plan_builder::PlanBuilder;
use super::planner::Planner;
use super::resolver::{BackendPolicy, BackendResolver};
use crate::backend::{BackendContext, BackendRegistry, TensorBuilder};
use crate::error::ForgeResult;
use crate::graph::{Model, Phase};

/// Compile `model` against the backends in `registry`.
///
/// A model still being built is finished first. Any failure aborts the
/// whole compilation.
pub fn compile(mut model: Model, registry: &BackendRegistry, policy: &BackendPolicy) -> ForgeResult<Plan> {
    let _span = tracing::info_span!("compile", operations = model.operation_count()).entered();
    if model.phase() == Phase::Building {
        model.finish_building()?;
    }

    let resolver = BackendResolver::new(registry, policy.clone());
    let assignments = resolver.resolve(&model)?;
    model.lower(assignments)?;
    let linear = model.linearize()?;

    let mut contexts: BTreeMap<String, BackendContext> = BTreeMap::new();
    linear.for_each_tensor(&model, |backend, index| {
        let context = match contexts.entry(backend.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(registry.lookup(backend)?.new_context()?),
        };
        context.tensor_builder.mark(index)
    })?;

    let mut builder = PlanBuilder::new();
    let mut planner = Planner::new(model.operands(), &contexts, &mut builder);
    for entry in linear.iter(&model) {
        let (_, operation, info) = entry?;
        planner.visit(operation, info)?;
    }
    drop(planner);

    tracing::debug!(
        operations = linear.len(),
        stages = builder.stage_count(),
        backends = ?contexts.keys().collect::<Vec<_>>(),
        "planned model"
    );
    let tensor_builders: Vec<Box<dyn TensorBuilder>> =
        contexts.into_values().map(|context| context.tensor_builder).collect();
    builder.finalize(model, tensor_builders)
}
