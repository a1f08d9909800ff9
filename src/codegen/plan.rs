//! Executable plans.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::backend::{Tensor, TensorBuilder, TensorBuilderStats, TensorInfo};
use crate::error::{AllocationError, ForgeResult, ResolutionError};
use crate::graph::{Model, OperandIndex};

/// One executable step bound to live tensors.
pub trait Runnable: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn run(&self) -> ForgeResult<()>;
}

/// Collects runnables while stages are applied.
pub struct ExecutionBuilder<'a> {
    tensor_builders: &'a mut [Box<dyn TensorBuilder>],
    runnables: Vec<Box<dyn Runnable>>,
}

impl<'a> ExecutionBuilder<'a> {
    pub(crate) fn new(tensor_builders: &'a mut [Box<dyn TensorBuilder>]) -> Self {
        Self {
            tensor_builders,
            runnables: Vec::new(),
        }
    }

    /// The tensor `backend` allocated for `index`.
    pub fn tensor(&self, backend: &str, index: OperandIndex) -> ForgeResult<Arc<dyn Tensor>> {
        self.tensor_builders
            .iter()
            .find(|builder| builder.backend() == backend)
            .ok_or_else(|| AllocationError::UnboundOperand {
                backend: backend.to_string(),
                index,
            })?
            .at(index)
    }

    /// A fresh builder-owned tensor on `backend` for data no operand holds.
    pub fn scratch(&mut self, backend: &str, info: TensorInfo) -> ForgeResult<Arc<dyn Tensor>> {
        self.tensor_builders
            .iter_mut()
            .find(|builder| builder.backend() == backend)
            .ok_or_else(|| ResolutionError::UnknownBackend(backend.to_string()))?
            .scratch(info)
    }

    pub fn append(&mut self, runnable: Box<dyn Runnable>) {
        tracing::trace!(runnable = runnable.name(), position = self.runnables.len(), "appended runnable");
        self.runnables.push(runnable);
    }

    pub fn len(&self) -> usize {
        self.runnables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runnables.is_empty()
    }

    pub(crate) fn into_runnables(self) -> Vec<Box<dyn Runnable>> {
        self.runnables
    }
}

/// A compiled model: lowered graph, allocated tensors and an ordered list
/// of runnables.
///
/// A plan is immutable once built. Runs are serialized by an internal lock.
pub struct Plan {
    model: Model,
    tensor_builders: Vec<Box<dyn TensorBuilder>>,
    tensors: BTreeMap<OperandIndex, Vec<Arc<dyn Tensor>>>,
    runnables: Vec<Box<dyn Runnable>>,
    run_lock: Mutex<()>,
}

impl fmt::Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan")
            .field("backends", &self.backends())
            .field("tensors", &self.tensors.len())
            .field("runnables", &self.runnables)
            .finish()
    }
}

impl Plan {
    pub(crate) fn new(
        model: Model,
        tensor_builders: Vec<Box<dyn TensorBuilder>>,
        runnables: Vec<Box<dyn Runnable>>,
    ) -> ForgeResult<Self> {
        let mut tensors: BTreeMap<OperandIndex, Vec<Arc<dyn Tensor>>> = BTreeMap::new();
        for builder in &tensor_builders {
            for index in builder.marked() {
                tensors.entry(index).or_default().push(builder.at(index)?);
            }
        }
        Ok(Self {
            model,
            tensor_builders,
            tensors,
            runnables,
            run_lock: Mutex::new(()),
        })
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Every backend tensor created for `index`, one per backend using it.
    pub fn tensors(&self, index: OperandIndex) -> &[Arc<dyn Tensor>] {
        self.tensors.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn runnables(&self) -> &[Box<dyn Runnable>] {
        &self.runnables
    }

    /// Backends with at least one tensor in this plan.
    pub fn backends(&self) -> Vec<&str> {
        self.tensor_builders.iter().map(|builder| builder.backend()).collect()
    }

    pub fn stats(&self) -> Vec<(String, TensorBuilderStats)> {
        self.tensor_builders
            .iter()
            .map(|builder| (builder.backend().to_string(), builder.stats()))
            .collect()
    }

    /// Wait for all pending device work. Every backend is drained even if
    /// one of them reports a failure; the first failure is returned.
    pub fn synchronize(&self) -> ForgeResult<()> {
        let mut first = Ok(());
        for builder in &self.tensor_builders {
            if let Err(err) = builder.synchronize() {
                if first.is_ok() {
                    first = Err(err);
                }
            }
        }
        first
    }

    pub(crate) fn lock(&self) -> ForgeResult<MutexGuard<'_, ()>> {
        Ok(self.run_lock.lock()?)
    }

    /// Run every runnable in order, then synchronize. The caller holds
    /// [`Plan::lock`].
    pub(crate) fn execute(&self) -> ForgeResult<()> {
        for runnable in &self.runnables {
            if let Err(err) = runnable.run() {
                tracing::warn!(runnable = runnable.name(), error = %err, "runnable failed");
                // drain queued work so the next run starts clean
                let _ = self.synchronize();
                return Err(err);
            }
        }
        self.synchronize()
    }
}
