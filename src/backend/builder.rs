//! Phase bookkeeping shared by the tensor builders.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::{ShapeConstraints, Tensor, TensorBuilderStats, TensorInfo};
use crate::error::{AllocationError, ForgeResult};
use crate::graph::OperandIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuilderPhase {
    Marking,
    Prepared,
    Allocated,
}

/// Marked operands, created tensors and counters of one builder.
#[derive(Debug)]
pub(crate) struct BuilderState<T> {
    backend: String,
    phase: BuilderPhase,
    marked: BTreeSet<OperandIndex>,
    tensors: BTreeMap<OperandIndex, Arc<T>>,
    scratch: Vec<Arc<T>>,
    stats: TensorBuilderStats,
}

impl<T: Tensor + 'static> BuilderState<T> {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            phase: BuilderPhase::Marking,
            marked: BTreeSet::new(),
            tensors: BTreeMap::new(),
            scratch: Vec::new(),
            stats: TensorBuilderStats::default(),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn mark(&mut self, index: OperandIndex) -> ForgeResult<()> {
        if self.phase != BuilderPhase::Marking {
            return Err(AllocationError::AlreadyPrepared(self.backend.clone()).into());
        }
        self.stats.mark_calls += 1;
        self.marked.insert(index);
        self.stats.marked = self.marked.len();
        Ok(())
    }

    /// Create one tensor per marked operand from its constraint.
    pub fn prepare<F>(&mut self, constraints: &ShapeConstraints, mut create: F) -> ForgeResult<()>
    where
        F: FnMut(OperandIndex, &TensorInfo) -> ForgeResult<T>,
    {
        if self.phase != BuilderPhase::Marking {
            return Err(AllocationError::AlreadyPrepared(self.backend.clone()).into());
        }
        let mut tensors = BTreeMap::new();
        for index in &self.marked {
            let info = constraints
                .get(index)
                .ok_or(AllocationError::MissingShapeConstraint(*index))?;
            tensors.insert(*index, Arc::new(create(*index, info)?));
        }
        self.tensors = tensors;
        self.phase = BuilderPhase::Prepared;
        self.stats.prepare_calls += 1;
        tracing::trace!(backend = %self.backend, tensors = self.tensors.len(), "prepared tensors");
        Ok(())
    }

    /// Reserve memory for every prepared tensor. `reserve` returns the
    /// number of bytes it took.
    pub fn allocate<F>(&mut self, mut reserve: F) -> ForgeResult<()>
    where
        F: FnMut(&T) -> ForgeResult<usize>,
    {
        match self.phase {
            BuilderPhase::Marking => {
                return Err(AllocationError::NotPrepared(self.backend.clone()).into())
            }
            BuilderPhase::Allocated => {
                return Err(AllocationError::AlreadyAllocated(self.backend.clone()).into())
            }
            BuilderPhase::Prepared => {}
        }
        self.stats.allocate_calls += 1;
        for tensor in self.tensors.values() {
            self.stats.bytes_allocated += reserve(tensor)?;
            self.stats.tensors_allocated += 1;
        }
        self.phase = BuilderPhase::Allocated;
        tracing::debug!(backend = %self.backend, stats = %self.stats, "allocated tensors");
        Ok(())
    }

    /// Reserve `tensor` as builder-owned scratch once the marked tensors
    /// are allocated.
    pub fn scratch<F>(&mut self, tensor: T, reserve: F) -> ForgeResult<Arc<T>>
    where
        F: FnOnce(&T) -> ForgeResult<usize>,
    {
        if self.phase != BuilderPhase::Allocated {
            return Err(AllocationError::NotAllocated(self.backend.clone()).into());
        }
        let bytes = reserve(&tensor)?;
        self.stats.bytes_allocated += bytes;
        self.stats.scratch_allocated += 1;
        let tensor = Arc::new(tensor);
        self.scratch.push(Arc::clone(&tensor));
        tracing::trace!(backend = %self.backend, bytes, "allocated scratch tensor");
        Ok(tensor)
    }

    pub fn typed(&self, index: OperandIndex) -> ForgeResult<Arc<T>> {
        self.tensors.get(&index).cloned().ok_or_else(|| {
            AllocationError::UnboundOperand {
                backend: self.backend.clone(),
                index,
            }
            .into()
        })
    }

    pub fn at(&self, index: OperandIndex) -> ForgeResult<Arc<dyn Tensor>> {
        Ok(self.typed(index)? as Arc<dyn Tensor>)
    }

    pub fn marked(&self) -> Vec<OperandIndex> {
        self.marked.iter().copied().collect()
    }

    pub fn stats(&self) -> TensorBuilderStats {
        self.stats
    }
}
