//! Synchronous execution of a plan against caller buffers.

use std::fmt;
use std::sync::Arc;

use super::{Sink, Source};
use crate::codegen::Plan;
use crate::error::{ExecutionError, ForgeResult};
use crate::graph::IoIndex;

/// Progress of a session, derived from its bindings.
///
/// Binding order is free; the state only advances once a whole group is
/// bound. Rebinding any buffer after a run leaves `Ran`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Some input is unbound.
    Created,
    /// Every input is bound, some output is not.
    InputsBound,
    /// Every input and output is bound; `run` may proceed.
    OutputsBound,
    /// The last run succeeded and no buffer was rebound since.
    Ran,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::InputsBound => "inputs bound",
            SessionState::OutputsBound => "outputs bound",
            SessionState::Ran => "ran",
        };
        f.write_str(name)
    }
}

/// One binding of caller buffers to a plan.
///
/// Buffers stay borrowed for the life of the session. A session can run
/// any number of times; rebinding a buffer after a run starts a new cycle.
pub struct Execution<'a> {
    plan: Arc<Plan>,
    sources: Vec<Option<Source<'a>>>,
    sinks: Vec<Option<Sink<'a>>>,
    state: SessionState,
}

impl<'a> fmt::Debug for Execution<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution")
            .field("state", &self.state)
            .field("inputs", &self.sources.iter().filter(|s| s.is_some()).count())
            .field("outputs", &self.sinks.iter().filter(|s| s.is_some()).count())
            .finish()
    }
}

impl<'a> Execution<'a> {
    pub fn new(plan: Arc<Plan>) -> Self {
        let inputs = plan.model().inputs().len();
        let outputs = plan.model().outputs().len();
        Self {
            plan,
            sources: (0..inputs).map(|_| None).collect(),
            sinks: (0..outputs).map(|_| None).collect(),
            state: SessionState::Created,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn plan(&self) -> &Arc<Plan> {
        &self.plan
    }

    pub fn set_input(&mut self, io: IoIndex, buffer: &'a [u8]) -> ForgeResult<()> {
        let count = self.sources.len();
        let index = self.plan.model().input_at(io).map_err(|_| invalid_io(io, count))?;
        let source = Source::new(index, self.plan.model().operands().at(index)?, buffer)?;
        self.sources[io.as_usize()] = Some(source);
        self.state = self.bound_state();
        Ok(())
    }

    pub fn set_output(&mut self, io: IoIndex, buffer: &'a mut [u8]) -> ForgeResult<()> {
        let count = self.sinks.len();
        let index = self.plan.model().output_at(io).map_err(|_| invalid_io(io, count))?;
        let sink = Sink::new(index, self.plan.model().operands().at(index)?, buffer)?;
        self.sinks[io.as_usize()] = Some(sink);
        self.state = self.bound_state();
        Ok(())
    }

    /// Push inputs, run every runnable in plan order, wait for the devices
    /// and pull outputs.
    ///
    /// A failed run leaves the plan intact; the session can run again.
    pub fn run(&mut self) -> ForgeResult<()> {
        for (i, source) in self.sources.iter().enumerate() {
            if source.is_none() {
                return Err(ExecutionError::UnboundInput(IoIndex::from(i)).into());
            }
        }
        for (i, sink) in self.sinks.iter().enumerate() {
            if sink.is_none() {
                return Err(ExecutionError::UnboundOutput(IoIndex::from(i)).into());
            }
        }

        let plan = Arc::clone(&self.plan);
        let _guard = plan.lock()?;
        let _span = tracing::debug_span!("run", runnables = plan.runnables().len()).entered();

        for source in self.sources.iter().flatten() {
            for tensor in plan.tensors(source.operand()) {
                source.push(tensor.as_ref())?;
            }
        }
        plan.execute()?;
        for sink in self.sinks.iter_mut().flatten() {
            let tensor = plan
                .tensors(sink.operand())
                .first()
                .ok_or_else(|| crate::internal_error!("output {} has no tensor", sink.operand()))?;
            sink.pull(tensor.as_ref())?;
        }

        self.state = SessionState::Ran;
        tracing::debug!(runnables = plan.runnables().len(), "execution finished");
        Ok(())
    }

    fn bound_state(&self) -> SessionState {
        if self.sources.iter().any(Option::is_none) {
            SessionState::Created
        } else if self.sinks.iter().any(Option::is_none) {
            SessionState::InputsBound
        } else {
            SessionState::OutputsBound
        }
    }

    /// Bytes written to output `io` by the last run.
    pub fn output(&self, io: IoIndex) -> ForgeResult<&[u8]> {
        let count = self.sinks.len();
        self.sinks
            .get(io.as_usize())
            .ok_or_else(|| invalid_io(io, count))?
            .as_ref()
            .map(Sink::bytes)
            .ok_or_else(|| ExecutionError::UnboundOutput(io).into())
    }
}

fn invalid_io(index: IoIndex, count: usize) -> crate::error::ForgeError {
    ExecutionError::InvalidIoIndex { index, count }.into()
}
