use super::{report, Compilation, ResultCode};
use crate::exec::Execution;
use crate::graph::IoIndex;

/// Start a session on a finished compilation.
pub fn execution_create<'a>(compilation: &Compilation) -> Result<Execution<'a>, ResultCode> {
    compilation.plan().map(Execution::new).ok_or(ResultCode::BadState)
}

pub fn execution_set_input<'a>(execution: &mut Execution<'a>, index: u32, buffer: &'a [u8]) -> ResultCode {
    report("execution_set_input", execution.set_input(IoIndex(index), buffer))
}

pub fn execution_set_output<'a>(execution: &mut Execution<'a>, index: u32, buffer: &'a mut [u8]) -> ResultCode {
    report("execution_set_output", execution.set_output(IoIndex(index), buffer))
}

/// Run to completion; device work is finished when this returns.
pub fn execution_run(execution: &mut Execution<'_>) -> ResultCode {
    report("execution_run", execution.run())
}

pub fn execution_free(execution: Execution<'_>) {
    tracing::trace!(state = %execution.state(), "execution freed");
    drop(execution);
}
