//! Shared helpers for the integration tests.
//!
//! Graph fixtures live in [`fixtures`]. The helpers here build registries,
//! convert between `f32` slices and caller byte buffers, and run a plan
//! once against a set of inputs.
//!
//! # Usage
//!
//! ```ignore
//! mod common;
//! use common::{fixtures, registry, run_once};
//!
//! let plan = Arc::new(compile(fixtures::nop_model(), &registry(), &BackendPolicy::new())?);
//! let output = run_once(&plan, &[vec![1.0, 2.0, 3.0, 4.0]])?;
//! ```

#![allow(dead_code)]

pub mod fixtures;

use std::sync::Arc;

use nnforge::backend::cpu::CpuBackend;
use nnforge::backend::gpu::{GpuBackend, GpuDevice};
use nnforge::backend::BackendRegistry;
use nnforge::codegen::Plan;
use nnforge::exec::Execution;
use nnforge::graph::IoIndex;
use nnforge::{ForgeResult, RuntimeConfig};
pub use serial_test::serial;

/// Registry with the default GPU and CPU backends.
pub fn registry() -> BackendRegistry {
    BackendRegistry::with_default_backends(&RuntimeConfig::default()).expect("default backends")
}

/// Registry whose GPU backend runs on `device`, so a test can inspect it or
/// inject faults.
pub fn registry_with_device(device: Arc<GpuDevice>) -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry.add(GpuBackend::with_device(device));
    registry.add(CpuBackend::create());
    registry
}

pub fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn read_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// `start, start + 1, ...` with `len` elements.
pub fn ramp(len: usize, start: f32) -> Vec<f32> {
    (0..len).map(|i| start + i as f32).collect()
}

/// Bind `inputs` in order, run once and return every output.
pub fn run_outputs(plan: &Arc<Plan>, inputs: &[Vec<f32>]) -> ForgeResult<Vec<Vec<f32>>> {
    let model = plan.model();
    let input_bytes: Vec<Vec<u8>> = inputs.iter().map(|values| f32_bytes(values)).collect();
    let mut outputs = model
        .outputs()
        .iter()
        .map(|index| -> ForgeResult<Vec<u8>> {
            Ok(vec![0u8; model.operands().shape(*index)?.num_elements() * 4])
        })
        .collect::<ForgeResult<Vec<_>>>()?;

    {
        let mut execution = Execution::new(Arc::clone(plan));
        for (i, bytes) in input_bytes.iter().enumerate() {
            execution.set_input(IoIndex::from(i), bytes)?;
        }
        for (i, buffer) in outputs.iter_mut().enumerate() {
            execution.set_output(IoIndex::from(i), buffer)?;
        }
        execution.run()?;
    }
    Ok(outputs.iter().map(|bytes| read_f32(bytes)).collect())
}

/// Like [`run_outputs`] for single-output models.
pub fn run_once(plan: &Arc<Plan>, inputs: &[Vec<f32>]) -> ForgeResult<Vec<f32>> {
    Ok(run_outputs(plan, inputs)?.swap_remove(0))
}

pub fn assert_close(actual: &[f32], expected: &[f32], tolerance: f32) {
    assert_eq!(actual.len(), expected.len(), "length mismatch: {:?} vs {:?}", actual, expected);
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= tolerance,
            "element {}: got {}, expected {} (actual {:?})",
            i,
            a,
            e,
            actual
        );
    }
}
