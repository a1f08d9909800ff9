//! End-to-end compile and run tests over the built-in backends.

mod common;

use std::sync::Arc;

use common::fixtures::{self, CONV_SAME_EXPECTED, SAME, VALID};
use common::{assert_close, f32_bytes, ramp, read_f32, registry, registry_with_device, run_once, run_outputs};
use nnforge::backend::gpu::GpuDevice;
use nnforge::codegen::{compile, BackendPolicy, Plan};
use nnforge::exec::{Execution, SessionState};
use nnforge::graph::{IoIndex, Model, OpKind, Operation};
use nnforge::error::{ExecutionError, GraphError};
use nnforge::{ForgeError, ForgeResult};

fn plan_on(model: Model, backend: &str) -> Arc<Plan> {
    let policy = BackendPolicy::new().with_all_ops(backend);
    Arc::new(compile(model, &registry(), &policy).unwrap())
}

fn permute_count(plan: &Plan) -> usize {
    plan.model()
        .operations()
        .filter(|(_, op)| op.kind() == OpKind::Permute)
        .count()
}

#[test]
fn test_conv_valid_on_both_backends() {
    for backend in ["cpu", "gpu"] {
        let plan = plan_on(fixtures::conv_model(VALID), backend);
        let output = run_once(&plan, &[ramp(9, 1.0)]).unwrap();
        assert_close(&output, &[45.0], 1e-5);
    }
}

#[test]
fn test_conv_same_on_both_backends() {
    for backend in ["cpu", "gpu"] {
        let plan = plan_on(fixtures::conv_model(SAME), backend);
        let output = run_once(&plan, &[ramp(9, 1.0)]).unwrap();
        assert_close(&output, &CONV_SAME_EXPECTED, 1e-5);
    }
}

#[test]
fn test_concat_along_channels() {
    let lhs = ramp(12, 0.0);
    let rhs = ramp(12, 100.0);
    let expected = fixtures::concat_expected(&lhs, &rhs);
    assert_eq!(&expected[..4], &[0.0, 1.0, 100.0, 101.0]);

    for backend in ["cpu", "gpu"] {
        let plan = plan_on(fixtures::concat_model(), backend);
        let output = run_once(&plan, &[lhs.clone(), rhs.clone()]).unwrap();
        assert_eq!(output, expected, "backend {}", backend);
    }
}

#[test]
fn test_nop_round_trip() {
    for dims in [vec![1, 5], vec![1, 2, 2, 3]] {
        for backend in ["cpu", "gpu"] {
            let len = dims.iter().product();
            let plan = plan_on(fixtures::nop_model(&dims), backend);
            let input = ramp(len, -2.5);
            assert_eq!(run_once(&plan, &[input.clone()]).unwrap(), input);
        }
    }
}

#[test]
fn test_int32_values_pass_through_unrounded() -> ForgeResult<()> {
    let values = [16_777_217, i32::MAX, -16_777_219, i32::MIN];
    let input: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    let placements = [
        BackendPolicy::new().with_all_ops("cpu"),
        BackendPolicy::new().with_all_ops("gpu"),
        BackendPolicy::new().with_op(OpKind::Reshape, "cpu"),
    ];
    for policy in placements {
        let plan = Arc::new(compile(fixtures::int_passthrough_model(), &registry(), &policy)?);
        let mut output = vec![0u8; 16];
        let mut execution = Execution::new(plan);
        execution.set_input(IoIndex(0), &input)?;
        execution.set_output(IoIndex(0), &mut output)?;
        execution.run()?;
        let actual: Vec<i32> = execution
            .output(IoIndex(0))?
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(actual, values, "{:?}", policy);
    }
    Ok(())
}

#[test]
fn test_model_input_as_output() {
    let err = compile(fixtures::two_output_model(false), &registry(), &BackendPolicy::new()).unwrap_err();
    assert!(matches!(err, ForgeError::Graph(GraphError::DetachedOutput(_))));

    for backend in ["cpu", "gpu"] {
        let plan = plan_on(fixtures::two_output_model(true), backend);
        let a = ramp(4, 1.0);
        let outputs = run_outputs(&plan, &[a.clone(), vec![0.0; 4]]).unwrap();
        assert_eq!(outputs, vec![a.clone(), a], "backend {}", backend);
    }
}

#[test]
fn test_fully_connected_flattens_in_logical_order() {
    for backend in ["cpu", "gpu"] {
        let plan = plan_on(fixtures::fc_on_feature_model(), backend);
        let output = run_once(&plan, &[vec![1.0, 2.0, 3.0, 4.0]]).unwrap();
        assert_close(&output, &[1.5, 3.5], 1e-6);
    }
}

#[test]
fn test_mixed_backends_insert_one_permute() {
    let policy = BackendPolicy::new().with_op(OpKind::Conv2D, "cpu");
    let plan = Arc::new(compile(fixtures::residual_model(), &registry(), &policy).unwrap());

    assert_eq!(permute_count(&plan), 1);
    let mut backends = plan.backends();
    backends.sort_unstable();
    assert_eq!(backends, vec!["cpu", "gpu"]);
    // the model input feeds both backends
    let input = plan.model().inputs()[0];
    assert_eq!(plan.tensors(input).len(), 2);

    let x = ramp(8, -3.0);
    let expected: Vec<f32> = x.iter().map(|v| 2.0 * v + 0.5).collect();
    assert_close(&run_once(&plan, &[x]).unwrap(), &expected, 1e-5);
}

#[test]
fn test_single_backend_has_no_permute() {
    for backend in ["cpu", "gpu"] {
        let plan = plan_on(fixtures::residual_model(), backend);
        assert_eq!(permute_count(&plan), 0);
        assert_eq!(plan.backends(), vec![backend]);
    }
}

#[test]
fn test_classifier_parity_across_placements() {
    let input = ramp(18, -1.0).iter().map(|v| v * 0.3).collect::<Vec<_>>();
    let reference = run_once(&plan_on(fixtures::classifier_model(), "cpu"), &[input.clone()]).unwrap();
    assert_close(&[reference.iter().sum::<f32>()], &[1.0], 1e-5);

    let gpu = run_once(&plan_on(fixtures::classifier_model(), "gpu"), &[input.clone()]).unwrap();
    assert_close(&gpu, &reference, 1e-5);

    let placements = [
        BackendPolicy::new().with_op(OpKind::MaxPool2D, "cpu"),
        BackendPolicy::new()
            .with_default_backend("cpu")
            .with_op(OpKind::Reshape, "gpu")
            .with_op(OpKind::Softmax, "gpu"),
        BackendPolicy::new().with_op(OpKind::Conv2D, "cpu").with_op(OpKind::FullyConnected, "cpu"),
    ];
    for policy in placements {
        let plan = Arc::new(compile(fixtures::classifier_model(), &registry(), &policy).unwrap());
        assert!(permute_count(&plan) > 0, "{:?}", policy);
        let output = run_once(&plan, &[input.clone()]).unwrap();
        assert_close(&output, &reference, 1e-5);
    }
}

#[test]
fn test_repeated_runs_are_deterministic() {
    let policy = BackendPolicy::new().with_op(OpKind::Softmax, "cpu");
    let plan = Arc::new(compile(fixtures::classifier_model(), &registry(), &policy).unwrap());
    let input = ramp(18, 0.5);
    let first = run_once(&plan, &[input.clone()]).unwrap();
    for _ in 0..5 {
        assert_eq!(run_once(&plan, &[input.clone()]).unwrap(), first);
    }
}

#[test]
fn test_recompiled_plans_give_identical_outputs() {
    let input = ramp(18, -4.0).iter().map(|v| v * 0.2).collect::<Vec<_>>();
    let placements = [
        BackendPolicy::new().with_all_ops("cpu"),
        BackendPolicy::new().with_all_ops("gpu"),
        BackendPolicy::new().with_op(OpKind::Conv2D, "cpu").with_op(OpKind::Softmax, "cpu"),
    ];
    for policy in placements {
        let outputs: Vec<Vec<f32>> = (0..2)
            .map(|_| {
                let plan = Arc::new(compile(fixtures::classifier_model(), &registry(), &policy).unwrap());
                run_once(&plan, &[input.clone()]).unwrap()
            })
            .collect();
        assert_eq!(outputs[0], outputs[1], "{:?}", policy);
    }
}

#[test]
fn test_session_reruns_with_new_input() -> ForgeResult<()> {
    let plan = plan_on(fixtures::conv_model(VALID), "gpu");
    let ones = f32_bytes(&[1.0; 9]);
    let twos = f32_bytes(&[2.0; 9]);
    let mut output = vec![0u8; 4];

    let mut execution = Execution::new(plan);
    assert_eq!(execution.state(), SessionState::Created);
    execution.set_input(IoIndex(0), &ones)?;
    execution.set_output(IoIndex(0), &mut output)?;
    execution.run()?;
    assert_eq!(execution.state(), SessionState::Ran);
    assert_eq!(read_f32(execution.output(IoIndex(0))?), vec![9.0]);

    execution.set_input(IoIndex(0), &twos)?;
    assert_eq!(execution.state(), SessionState::OutputsBound);
    execution.run()?;
    assert_eq!(read_f32(execution.output(IoIndex(0))?), vec![18.0]);
    Ok(())
}

#[test]
fn test_session_state_follows_bindings_in_any_order() -> ForgeResult<()> {
    let plan = plan_on(fixtures::concat_model(), "cpu");
    let lhs = f32_bytes(&[1.0; 12]);
    let rhs = f32_bytes(&[2.0; 12]);
    let mut output = vec![0u8; 24 * 4];
    let mut execution = Execution::new(plan);

    execution.set_output(IoIndex(0), &mut output)?;
    assert_eq!(execution.state(), SessionState::Created);
    execution.set_input(IoIndex(1), &rhs)?;
    assert_eq!(execution.state(), SessionState::Created);
    execution.set_input(IoIndex(0), &lhs)?;
    assert_eq!(execution.state(), SessionState::OutputsBound);
    execution.run()?;
    assert_eq!(execution.state(), SessionState::Ran);
    Ok(())
}

#[test]
fn test_run_requires_bound_buffers() {
    let plan = plan_on(fixtures::nop_model(&[1, 4]), "cpu");
    let input = f32_bytes(&[0.0; 4]);
    let mut execution = Execution::new(plan);

    let err = execution.run().unwrap_err();
    assert!(matches!(
        err,
        ForgeError::Execution(ExecutionError::UnboundInput(IoIndex(0)))
    ));
    execution.set_input(IoIndex(0), &input).unwrap();
    assert_eq!(execution.state(), SessionState::InputsBound);
    let err = execution.run().unwrap_err();
    assert!(matches!(
        err,
        ForgeError::Execution(ExecutionError::UnboundOutput(IoIndex(0)))
    ));
}

#[test]
fn test_short_input_buffer_rejected() {
    let plan = plan_on(fixtures::nop_model(&[1, 4]), "cpu");
    let input = f32_bytes(&[0.0; 3]);
    let mut execution = Execution::new(plan);
    let err = execution.set_input(IoIndex(0), &input).unwrap_err();
    assert!(matches!(
        err,
        ForgeError::Execution(ExecutionError::BufferTooSmall {
            required: 16,
            actual: 12,
            ..
        })
    ));
    let err = execution.set_input(IoIndex(1), &input).unwrap_err();
    assert!(matches!(
        err,
        ForgeError::Execution(ExecutionError::InvalidIoIndex { count: 1, .. })
    ));
}

#[test]
fn test_tensor_builders_prepare_and_allocate_once() {
    let policy = BackendPolicy::new().with_op(OpKind::Conv2D, "cpu");
    let plan = compile(fixtures::residual_model(), &registry(), &policy).unwrap();

    let stats = plan.stats();
    assert_eq!(stats.len(), 2);
    for (backend, stats) in stats {
        assert_eq!(stats.prepare_calls, 1, "{}", backend);
        assert_eq!(stats.allocate_calls, 1, "{}", backend);
        assert_eq!(stats.tensors_allocated, stats.marked, "{}", backend);
        assert!(stats.mark_calls >= stats.marked, "{}", backend);
    }
}

#[test]
fn test_flatten_scratch_is_counted_in_builder_stats() {
    let device = Arc::new(GpuDevice::new(None).unwrap());
    let registry = registry_with_device(Arc::clone(&device));
    let plan = compile(fixtures::fc_on_feature_model(), &registry, &BackendPolicy::new()).unwrap();

    let (backend, stats) = plan.stats().swap_remove(0);
    assert_eq!(backend, "gpu");
    assert_eq!(stats.tensors_allocated, stats.marked);
    assert_eq!(stats.scratch_allocated, 1);
    // input 16 + weights 32 + bias 8 + output 8 + flattened input 16
    assert_eq!(stats.bytes_allocated, 80);
    assert_eq!(device.allocated_bytes(), stats.bytes_allocated);
    drop(plan);
    assert_eq!(device.allocated_bytes(), 0);
}

#[test]
fn test_tensors_are_laid_out_by_backend() {
    let policy = BackendPolicy::new().with_op(OpKind::Conv2D, "cpu");
    let plan = compile(fixtures::residual_model(), &registry(), &policy).unwrap();
    let input = plan.model().inputs()[0];
    for tensor in plan.tensors(input) {
        let expected = if tensor.backend() == "gpu" {
            nnforge::graph::Layout::Nchw
        } else {
            nnforge::graph::Layout::Nhwc
        };
        assert_eq!(tensor.layout(), expected);
    }
}

#[test]
fn test_dropping_plan_releases_device_memory() {
    let device = Arc::new(GpuDevice::new(None).unwrap());
    let registry = registry_with_device(Arc::clone(&device));
    let plan = compile(fixtures::classifier_model(), &registry, &BackendPolicy::new()).unwrap();
    assert!(device.allocated_bytes() > 0);
    drop(plan);
    assert_eq!(device.allocated_bytes(), 0);
}

#[test]
fn test_compile_rejects_bad_shapes() {
    let mut model = Model::new();
    let input = fixtures::tensor(&mut model, &[1, 2, 3, 2]);
    let other = fixtures::tensor(&mut model, &[1, 3, 3, 2]);
    let output = fixtures::tensor(&mut model, &[1, 2, 3, 4]);
    let axis = fixtures::scalar_i32(&mut model, 3);
    model
        .add_operation(Operation::Concat(nnforge::graph::Node::new(
            vec![input, other],
            vec![output],
            nnforge::graph::ConcatParam { axis },
        )))
        .unwrap();
    model.add_input(input).unwrap();
    model.add_input(other).unwrap();
    model.add_output(output).unwrap();

    let err = compile(model, &registry(), &BackendPolicy::new()).unwrap_err();
    assert!(matches!(err, ForgeError::Graph(_)), "{:?}", err);
}
