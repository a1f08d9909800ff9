//! NNAPI-shaped entry points, from operand registration to a finished run.

mod common;

use std::sync::Arc;

use common::fixtures::CONV_SAME_EXPECTED;
use common::{f32_bytes, ramp, read_f32, registry, registry_with_device};
use nnforge::backend::gpu::GpuDevice;
use nnforge::codegen::BackendPolicy;
use nnforge::frontend::{
    execution_create, execution_free, execution_run, execution_set_input, execution_set_output, Compilation,
    ModelBuilder, OperandType, OperationCode, ResultCode,
};

const SAME: i32 = 1;

fn operand(builder: &mut ModelBuilder, operand_type: OperandType) -> u32 {
    builder.add_operand(&operand_type).unwrap()
}

fn int_constant(builder: &mut ModelBuilder, value: i32) -> u32 {
    let index = operand(builder, OperandType::scalar_i32());
    assert_eq!(builder.set_operand_value(index, &value.to_le_bytes()), ResultCode::NoError);
    index
}

/// SAME 3x3 convolution of a 3x3 input with a kernel of ones.
fn conv_builder() -> ModelBuilder {
    let mut builder = ModelBuilder::new();
    let input = operand(&mut builder, OperandType::tensor_f32(&[1, 3, 3, 1]));
    let kernel = operand(&mut builder, OperandType::tensor_f32(&[1, 3, 3, 1]));
    let bias = operand(&mut builder, OperandType::tensor_f32(&[1]));
    assert!(builder.set_operand_value(kernel, &f32_bytes(&[1.0; 9])).is_ok());
    assert!(builder.set_operand_value(bias, &f32_bytes(&[0.0])).is_ok());
    let padding = int_constant(&mut builder, SAME);
    let hstride = int_constant(&mut builder, 1);
    let vstride = int_constant(&mut builder, 1);
    let activation = int_constant(&mut builder, 0);
    let output = operand(&mut builder, OperandType::tensor_f32(&[1, 3, 3, 1]));

    let code = builder.add_operation(
        OperationCode::Conv2D as i32,
        &[input, kernel, bias, padding, hstride, vstride, activation],
        &[output],
    );
    assert_eq!(code, ResultCode::NoError);
    assert_eq!(builder.identify_inputs_and_outputs(&[input], &[output]), ResultCode::NoError);
    assert_eq!(builder.finish(), ResultCode::NoError);
    builder
}

#[test]
fn test_conv_end_to_end() {
    for backend in ["cpu", "gpu"] {
        let mut compilation = Compilation::new(conv_builder().into_model());
        let policy = BackendPolicy::new().with_all_ops(backend);
        assert_eq!(compilation.finish(&registry(), &policy), ResultCode::NoError);

        let input = f32_bytes(&ramp(9, 1.0));
        let mut output = vec![0u8; 36];
        let mut execution = execution_create(&compilation).unwrap();
        assert_eq!(execution_set_input(&mut execution, 0, &input), ResultCode::NoError);
        assert_eq!(execution_set_output(&mut execution, 0, &mut output), ResultCode::NoError);
        assert_eq!(execution_run(&mut execution), ResultCode::NoError);
        execution_free(execution);

        assert_eq!(read_f32(&output), CONV_SAME_EXPECTED.to_vec(), "backend {}", backend);
    }
}

#[test]
fn test_concatenation_takes_axis_last() {
    let mut builder = ModelBuilder::new();
    let lhs = operand(&mut builder, OperandType::tensor_f32(&[1, 2]));
    let rhs = operand(&mut builder, OperandType::tensor_f32(&[1, 3]));
    let axis = int_constant(&mut builder, 1);
    let output = operand(&mut builder, OperandType::tensor_f32(&[1, 5]));
    assert!(builder
        .add_operation(OperationCode::Concatenation as i32, &[lhs, rhs, axis], &[output])
        .is_ok());
    assert!(builder.identify_inputs_and_outputs(&[lhs, rhs], &[output]).is_ok());
    assert!(builder.finish().is_ok());

    let mut compilation = Compilation::new(builder.into_model());
    assert!(compilation.finish(&registry(), &BackendPolicy::new()).is_ok());

    let a = f32_bytes(&[1.0, 2.0]);
    let b = f32_bytes(&[3.0, 4.0, 5.0]);
    let mut output = vec![0u8; 20];
    let mut execution = execution_create(&compilation).unwrap();
    assert!(execution_set_input(&mut execution, 0, &a).is_ok());
    assert!(execution_set_input(&mut execution, 1, &b).is_ok());
    assert!(execution_set_output(&mut execution, 0, &mut output).is_ok());
    assert!(execution_run(&mut execution).is_ok());
    execution_free(execution);
    assert_eq!(read_f32(&output), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
}

#[test]
fn test_compilation_finishes_once() {
    let mut compilation = Compilation::new(conv_builder().into_model());
    assert_eq!(compilation.finish(&registry(), &BackendPolicy::new()), ResultCode::NoError);
    assert_eq!(compilation.finish(&registry(), &BackendPolicy::new()), ResultCode::BadState);
    assert!(compilation.plan().is_some());
}

#[test]
fn test_execution_needs_finished_compilation() {
    let compilation = Compilation::new(conv_builder().into_model());
    assert_eq!(execution_create(&compilation).unwrap_err(), ResultCode::BadState);
}

#[test]
fn test_run_without_output_is_bad_state() {
    let mut compilation = Compilation::new(conv_builder().into_model());
    assert!(compilation.finish(&registry(), &BackendPolicy::new()).is_ok());
    let input = f32_bytes(&[0.0; 9]);
    let mut execution = execution_create(&compilation).unwrap();
    assert!(execution_set_input(&mut execution, 0, &input).is_ok());
    assert_eq!(execution_run(&mut execution), ResultCode::BadState);
    assert_eq!(execution_set_input(&mut execution, 3, &input), ResultCode::BadData);
}

#[test]
fn test_out_of_memory_is_reported() {
    let device = Arc::new(GpuDevice::new(Some(8)).unwrap());
    let registry = registry_with_device(device);
    let mut compilation = Compilation::new(conv_builder().into_model());
    assert_eq!(compilation.finish(&registry, &BackendPolicy::new()), ResultCode::OutOfMemory);
    assert!(compilation.error().is_some());
    assert!(compilation.plan().is_none());
}

#[test]
fn test_invalid_graphs_are_bad_data() {
    let mut builder = ModelBuilder::new();
    let a = operand(&mut builder, OperandType::tensor_f32(&[1, 2]));
    let b = operand(&mut builder, OperandType::tensor_f32(&[1, 2]));
    assert_eq!(builder.add_operation(12345, &[a], &[b]), ResultCode::BadData);
    assert_eq!(
        builder.add_operation(OperationCode::Softmax as i32, &[a], &[b]),
        ResultCode::BadData
    );
    assert_eq!(builder.set_operand_value(a, &[0u8; 3]), ResultCode::BadData);

    let unknown = OperandType {
        code: 99,
        dimensions: vec![1],
        scale: 0.0,
        zero_point: 0,
    };
    assert_eq!(builder.add_operand(&unknown).unwrap_err(), ResultCode::BadData);
}

#[test]
fn test_finished_model_is_frozen() {
    let mut builder = conv_builder();
    assert_eq!(builder.finish(), ResultCode::BadState);
    assert_eq!(
        builder.add_operand(&OperandType::scalar_i32()).unwrap_err(),
        ResultCode::BadState
    );
}
