//! Small graphs with hand-checked results.

use nnforge::graph::{
    AddParam, ConcatParam, ConstData, Conv2DParam, DataType, FullyConnectedParam, Model, Node, Operation,
    OperandIndex, Pool2DParam, ReshapeParam, Shape, SoftmaxParam, TypeInfo,
};

pub const SAME: i32 = 1;
pub const VALID: i32 = 2;

pub fn tensor(model: &mut Model, dims: &[usize]) -> OperandIndex {
    model
        .add_operand(Shape::new(dims.to_vec()), TypeInfo::new(DataType::Float32))
        .unwrap()
}

pub fn constant(model: &mut Model, dims: &[usize], values: &[f32]) -> OperandIndex {
    let index = tensor(model, dims);
    model.set_operand_value(index, ConstData::from_f32(values)).unwrap();
    index
}

pub fn scalar_i32(model: &mut Model, value: i32) -> OperandIndex {
    let index = model
        .add_operand(Shape::scalar(), TypeInfo::new(DataType::ScalarInt32))
        .unwrap();
    model.set_operand_value(index, ConstData::from_i32(&[value])).unwrap();
    index
}

pub fn scalar_f32(model: &mut Model, value: f32) -> OperandIndex {
    let index = model
        .add_operand(Shape::scalar(), TypeInfo::new(DataType::ScalarFloat32))
        .unwrap();
    model.set_operand_value(index, ConstData::from_f32(&[value])).unwrap();
    index
}

fn conv_param(model: &mut Model, padding: i32, activation: i32) -> Conv2DParam {
    Conv2DParam {
        padding: scalar_i32(model, padding),
        hstride: scalar_i32(model, 1),
        vstride: scalar_i32(model, 1),
        activation: scalar_i32(model, activation),
    }
}

/// 3x3 single channel input convolved with a 3x3 kernel of ones.
///
/// With input `1..=9`, VALID gives `[45]` and SAME gives the nine
/// neighbourhood sums.
pub fn conv_model(padding: i32) -> Model {
    let mut model = Model::new();
    let input = tensor(&mut model, &[1, 3, 3, 1]);
    let kernel = constant(&mut model, &[1, 3, 3, 1], &[1.0; 9]);
    let bias = constant(&mut model, &[1], &[0.0]);
    let out_dims: &[usize] = if padding == VALID { &[1, 1, 1, 1] } else { &[1, 3, 3, 1] };
    let output = tensor(&mut model, out_dims);
    let param = conv_param(&mut model, padding, 0);
    model
        .add_operation(Operation::Conv2D(Node::new(vec![input, kernel, bias], vec![output], param)))
        .unwrap();
    model.add_input(input).unwrap();
    model.add_output(output).unwrap();
    model
}

pub const CONV_SAME_EXPECTED: [f32; 9] = [12.0, 21.0, 16.0, 27.0, 45.0, 33.0, 24.0, 39.0, 28.0];

/// Two `[1, 2, 3, 2]` inputs joined along the channel axis.
pub fn concat_model() -> Model {
    let mut model = Model::new();
    let lhs = tensor(&mut model, &[1, 2, 3, 2]);
    let rhs = tensor(&mut model, &[1, 2, 3, 2]);
    let output = tensor(&mut model, &[1, 2, 3, 4]);
    let axis = scalar_i32(&mut model, 3);
    model
        .add_operation(Operation::Concat(Node::new(vec![lhs, rhs], vec![output], ConcatParam { axis })))
        .unwrap();
    model.add_input(lhs).unwrap();
    model.add_input(rhs).unwrap();
    model.add_output(output).unwrap();
    model
}

/// Channel concat of two NHWC inputs, computed directly.
pub fn concat_expected(lhs: &[f32], rhs: &[f32]) -> Vec<f32> {
    lhs.chunks(2)
        .zip(rhs.chunks(2))
        .flat_map(|(l, r)| l.iter().chain(r).copied().collect::<Vec<_>>())
        .collect()
}

pub fn nop_model(dims: &[usize]) -> Model {
    let mut model = Model::new();
    let input = tensor(&mut model, dims);
    let output = tensor(&mut model, dims);
    model
        .add_operation(Operation::Nop(Node::new(vec![input], vec![output], ())))
        .unwrap();
    model.add_input(input).unwrap();
    model.add_output(output).unwrap();
    model
}

/// `x + conv1x1(x)` where the 1x1 convolution is the identity plus a bias
/// of 0.5, so the result is `2x + 0.5`. The input feeds two nodes.
pub fn residual_model() -> Model {
    let mut model = Model::new();
    let input = tensor(&mut model, &[1, 2, 2, 2]);
    let kernel = constant(&mut model, &[2, 1, 1, 2], &[1.0, 0.0, 0.0, 1.0]);
    let bias = constant(&mut model, &[2], &[0.5, 0.5]);
    let conv_out = tensor(&mut model, &[1, 2, 2, 2]);
    let param = conv_param(&mut model, VALID, 0);
    model
        .add_operation(Operation::Conv2D(Node::new(vec![input, kernel, bias], vec![conv_out], param)))
        .unwrap();

    let output = tensor(&mut model, &[1, 2, 2, 2]);
    let activation = scalar_i32(&mut model, 0);
    model
        .add_operation(Operation::Add(Node::new(vec![input, conv_out], vec![output], AddParam { activation })))
        .unwrap();
    model.add_input(input).unwrap();
    model.add_output(output).unwrap();
    model
}

/// Fully connected layer reading a `[1, 1, 2, 2]` feature map, so the
/// flattening order of the input matters.
///
/// With input `1, 2, 3, 4` the result is `[1.5, 3.5]`.
pub fn fc_on_feature_model() -> Model {
    let mut model = Model::new();
    let input = tensor(&mut model, &[1, 1, 2, 2]);
    let weights = constant(
        &mut model,
        &[2, 4],
        &[1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
    );
    let bias = constant(&mut model, &[2], &[0.5, -0.5]);
    let output = tensor(&mut model, &[1, 2]);
    let activation = scalar_i32(&mut model, 0);
    model
        .add_operation(Operation::FullyConnected(Node::new(
            vec![input, weights, bias],
            vec![output],
            FullyConnectedParam { activation },
        )))
        .unwrap();
    model.add_input(input).unwrap();
    model.add_output(output).unwrap();
    model
}

/// conv (SAME, relu) -> max pool 2x2 -> reshape -> fully connected -> softmax.
pub fn classifier_model() -> Model {
    let mut model = Model::new();
    let input = tensor(&mut model, &[1, 3, 3, 2]);
    let kernel = constant(
        &mut model,
        &[2, 3, 3, 2],
        &(0..36).map(|i| ((i % 7) as f32 - 3.0) * 0.25).collect::<Vec<_>>(),
    );
    let bias = constant(&mut model, &[2], &[0.1, -0.2]);
    let conv_out = tensor(&mut model, &[1, 3, 3, 2]);
    let param = conv_param(&mut model, SAME, 1);
    model
        .add_operation(Operation::Conv2D(Node::new(vec![input, kernel, bias], vec![conv_out], param)))
        .unwrap();

    let pooled = tensor(&mut model, &[1, 2, 2, 2]);
    let pool = Pool2DParam {
        padding: scalar_i32(&mut model, VALID),
        hstride: scalar_i32(&mut model, 1),
        vstride: scalar_i32(&mut model, 1),
        kw: scalar_i32(&mut model, 2),
        kh: scalar_i32(&mut model, 2),
        activation: scalar_i32(&mut model, 0),
    };
    model
        .add_operation(Operation::MaxPool2D(Node::new(vec![conv_out], vec![pooled], pool)))
        .unwrap();

    let flat = tensor(&mut model, &[1, 8]);
    model
        .add_operation(Operation::Reshape(Node::new(vec![pooled], vec![flat], ReshapeParam { shape: None })))
        .unwrap();

    let weights = constant(
        &mut model,
        &[3, 8],
        &(0..24).map(|i| ((i % 5) as f32 - 2.0) * 0.1).collect::<Vec<_>>(),
    );
    let fc_bias = constant(&mut model, &[3], &[0.0, 0.1, 0.2]);
    let logits = tensor(&mut model, &[1, 3]);
    let activation = scalar_i32(&mut model, 0);
    model
        .add_operation(Operation::FullyConnected(Node::new(
            vec![flat, weights, fc_bias],
            vec![logits],
            FullyConnectedParam { activation },
        )))
        .unwrap();

    let probabilities = tensor(&mut model, &[1, 3]);
    let beta = scalar_f32(&mut model, 1.0);
    model
        .add_operation(Operation::Softmax(Node::new(vec![logits], vec![probabilities], SoftmaxParam { beta })))
        .unwrap();

    model.add_input(input).unwrap();
    model.add_output(probabilities).unwrap();
    model
}

/// Int32 `[1, 1, 2, 2]` input copied by a NOP, then reshaped to `[1, 4]`.
pub fn int_passthrough_model() -> Model {
    let mut model = Model::new();
    let int32 = TypeInfo::new(DataType::Int32);
    let input = model.add_operand(Shape::new(vec![1, 1, 2, 2]), int32).unwrap();
    let copied = model.add_operand(Shape::new(vec![1, 1, 2, 2]), int32).unwrap();
    let flat = model.add_operand(Shape::new(vec![1, 4]), int32).unwrap();
    model
        .add_operation(Operation::Nop(Node::new(vec![input], vec![copied], ())))
        .unwrap();
    model
        .add_operation(Operation::Reshape(Node::new(vec![copied], vec![flat], ReshapeParam { shape: None })))
        .unwrap();
    model.add_input(input).unwrap();
    model.add_output(flat).unwrap();
    model
}

/// Inputs `a` and `b`; outputs `nop(a)` followed by `second_output`.
pub fn two_output_model(second_output_is_a: bool) -> Model {
    let mut model = Model::new();
    let a = tensor(&mut model, &[1, 4]);
    let b = tensor(&mut model, &[1, 4]);
    let copied = tensor(&mut model, &[1, 4]);
    model
        .add_operation(Operation::Nop(Node::new(vec![a], vec![copied], ())))
        .unwrap();
    model.add_input(a).unwrap();
    model.add_input(b).unwrap();
    model.add_output(copied).unwrap();
    model.add_output(if second_output_is_a { a } else { b }).unwrap();
    model
}
