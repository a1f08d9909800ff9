use super::{report, OperationCode, ResultCode};
use crate::error::{ForgeResult, GraphError};
use crate::graph::{
    AddParam, ConcatParam, ConstData, Conv2DParam, DataType, FullyConnectedParam, Model, Node, OpKind,
    OperandIndex, Operation, Pool2DParam, ReshapeParam, Shape, SoftmaxParam, TypeInfo,
};

/// NNAPI operand type descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct OperandType {
    pub code: i32,
    pub dimensions: Vec<u32>,
    pub scale: f32,
    pub zero_point: i32,
}

impl OperandType {
    pub fn tensor_f32(dimensions: &[u32]) -> Self {
        Self {
            code: 3,
            dimensions: dimensions.to_vec(),
            scale: 0.0,
            zero_point: 0,
        }
    }

    pub fn scalar_i32() -> Self {
        Self {
            code: 1,
            dimensions: Vec::new(),
            scale: 0.0,
            zero_point: 0,
        }
    }

    pub fn scalar_f32() -> Self {
        Self {
            code: 0,
            dimensions: Vec::new(),
            scale: 0.0,
            zero_point: 0,
        }
    }
}

/// Graph construction by operand and operation code.
#[derive(Debug, Default)]
pub struct ModelBuilder {
    model: Model,
    operand_count: u32,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operand; on success the new operand index is returned.
    pub fn add_operand(&mut self, operand_type: &OperandType) -> Result<u32, ResultCode> {
        let result = self.try_add_operand(operand_type);
        match result {
            Ok(index) => {
                self.operand_count += 1;
                Ok(index.value())
            }
            Err(err) => Err(report("add_operand", Err::<(), _>(err))),
        }
    }

    fn try_add_operand(&mut self, operand_type: &OperandType) -> ForgeResult<OperandIndex> {
        let dtype = DataType::from_code(operand_type.code).ok_or_else(|| GraphError::TypeMismatch {
            index: OperandIndex(self.operand_count),
            expected: "a known operand type code".to_string(),
            actual: operand_type.code.to_string(),
        })?;
        let type_info = TypeInfo {
            dtype,
            scale: operand_type.scale,
            zero_point: operand_type.zero_point,
        };
        let dims: Vec<usize> = operand_type.dimensions.iter().map(|d| *d as usize).collect();
        self.model.add_operand(Shape::new(dims), type_info)
    }

    pub fn set_operand_value(&mut self, index: u32, bytes: &[u8]) -> ResultCode {
        let result = self.model.set_operand_value(OperandIndex(index), ConstData::new(bytes.to_vec()));
        report("set_operand_value", result)
    }

    pub fn add_operation(&mut self, code: i32, inputs: &[u32], outputs: &[u32]) -> ResultCode {
        let result = decode(code, &indices(inputs), &indices(outputs))
            .and_then(|operation| self.model.add_operation(operation));
        report("add_operation", result)
    }

    pub fn identify_inputs_and_outputs(&mut self, inputs: &[u32], outputs: &[u32]) -> ResultCode {
        let result = (|| -> ForgeResult<()> {
            for index in indices(inputs) {
                self.model.add_input(index)?;
            }
            for index in indices(outputs) {
                self.model.add_output(index)?;
            }
            Ok(())
        })();
        report("identify_inputs_and_outputs", result)
    }

    pub fn finish(&mut self) -> ResultCode {
        report("finish", self.model.finish_building())
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn into_model(self) -> Model {
        self.model
    }
}

fn indices(raw: &[u32]) -> Vec<OperandIndex> {
    raw.iter().copied().map(OperandIndex).collect()
}

fn arity(kind: OpKind, expected: usize, inputs: &[OperandIndex], outputs: &[OperandIndex]) -> ForgeResult<()> {
    if inputs.len() != expected {
        return Err(GraphError::ArityMismatch {
            kind,
            expected: expected.to_string(),
            actual: inputs.len(),
        }
        .into());
    }
    if outputs.len() != 1 {
        return Err(GraphError::ArityMismatch {
            kind,
            expected: "1 output".to_string(),
            actual: outputs.len(),
        }
        .into());
    }
    Ok(())
}

/// Map NNAPI operand lists onto a node: data inputs first, attribute
/// operands into the param struct.
fn decode(code: i32, inputs: &[OperandIndex], outputs: &[OperandIndex]) -> ForgeResult<Operation> {
    let op = OperationCode::from_code(code).ok_or(GraphError::UnknownOperationCode(code))?;
    let out = outputs.to_vec();
    let operation = match op {
        OperationCode::Conv2D => {
            arity(OpKind::Conv2D, 7, inputs, outputs)?;
            let param = Conv2DParam {
                padding: inputs[3],
                hstride: inputs[4],
                vstride: inputs[5],
                activation: inputs[6],
            };
            Operation::Conv2D(Node::new(inputs[..3].to_vec(), out, param))
        }
        OperationCode::MaxPool2D | OperationCode::AveragePool2D => {
            let kind = if op == OperationCode::MaxPool2D {
                OpKind::MaxPool2D
            } else {
                OpKind::AvgPool2D
            };
            arity(kind, 7, inputs, outputs)?;
            let param = Pool2DParam {
                padding: inputs[1],
                hstride: inputs[2],
                vstride: inputs[3],
                kw: inputs[4],
                kh: inputs[5],
                activation: inputs[6],
            };
            let node = Node::new(vec![inputs[0]], out, param);
            if kind == OpKind::MaxPool2D {
                Operation::MaxPool2D(node)
            } else {
                Operation::AvgPool2D(node)
            }
        }
        OperationCode::Concatenation => {
            let (axis, data) = inputs.split_last().ok_or_else(|| GraphError::ArityMismatch {
                kind: OpKind::Concat,
                expected: "at least 2".to_string(),
                actual: 0,
            })?;
            arity(OpKind::Concat, inputs.len(), inputs, outputs)?;
            Operation::Concat(Node::new(data.to_vec(), out, ConcatParam { axis: *axis }))
        }
        OperationCode::FullyConnected => {
            arity(OpKind::FullyConnected, 4, inputs, outputs)?;
            let param = FullyConnectedParam {
                activation: inputs[3],
            };
            Operation::FullyConnected(Node::new(inputs[..3].to_vec(), out, param))
        }
        OperationCode::Reshape => {
            arity(OpKind::Reshape, 2, inputs, outputs)?;
            let param = ReshapeParam {
                shape: Some(inputs[1]),
            };
            Operation::Reshape(Node::new(vec![inputs[0]], out, param))
        }
        OperationCode::Softmax => {
            arity(OpKind::Softmax, 2, inputs, outputs)?;
            let param = SoftmaxParam { beta: inputs[1] };
            Operation::Softmax(Node::new(vec![inputs[0]], out, param))
        }
        OperationCode::Add => {
            arity(OpKind::Add, 3, inputs, outputs)?;
            let param = AddParam {
                activation: inputs[2],
            };
            Operation::Add(Node::new(inputs[..2].to_vec(), out, param))
        }
        OperationCode::CastEx => {
            arity(OpKind::Cast, 1, inputs, outputs)?;
            Operation::Cast(Node::new(vec![inputs[0]], out, ()))
        }
    };
    Ok(operation)
}
