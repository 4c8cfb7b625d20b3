//! Reference float32 interpreter backing the sample driver.
//!
//! Only the elementwise operations needed to run partitioned plans end to end
//! are implemented: ADD, SUB and MUL on two equally shaped inputs, FLOOR and
//! RELU on one input.

use tessera_hal::{
    ErrorStatus, Model, OperandType, OperationTuple, OperationType, OutputShape, Request,
};

/// Tuples the interpreter can execute.
pub fn executable_tuples() -> Vec<OperationTuple> {
    [
        OperationType::Add,
        OperationType::Sub,
        OperationType::Mul,
        OperationType::Floor,
        OperationType::Relu,
    ]
    .into_iter()
    .map(|op| OperationTuple::new(op, OperandType::TensorFloat32))
    .collect()
}

#[derive(Debug, Clone)]
struct Value {
    dimensions: Vec<u32>,
    data: Vec<f32>,
}

fn to_f32(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % std::mem::size_of::<f32>() != 0 {
        return None;
    }
    Some(bytemuck::pod_collect_to_vec(bytes))
}

fn binary(lhs: &Value, rhs: &Value, f: impl Fn(f32, f32) -> f32) -> Option<Value> {
    if lhs.data.len() != rhs.data.len() {
        return None;
    }
    let data = lhs.data.iter().zip(&rhs.data).map(|(&a, &b)| f(a, b)).collect();
    Some(Value {
        dimensions: lhs.dimensions.clone(),
        data,
    })
}

fn unary(input: &Value, f: impl Fn(f32) -> f32) -> Value {
    Value {
        dimensions: input.dimensions.clone(),
        data: input.data.iter().map(|&x| f(x)).collect(),
    }
}

/// Run `model` against the buffers bound in `request`.
///
/// Returns the status and one output shape per model output. Output shapes
/// are returned on success and on `OutputInsufficientSize`.
pub fn run(model: &Model, request: &Request) -> (ErrorStatus, Vec<OutputShape>) {
    let mut values: Vec<Option<Value>> = vec![None; model.operands().len()];

    for (index, operand) in model.operands().iter().enumerate() {
        if let Some(bytes) = &operand.value {
            let Some(data) = to_f32(bytes) else {
                return (ErrorStatus::GeneralFailure, Vec::new());
            };
            values[index] = Some(Value {
                dimensions: operand.dimensions.clone(),
                data,
            });
        }
    }

    for (position, &index) in model.input_indexes().iter().enumerate() {
        let Some(argument) = request.inputs.get(position) else {
            return (ErrorStatus::InvalidArgument, Vec::new());
        };
        let Some(data) = request.read(argument).as_deref().and_then(to_f32) else {
            return (ErrorStatus::InvalidArgument, Vec::new());
        };
        let dimensions = if argument.dimensions.is_empty() {
            model.operands()[index as usize].dimensions.clone()
        } else {
            argument.dimensions.clone()
        };
        values[index as usize] = Some(Value { dimensions, data });
    }

    let order = match model.topological_order() {
        Ok(order) => order,
        Err(e) => {
            tracing::error!("Cannot order model: {e}");
            return (ErrorStatus::GeneralFailure, Vec::new());
        }
    };

    for op_index in order {
        let operation = &model.operations()[op_index as usize];
        let mut inputs = Vec::with_capacity(operation.inputs.len());
        for &input in &operation.inputs {
            match &values[input as usize] {
                Some(value) => inputs.push(value),
                None => {
                    tracing::error!("Operand {input} has no value when running operation {op_index}");
                    return (ErrorStatus::GeneralFailure, Vec::new());
                }
            }
        }

        let result = match (operation.operation_type, inputs.as_slice()) {
            (OperationType::Add, [a, b]) => binary(a, b, |x, y| x + y),
            (OperationType::Sub, [a, b]) => binary(a, b, |x, y| x - y),
            (OperationType::Mul, [a, b]) => binary(a, b, |x, y| x * y),
            (OperationType::Floor, [a]) => Some(unary(a, f32::floor)),
            (OperationType::Relu, [a]) => Some(unary(a, |x| x.max(0.0))),
            _ => None,
        };
        let Some(result) = result else {
            tracing::error!(
                "Unsupported operation {} with {} inputs",
                operation.operation_type,
                inputs.len()
            );
            return (ErrorStatus::GeneralFailure, Vec::new());
        };
        let Some(&output) = operation.outputs.first() else {
            return (ErrorStatus::GeneralFailure, Vec::new());
        };
        values[output as usize] = Some(result);
    }

    let mut status = ErrorStatus::None;
    let mut shapes = Vec::with_capacity(model.output_indexes().len());
    for (position, &index) in model.output_indexes().iter().enumerate() {
        let (Some(argument), Some(value)) =
            (request.outputs.get(position), values[index as usize].as_ref())
        else {
            return (ErrorStatus::InvalidArgument, Vec::new());
        };
        let bytes: &[u8] = bytemuck::cast_slice(&value.data);
        let is_sufficient = request.write(argument, bytes);
        if !is_sufficient {
            status = ErrorStatus::OutputInsufficientSize;
        }
        shapes.push(OutputShape {
            dimensions: value.dimensions.clone(),
            is_sufficient,
        });
    }
    (status, shapes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_hal::Operand;

    fn floats(values: &[f32]) -> Vec<u8> {
        bytemuck::cast_slice(values).to_vec()
    }

    fn read_floats(bytes: &[u8]) -> Vec<f32> {
        bytemuck::pod_collect_to_vec(bytes)
    }

    fn add_relu_model() -> Model {
        let mut model = Model::new();
        let a = model.add_operand(Operand::new(OperandType::TensorFloat32, [3]));
        let b = model.add_operand(Operand::new(OperandType::TensorFloat32, [3]));
        let t = model.add_operand(Operand::new(OperandType::TensorFloat32, [3]));
        let out = model.add_operand(Operand::new(OperandType::TensorFloat32, [3]));
        model.add_operation(OperationType::Add, [a, b], [t]).unwrap();
        model.add_operation(OperationType::Relu, [t], [out]).unwrap();
        model.identify_inputs_and_outputs([a, b], [out]).unwrap();
        model
    }

    #[test]
    fn test_add_then_relu() {
        let model = add_relu_model();
        let request = Request::from_buffers(
            vec![floats(&[1.0, -5.0, 2.0]), floats(&[1.0, 2.0, -4.0])],
            &[12],
        );
        let (status, shapes) = run(&model, &request);
        assert_eq!(status, ErrorStatus::None);
        assert_eq!(shapes[0].dimensions, vec![3]);
        assert_eq!(read_floats(&request.output(0).unwrap()), vec![2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_small_output_buffer() {
        let model = add_relu_model();
        let request = Request::from_buffers(vec![floats(&[1.0; 3]), floats(&[1.0; 3])], &[4]);
        let (status, shapes) = run(&model, &request);
        assert_eq!(status, ErrorStatus::OutputInsufficientSize);
        assert!(!shapes[0].is_sufficient);
        assert_eq!(shapes[0].dimensions, vec![3]);
    }

    #[test]
    fn test_missing_input_argument() {
        let model = add_relu_model();
        let request = Request::from_buffers(vec![floats(&[1.0; 3])], &[12]);
        let (status, shapes) = run(&model, &request);
        assert_eq!(status, ErrorStatus::InvalidArgument);
        assert!(shapes.is_empty());
    }

    #[test]
    fn test_constant_operand() {
        let mut model = Model::new();
        let a = model.add_operand(Operand::new(OperandType::TensorFloat32, [2]));
        let c = model.add_operand(Operand::new(OperandType::TensorFloat32, [2]));
        let out = model.add_operand(Operand::new(OperandType::TensorFloat32, [2]));
        model.set_operand_value(c, floats(&[0.5, 0.5])).unwrap();
        model.add_operation(OperationType::Mul, [a, c], [out]).unwrap();
        model.identify_inputs_and_outputs([a], [out]).unwrap();

        let request = Request::from_buffers(vec![floats(&[4.0, -2.0])], &[8]);
        assert_eq!(run(&model, &request).0, ErrorStatus::None);
        assert_eq!(read_floats(&request.output(0).unwrap()), vec![2.0, -1.0]);
    }

    #[test]
    fn test_unsupported_operation_fails() {
        let mut model = Model::new();
        let a = model.add_operand(Operand::new(OperandType::TensorFloat32, [2]));
        let out = model.add_operand(Operand::new(OperandType::TensorFloat32, [2]));
        model.add_operation(OperationType::Tanh, [a], [out]).unwrap();
        model.identify_inputs_and_outputs([a], [out]).unwrap();
        let request = Request::from_buffers(vec![floats(&[1.0, 2.0])], &[8]);
        assert_eq!(run(&model, &request).0, ErrorStatus::GeneralFailure);
    }
}
