//! Operand/operation arena describing one computation graph.
//!
//! A [`Model`] owns every operand and operation record. Everything else
//! (operations, step bookkeeping, drivers) refers to operands by their `u32`
//! index. Constant payloads are reference counted so that sub-models derived
//! from a model share the same bytes.

use crate::types::{HalVersion, OperandType, OperationTuple, OperationType};
use crate::{HalError, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Topo;
use std::collections::HashMap;
use std::sync::Arc;

/// How an operand receives its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandLifetime {
    /// Produced by one operation and consumed inside the same model.
    TemporaryVariable,
    /// Supplied by the caller at execution time.
    ModelInput,
    /// Returned to the caller at execution time.
    ModelOutput,
    /// Compile-time constant whose bytes are held by the model.
    ConstantCopy,
    /// Compile-time constant referencing shared memory.
    ConstantReference,
    /// Optional argument left unset.
    NoValue,
}

impl OperandLifetime {
    pub fn is_constant(self) -> bool {
        matches!(
            self,
            OperandLifetime::ConstantCopy | OperandLifetime::ConstantReference
        )
    }
}

/// A graph value: one tensor or scalar.
#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    pub operand_type: OperandType,
    /// Dimensions, 0 marks an unknown extent.
    pub dimensions: Vec<u32>,
    pub scale: f32,
    pub zero_point: i32,
    pub lifetime: OperandLifetime,
    pub number_of_consumers: u32,
    /// Constant payload, present only for constant lifetimes.
    pub value: Option<Arc<[u8]>>,
}

impl Operand {
    pub fn new(operand_type: OperandType, dimensions: impl Into<Vec<u32>>) -> Self {
        Self {
            operand_type,
            dimensions: dimensions.into(),
            scale: 0.0,
            zero_point: 0,
            lifetime: OperandLifetime::TemporaryVariable,
            number_of_consumers: 0,
            value: None,
        }
    }

    pub fn with_quantization(mut self, scale: f32, zero_point: i32) -> Self {
        self.scale = scale;
        self.zero_point = zero_point;
        self
    }

    pub fn rank(&self) -> u32 {
        self.dimensions.len() as u32
    }

    /// Number of elements, or `None` when any dimension is unknown.
    pub fn element_count(&self) -> Option<usize> {
        if self.dimensions.contains(&0) {
            return None;
        }
        Some(self.dimensions.iter().map(|&d| d as usize).product())
    }

    /// Size in bytes of the fully specified value.
    pub fn byte_len(&self) -> Option<usize> {
        self.element_count()
            .map(|n| n * self.operand_type.element_size())
    }

    pub fn is_constant(&self) -> bool {
        self.lifetime.is_constant()
    }
}

/// A graph node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub operation_type: OperationType,
    pub inputs: Vec<u32>,
    pub outputs: Vec<u32>,
}

/// Arena owning all operands and operations of one graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
    operands: Vec<Operand>,
    operations: Vec<Operation>,
    input_indexes: Vec<u32>,
    output_indexes: Vec<u32>,
    relax_computation_float32_to_float16: bool,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operand and return its index.
    pub fn add_operand(&mut self, operand: Operand) -> u32 {
        let index = self.operands.len() as u32;
        self.operands.push(operand);
        index
    }

    /// Give an operand a constant value.
    pub fn set_operand_value(&mut self, index: u32, value: impl Into<Arc<[u8]>>) -> Result<()> {
        self.set_constant(index, value.into(), OperandLifetime::ConstantCopy)
    }

    /// Give an operand a constant value living in shared memory.
    pub fn set_operand_reference(&mut self, index: u32, value: impl Into<Arc<[u8]>>) -> Result<()> {
        self.set_constant(index, value.into(), OperandLifetime::ConstantReference)
    }

    fn set_constant(&mut self, index: u32, value: Arc<[u8]>, lifetime: OperandLifetime) -> Result<()> {
        let operand = self.operand_mut(index)?;
        if let Some(expected) = operand.byte_len() {
            if expected != value.len() {
                return Err(HalError::InvalidModel(format!(
                    "Operand {index} expects {expected} bytes, got {}",
                    value.len()
                )));
            }
        }
        operand.lifetime = lifetime;
        operand.value = Some(value);
        Ok(())
    }

    /// Mark an optional operand as deliberately left unset.
    pub fn set_operand_no_value(&mut self, index: u32) -> Result<()> {
        let operand = self.operand_mut(index)?;
        operand.lifetime = OperandLifetime::NoValue;
        operand.value = None;
        Ok(())
    }

    /// Add an operation and return its index.
    ///
    /// Every referenced operand must already exist.
    pub fn add_operation(
        &mut self,
        operation_type: OperationType,
        inputs: impl Into<Vec<u32>>,
        outputs: impl Into<Vec<u32>>,
    ) -> Result<u32> {
        let inputs = inputs.into();
        let outputs = outputs.into();
        for &index in inputs.iter().chain(outputs.iter()) {
            self.operand(index)?;
        }
        if outputs.is_empty() {
            return Err(HalError::InvalidModel(format!(
                "{operation_type} operation has no outputs"
            )));
        }
        for &index in &inputs {
            self.operands[index as usize].number_of_consumers += 1;
        }
        let index = self.operations.len() as u32;
        self.operations.push(Operation {
            operation_type,
            inputs,
            outputs,
        });
        Ok(index)
    }

    /// Declare the model's ordered inputs and outputs and set their lifetimes.
    pub fn identify_inputs_and_outputs(
        &mut self,
        inputs: impl Into<Vec<u32>>,
        outputs: impl Into<Vec<u32>>,
    ) -> Result<()> {
        let inputs = inputs.into();
        let outputs = outputs.into();
        for &index in &inputs {
            self.operand_mut(index)?.lifetime = OperandLifetime::ModelInput;
        }
        for &index in &outputs {
            self.operand_mut(index)?.lifetime = OperandLifetime::ModelOutput;
        }
        self.input_indexes = inputs;
        self.output_indexes = outputs;
        Ok(())
    }

    pub fn set_relax_computation_float32_to_float16(&mut self, relax: bool) {
        self.relax_computation_float32_to_float16 = relax;
    }

    pub fn is_relaxed(&self) -> bool {
        self.relax_computation_float32_to_float16
    }

    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn input_indexes(&self) -> &[u32] {
        &self.input_indexes
    }

    pub fn output_indexes(&self) -> &[u32] {
        &self.output_indexes
    }

    pub fn operand(&self, index: u32) -> Result<&Operand> {
        self.operands
            .get(index as usize)
            .ok_or_else(|| HalError::InvalidModel(format!("Operand {index} not found")))
    }

    fn operand_mut(&mut self, index: u32) -> Result<&mut Operand> {
        self.operands
            .get_mut(index as usize)
            .ok_or_else(|| HalError::InvalidModel(format!("Operand {index} not found")))
    }

    pub fn operation(&self, index: u32) -> Result<&Operation> {
        self.operations
            .get(index as usize)
            .ok_or_else(|| HalError::InvalidModel(format!("Operation {index} not found")))
    }

    /// The capability tuple an operation falls under.
    ///
    /// The operand type is taken from the first input, or from the first
    /// output for operations without inputs.
    pub fn operation_tuple(&self, index: u32) -> Result<OperationTuple> {
        let operation = self.operation(index)?;
        let first = operation
            .inputs
            .first()
            .or_else(|| operation.outputs.first())
            .copied()
            .ok_or_else(|| {
                HalError::InvalidModel(format!("Operation {index} has no operands"))
            })?;
        Ok(OperationTuple::new(
            operation.operation_type,
            self.operand(first)?.operand_type,
        ))
    }

    /// Map from operand index to the operation producing it.
    pub fn producers(&self) -> HashMap<u32, u32> {
        let mut producers = HashMap::new();
        for (op_index, operation) in self.operations.iter().enumerate() {
            for &output in &operation.outputs {
                producers.insert(output, op_index as u32);
            }
        }
        producers
    }

    /// Operation indices in an order where producers precede consumers.
    pub fn topological_order(&self) -> Result<Vec<u32>> {
        let mut graph: DiGraph<u32, ()> = DiGraph::new();
        let nodes: Vec<NodeIndex> = (0..self.operations.len() as u32)
            .map(|i| graph.add_node(i))
            .collect();

        let producers = self.producers();
        for (consumer, operation) in self.operations.iter().enumerate() {
            for input in &operation.inputs {
                if let Some(&producer) = producers.get(input) {
                    graph.add_edge(nodes[producer as usize], nodes[consumer], ());
                }
            }
        }

        if petgraph::algo::is_cyclic_directed(&graph) {
            return Err(HalError::InvalidModel("Model contains a cycle".to_string()));
        }

        let mut topo = Topo::new(&graph);
        let mut order = Vec::with_capacity(self.operations.len());
        while let Some(node) = topo.next(&graph) {
            order.push(graph[node]);
        }
        Ok(order)
    }

    /// Structural validation: operand references, single producers, lifetimes.
    pub fn validate(&self) -> Result<()> {
        if self.operations.is_empty() {
            return Err(HalError::InvalidModel("Model has no operations".to_string()));
        }
        if self.output_indexes.is_empty() {
            return Err(HalError::InvalidModel("Model has no outputs".to_string()));
        }

        let mut produced = vec![false; self.operands.len()];
        for (op_index, operation) in self.operations.iter().enumerate() {
            for &index in operation.inputs.iter().chain(operation.outputs.iter()) {
                self.operand(index)?;
            }
            for &output in &operation.outputs {
                let operand = &self.operands[output as usize];
                if matches!(
                    operand.lifetime,
                    OperandLifetime::ModelInput
                        | OperandLifetime::ConstantCopy
                        | OperandLifetime::ConstantReference
                        | OperandLifetime::NoValue
                ) {
                    return Err(HalError::InvalidModel(format!(
                        "Operation {op_index} writes operand {output} with lifetime {:?}",
                        operand.lifetime
                    )));
                }
                if std::mem::replace(&mut produced[output as usize], true) {
                    return Err(HalError::InvalidModel(format!(
                        "Operand {output} has more than one producer"
                    )));
                }
            }
        }

        for (index, operand) in self.operands.iter().enumerate() {
            let needs_producer = matches!(
                operand.lifetime,
                OperandLifetime::TemporaryVariable | OperandLifetime::ModelOutput
            );
            if needs_producer && operand.number_of_consumers > 0 && !produced[index] {
                return Err(HalError::InvalidModel(format!(
                    "Operand {index} is read but never written"
                )));
            }
            if operand.lifetime.is_constant() && operand.value.is_none() {
                return Err(HalError::InvalidModel(format!(
                    "Constant operand {index} has no value"
                )));
            }
        }
        for &output in &self.output_indexes {
            if !produced[output as usize] {
                return Err(HalError::InvalidModel(format!(
                    "Model output {output} is never written"
                )));
            }
        }

        self.topological_order().map(|_| ())
    }

    /// Oldest revision able to represent this model.
    pub fn min_version(&self) -> HalVersion {
        let operations = self
            .operations
            .iter()
            .map(|op| op.operation_type.introduced_in());
        let operands = self
            .operands
            .iter()
            .map(|operand| operand.operand_type.introduced_in());
        let relaxed = self
            .relax_computation_float32_to_float16
            .then_some(HalVersion::V1_1);
        operations
            .chain(operands)
            .chain(relaxed)
            .max()
            .unwrap_or(HalVersion::V1_0)
    }

    /// Whether a driver of `version` can be handed this model.
    pub fn is_compliant_with(&self, version: HalVersion) -> bool {
        self.min_version() <= version
    }
}
