//! Execution steps and the execution plan built from them.
//!
//! A step owns a sub-model carved out of an original model and bound to one
//! device. Steps are filled operand-first, operation-second, then frozen when
//! the plan is finished. Operands are referred to by index everywhere: indices
//! into the original model on one side, into the step's sub-model on the
//! other.

use crate::device::Device;
use crate::error::{PlanError, Result};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tessera_hal::{Model, Operand, OperandLifetime};

/// Role an operand plays for the operation being added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Input,
    Output,
}

/// `(original operand index, sub-model operand index)`.
pub type OperandPair = (u32, u32);

/// One device-bound sub-graph of a plan.
#[derive(Debug)]
pub struct ExecutionStep {
    /// Position within the plan.
    index: usize,
    device: Arc<Device>,
    sub_model: Model,
    /// Original indices of the operations copied into this step, in order.
    operations: Vec<u32>,
    /// Every mapped operand, original index to local index.
    operand_map: BTreeMap<u32, u32>,
    /// Original model inputs read by this step.
    model_inputs: Vec<OperandPair>,
    /// Original model outputs written by this step.
    model_outputs: Vec<OperandPair>,
    /// Temporaries produced by earlier steps and read here.
    sub_model_inputs: Vec<OperandPair>,
    /// Temporaries produced here and read by later steps.
    sub_model_outputs: Vec<OperandPair>,
    frozen: bool,
}

impl ExecutionStep {
    pub fn new(device: Arc<Device>) -> Self {
        Self {
            index: 0,
            device,
            sub_model: Model::new(),
            operations: Vec::new(),
            operand_map: BTreeMap::new(),
            model_inputs: Vec::new(),
            model_outputs: Vec::new(),
            sub_model_inputs: Vec::new(),
            sub_model_outputs: Vec::new(),
            frozen: false,
        }
    }

    fn assert_mutable(&self, what: &str) {
        assert!(
            !self.frozen,
            "{what} called on frozen step {} ({})",
            self.index,
            self.device.name()
        );
    }

    /// Map an original operand into this step and return its local index.
    ///
    /// Mapping an operand twice returns the first local index and records
    /// nothing new. An `Input` that is produced by some operation and not yet
    /// mapped here must come from another step, so it is recorded as a
    /// cross-step input.
    pub fn add_operand(&mut self, original_index: u32, kind: OperandKind, original: &Model) -> Result<u32> {
        self.assert_mutable("add_operand");
        if let Some(&local) = self.operand_map.get(&original_index) {
            return Ok(local);
        }

        let source = original.operand(original_index)?;
        let mut operand = Operand::new(source.operand_type, source.dimensions.clone())
            .with_quantization(source.scale, source.zero_point);
        if source.lifetime.is_constant() || source.lifetime == OperandLifetime::NoValue {
            operand.lifetime = source.lifetime;
            operand.value = source.value.clone();
        }
        let local = self.sub_model.add_operand(operand);
        self.operand_map.insert(original_index, local);

        let pair = (original_index, local);
        match (kind, source.lifetime) {
            (OperandKind::Input, OperandLifetime::ModelInput) => self.model_inputs.push(pair),
            (OperandKind::Output, OperandLifetime::ModelOutput) => self.model_outputs.push(pair),
            (
                OperandKind::Input,
                OperandLifetime::TemporaryVariable | OperandLifetime::ModelOutput,
            ) => self.sub_model_inputs.push(pair),
            _ => {}
        }
        Ok(local)
    }

    /// Copy an original operation into this step.
    ///
    /// # Panics
    ///
    /// Panics if any operand of the operation has not been mapped with
    /// [`ExecutionStep::add_operand`] first, or if the step is frozen.
    pub fn add_operation(&mut self, original_index: u32, original: &Model) -> Result<()> {
        self.assert_mutable("add_operation");
        let operation = original.operation(original_index)?;
        let local = |operand: &u32| -> u32 {
            *self.operand_map.get(operand).unwrap_or_else(|| {
                panic!(
                    "Operand {operand} of operation {original_index} is not mapped in step {}",
                    self.index
                )
            })
        };
        let inputs: Vec<u32> = operation.inputs.iter().map(local).collect();
        let outputs: Vec<u32> = operation.outputs.iter().map(local).collect();

        self.sub_model
            .add_operation(operation.operation_type, inputs, outputs)?;
        self.operations.push(original_index);
        Ok(())
    }

    /// Record the cross-step outputs, declare the sub-model's inputs and
    /// outputs, and freeze.
    fn finish(&mut self, sub_model_outputs: Vec<OperandPair>, relaxed: bool) -> Result<()> {
        self.assert_mutable("finish");
        self.sub_model_outputs = sub_model_outputs;

        let inputs: Vec<u32> = self
            .model_inputs
            .iter()
            .chain(&self.sub_model_inputs)
            .map(|&(_, local)| local)
            .collect();
        let outputs: Vec<u32> = self
            .model_outputs
            .iter()
            .chain(&self.sub_model_outputs)
            .map(|&(_, local)| local)
            .collect();
        self.sub_model.identify_inputs_and_outputs(inputs, outputs)?;
        self.sub_model.set_relax_computation_float32_to_float16(relaxed);
        self.sub_model.validate()?;
        self.frozen = true;
        Ok(())
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn sub_model(&self) -> &Model {
        &self.sub_model
    }

    pub fn operations(&self) -> &[u32] {
        &self.operations
    }

    pub fn operand_map(&self) -> &BTreeMap<u32, u32> {
        &self.operand_map
    }

    pub fn local_index(&self, original_index: u32) -> Option<u32> {
        self.operand_map.get(&original_index).copied()
    }

    pub fn model_inputs(&self) -> &[OperandPair] {
        &self.model_inputs
    }

    pub fn model_outputs(&self) -> &[OperandPair] {
        &self.model_outputs
    }

    pub fn sub_model_inputs(&self) -> &[OperandPair] {
        &self.sub_model_inputs
    }

    pub fn sub_model_outputs(&self) -> &[OperandPair] {
        &self.sub_model_outputs
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

/// Ordered steps covering one original model.
#[derive(Debug, Default)]
pub struct ExecutionPlan {
    steps: Vec<ExecutionStep>,
    /// Step-level data dependencies, edge weight is the operand carried.
    dependencies: DiGraph<usize, u32>,
    model_inputs: Vec<u32>,
    model_outputs: Vec<u32>,
    finished: bool,
}

impl ExecutionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step.
    ///
    /// # Panics
    ///
    /// Panics if the plan is already finished.
    pub fn add_step(&mut self, mut step: ExecutionStep) -> usize {
        assert!(!self.finished, "add_step called on a finished plan");
        step.index = self.steps.len();
        self.steps.push(step);
        self.steps.len() - 1
    }

    /// Stitch the steps together and freeze them.
    ///
    /// Fails if some operation is covered zero or several times, or if a
    /// cross-step input has no earlier producing step.
    #[tracing::instrument(skip_all, fields(steps = self.steps.len()))]
    pub fn finish(&mut self, original: &Model) -> Result<()> {
        if self.finished {
            return Err(PlanError::InvalidPlan("Plan is already finished".to_string()));
        }

        let mut coverage = vec![0usize; original.operations().len()];
        for step in &self.steps {
            for &operation in &step.operations {
                let count = coverage.get_mut(operation as usize).ok_or_else(|| {
                    PlanError::InvalidPlan(format!("Step {} holds unknown operation {operation}", step.index))
                })?;
                *count += 1;
            }
        }
        if let Some(operation) = coverage.iter().position(|&count| count != 1) {
            return Err(PlanError::InvalidPlan(format!(
                "Operation {operation} is covered {} times",
                coverage[operation]
            )));
        }

        let mut producer_step: HashMap<u32, usize> = HashMap::new();
        for step in &self.steps {
            for &operation in &step.operations {
                for &output in &original.operation(operation)?.outputs {
                    producer_step.insert(output, step.index);
                }
            }
        }

        let mut dependencies = DiGraph::new();
        let nodes: Vec<NodeIndex> = (0..self.steps.len()).map(|i| dependencies.add_node(i)).collect();
        let mut cross_outputs: Vec<Vec<OperandPair>> = vec![Vec::new(); self.steps.len()];

        for consumer in &self.steps {
            for &(operand, _) in &consumer.sub_model_inputs {
                let producer = *producer_step.get(&operand).ok_or_else(|| {
                    PlanError::InvalidPlan(format!(
                        "Operand {operand} read by step {} has no producing step",
                        consumer.index
                    ))
                })?;
                if producer >= consumer.index {
                    return Err(PlanError::InvalidPlan(format!(
                        "Step {} reads operand {operand} produced by later step {producer}",
                        consumer.index
                    )));
                }
                dependencies.add_edge(nodes[producer], nodes[consumer.index], operand);

                if original.operand(operand)?.lifetime != OperandLifetime::TemporaryVariable {
                    continue;
                }
                let outputs = &mut cross_outputs[producer];
                if outputs.iter().any(|&(original_index, _)| original_index == operand) {
                    continue;
                }
                let local = self.steps[producer].local_index(operand).ok_or_else(|| {
                    PlanError::InvalidPlan(format!("Operand {operand} is not mapped in step {producer}"))
                })?;
                outputs.push((operand, local));
            }
        }

        let relaxed = original.is_relaxed();
        for (step, outputs) in self.steps.iter_mut().zip(cross_outputs) {
            step.finish(outputs, relaxed)?;
        }

        self.dependencies = dependencies;
        self.model_inputs = original.input_indexes().to_vec();
        self.model_outputs = original.output_indexes().to_vec();
        self.finished = true;
        tracing::debug!(edges = self.dependencies.edge_count(), "Plan finished");
        Ok(())
    }

    pub fn steps(&self) -> &[ExecutionStep] {
        &self.steps
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Original model inputs, in order.
    pub fn model_inputs(&self) -> &[u32] {
        &self.model_inputs
    }

    /// Original model outputs, in order.
    pub fn model_outputs(&self) -> &[u32] {
        &self.model_outputs
    }

    /// Steps whose outputs `step` reads, ascending.
    pub fn dependencies_of(&self, step: usize) -> Vec<usize> {
        if step >= self.dependencies.node_count() {
            return Vec::new();
        }
        let mut producers: Vec<usize> = self
            .dependencies
            .neighbors_directed(NodeIndex::new(step), Direction::Incoming)
            .map(|node| self.dependencies[node])
            .collect();
        producers.sort_unstable();
        producers.dedup();
        producers
    }
}
