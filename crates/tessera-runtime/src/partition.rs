//! Splitting a model into device-bound steps.
//!
//! Two phases:
//! - **Assignment**: every operation goes to the supporting device with the
//!   best performance figure for the requested preference.
//! - **Grouping**: operations become ready once all their producers ran.
//!   Ready operations wait in a FIFO queue per device; the first non-empty
//!   queue is drained into one new step, and operations made ready along the
//!   way join their own device's queue.

use crate::device::Device;
use crate::error::{PlanError, Result};
use crate::plan::{ExecutionPlan, ExecutionStep, OperandKind};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tessera_hal::{ExecutionPreference, Model, OperandType, OperationTuple};

impl ExecutionPlan {
    /// Partition `model` across `devices` and return the finished plan.
    ///
    /// Earlier devices win ties.
    #[tracing::instrument(skip_all, fields(operations = model.operations().len(), devices = devices.len()))]
    pub fn partition(
        model: &Model,
        devices: &[Arc<Device>],
        preference: ExecutionPreference,
    ) -> Result<ExecutionPlan> {
        model.validate()?;

        let support = supported_operations(model, devices)?;
        let assignment = assign_devices(model, devices, &support, preference)?;

        let operation_count = model.operations().len();
        let mut consumers: HashMap<u32, Vec<u32>> = HashMap::new();
        let mut unknown_inputs = vec![0usize; operation_count];
        let producers = model.producers();
        for (index, operation) in model.operations().iter().enumerate() {
            for input in &operation.inputs {
                if producers.contains_key(input) {
                    unknown_inputs[index] += 1;
                    consumers.entry(*input).or_default().push(index as u32);
                }
            }
        }

        let mut queues: Vec<VecDeque<u32>> = vec![VecDeque::new(); devices.len()];
        for (index, &count) in unknown_inputs.iter().enumerate() {
            if count == 0 {
                queues[assignment[index]].push_back(index as u32);
            }
        }

        let mut plan = ExecutionPlan::new();
        while let Some(device_index) = queues.iter().position(|queue| !queue.is_empty()) {
            let mut step = ExecutionStep::new(Arc::clone(&devices[device_index]));
            while let Some(operation_index) = queues[device_index].pop_front() {
                let operation = model.operation(operation_index)?;
                for &input in &operation.inputs {
                    step.add_operand(input, OperandKind::Input, model)?;
                }
                for &output in &operation.outputs {
                    step.add_operand(output, OperandKind::Output, model)?;
                }
                step.add_operation(operation_index, model)?;

                for output in &operation.outputs {
                    for &consumer in consumers.get(output).into_iter().flatten() {
                        let count = &mut unknown_inputs[consumer as usize];
                        *count -= 1;
                        if *count == 0 {
                            queues[assignment[consumer as usize]].push_back(consumer);
                        }
                    }
                }
            }
            tracing::debug!(
                step = plan.steps().len(),
                device = %devices[device_index].name(),
                operations = ?step.operations(),
                "Built step"
            );
            plan.add_step(step);
        }

        plan.finish(model)?;
        tracing::debug!(steps = plan.steps().len(), "Partitioned model");
        Ok(plan)
    }
}

/// Per device, per operation support flags.
fn supported_operations(model: &Model, devices: &[Arc<Device>]) -> Result<Vec<Vec<bool>>> {
    let mut support = Vec::with_capacity(devices.len());
    for device in devices {
        let flags = if device.has_supported_operation_tuples() {
            (0..model.operations().len() as u32)
                .map(|index| {
                    model
                        .operation_tuple(index)
                        .map(|tuple| device.supports_operation_tuple(&tuple))
                })
                .collect::<tessera_hal::Result<Vec<bool>>>()?
        } else {
            device.get_supported_operations(model)
        };
        tracing::debug!(device = %device.name(), ?flags, "Supported operations");
        support.push(flags);
    }
    Ok(support)
}

/// Index of the chosen device for every operation.
fn assign_devices(
    model: &Model,
    devices: &[Arc<Device>],
    support: &[Vec<bool>],
    preference: ExecutionPreference,
) -> Result<Vec<usize>> {
    let mut assignment = Vec::with_capacity(model.operations().len());
    for index in 0..model.operations().len() {
        let tuple = model.operation_tuple(index as u32)?;
        let relaxed = model.is_relaxed() && is_float32(&tuple);

        let mut best: Option<(usize, f32)> = None;
        for (device_index, device) in devices.iter().enumerate() {
            if !support[device_index].get(index).copied().unwrap_or(false) {
                continue;
            }
            let performance = device.performance_for(&tuple, relaxed, preference);
            if best.map_or(true, |(_, best_performance)| performance < best_performance) {
                best = Some((device_index, performance));
            }
        }

        let (device_index, _) = best.ok_or(PlanError::NoDevice {
            operation: index as u32,
            tuple,
        })?;
        assignment.push(device_index);
    }
    Ok(assignment)
}

fn is_float32(tuple: &OperationTuple) -> bool {
    matches!(tuple.operand_type, OperandType::TensorFloat32 | OperandType::Float32)
}
