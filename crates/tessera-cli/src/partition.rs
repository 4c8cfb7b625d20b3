//! The `partition` command: build a chain model, split it and run it.

use anyhow::{Context, Result};
use tessera_hal::{ExecutionPreference, MeasureTiming, Model, Operand, OperandType, OperationType};
use tessera_runtime::{DeviceRegistry, ExecutionPlan, PlanExecutor};

/// Width of every tensor in the demonstration chain.
const WIDTH: u32 = 4;
const INPUT: [f32; WIDTH as usize] = [-1.5, -0.25, 0.5, 2.75];
const ADDEND: f32 = 0.5;

/// Alternating `ADD(prev, 0.5)` / `FLOOR(prev)` chain of `length` operations.
fn build_chain(length: usize) -> Result<Model> {
    if length == 0 {
        anyhow::bail!("Chain length must be at least 1");
    }
    let mut model = Model::new();
    let input = model.add_operand(Operand::new(OperandType::TensorFloat32, [WIDTH]));
    let addend = model.add_operand(Operand::new(OperandType::TensorFloat32, [WIDTH]));
    let values = [ADDEND; WIDTH as usize];
    model.set_operand_value(addend, bytemuck::cast_slice::<f32, u8>(&values))?;

    let mut previous = input;
    for i in 0..length {
        let next = model.add_operand(Operand::new(OperandType::TensorFloat32, [WIDTH]));
        if i % 2 == 0 {
            model.add_operation(OperationType::Add, [previous, addend], [next])?;
        } else {
            model.add_operation(OperationType::Floor, [previous], [next])?;
        }
        previous = next;
    }
    model.identify_inputs_and_outputs([input], [previous])?;
    Ok(model)
}

fn reference(length: usize) -> Vec<f32> {
    INPUT
        .iter()
        .map(|&x| (0..length).fold(x, |v, i| if i % 2 == 0 { v + ADDEND } else { v.floor() }))
        .collect()
}

pub fn cmd_partition(
    registry: &DeviceRegistry,
    length: usize,
    preference: ExecutionPreference,
) -> Result<()> {
    let model = build_chain(length).with_context(|| "Failed to build chain model")?;
    let plan = ExecutionPlan::partition(&model, registry.devices(), preference)
        .with_context(|| "Failed to partition model")?;

    println!("Model: {} operations, {} operands", model.operations().len(), model.operands().len());
    println!("Plan ({} steps):", plan.steps().len());
    for step in plan.steps() {
        println!();
        println!("  Step {} on {}", step.index(), step.device().name());
        println!("    Operations: {:?}", step.operations());
        println!("    Depends on: {:?}", plan.dependencies_of(step.index()));
        println!("    Model inputs: {:?}", step.model_inputs());
        println!("    Model outputs: {:?}", step.model_outputs());
        println!("    Cross-step inputs: {:?}", step.sub_model_inputs());
        println!("    Cross-step outputs: {:?}", step.sub_model_outputs());
    }

    let executor = PlanExecutor::prepare(&plan, preference)
        .with_context(|| "Failed to prepare plan")?;
    let input = bytemuck::cast_slice::<f32, u8>(&INPUT).to_vec();
    let (outputs, timings) = executor
        .execute_timed(vec![input], MeasureTiming::Yes)
        .with_context(|| "Failed to execute plan")?;
    let output: Vec<f32> = bytemuck::pod_collect_to_vec(&outputs[0]);

    println!();
    println!("Input:     {:?}", INPUT);
    println!("Output:    {:?}", output);
    println!("Reference: {:?}", reference(length));
    for (index, timing) in timings.iter().enumerate() {
        if timing.is_available() {
            println!("  Step {index}: {} us on device", timing.time_on_device);
        }
    }

    if output != reference(length) {
        anyhow::bail!("Plan output does not match the reference");
    }
    Ok(())
}
