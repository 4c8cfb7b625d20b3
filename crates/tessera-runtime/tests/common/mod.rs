//! Shared helpers for runtime integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use tessera_hal::{Model, Operand, OperandType, OperationTuple, OperationType};
use tessera_runtime::{DeviceRegistry, MapProperties, StaticServiceManager};
use tessera_sample_driver::{SampleConfig, SampleDriver};

/// Initialize tracing for a test. Safe to call more than once.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

pub fn floats(values: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

pub fn to_floats(bytes: &[u8]) -> Vec<f32> {
    bytemuck::pod_collect_to_vec(bytes)
}

pub fn float_tuple(operation_type: OperationType) -> OperationTuple {
    OperationTuple::new(operation_type, OperandType::TensorFloat32)
}

/// Width of every tensor in the chain models.
pub const CHAIN_WIDTH: u32 = 4;

/// Build an alternating ADD/FLOOR chain of `length` operations.
///
/// Graph structure:
/// - Input: `x` [4] float32
/// - Constant: `c` [4] = 0.5
/// - Operation `i` is `ADD(prev, c)` for even `i`, `FLOOR(prev)` for odd `i`
/// - Output: the last operation's result
pub fn chain_model(length: usize) -> Model {
    assert!(length > 0, "chain needs at least one operation");
    let mut model = Model::new();
    let x = model.add_operand(Operand::new(OperandType::TensorFloat32, [CHAIN_WIDTH]));
    let c = model.add_operand(Operand::new(OperandType::TensorFloat32, [CHAIN_WIDTH]));
    model
        .set_operand_value(c, floats(&[0.5; CHAIN_WIDTH as usize]))
        .unwrap();

    let mut previous = x;
    for i in 0..length {
        let next = model.add_operand(Operand::new(OperandType::TensorFloat32, [CHAIN_WIDTH]));
        if i % 2 == 0 {
            model.add_operation(OperationType::Add, [previous, c], [next]).unwrap();
        } else {
            model.add_operation(OperationType::Floor, [previous], [next]).unwrap();
        }
        previous = next;
    }
    model.identify_inputs_and_outputs([x], [previous]).unwrap();
    model
}

/// Diamond where one temporary feeds two branches that meet again.
///
/// Graph structure:
/// - Input: `x` = 0, constant `c` = 1 (0.5)
/// - `t` = 2 = `ADD(x, c)`
/// - `u` = 3 = `FLOOR(t)`, also a model output
/// - `w` = 4 = `ADD(u, t)`
/// - Outputs: `[w, u]`
pub fn diamond_model() -> Model {
    let mut model = Model::new();
    let operand = || Operand::new(OperandType::TensorFloat32, [CHAIN_WIDTH]);
    let x = model.add_operand(operand());
    let c = model.add_operand(operand());
    let t = model.add_operand(operand());
    let u = model.add_operand(operand());
    let w = model.add_operand(operand());
    model
        .set_operand_value(c, floats(&[0.5; CHAIN_WIDTH as usize]))
        .unwrap();
    model.add_operation(OperationType::Add, [x, c], [t]).unwrap();
    model.add_operation(OperationType::Floor, [t], [u]).unwrap();
    model.add_operation(OperationType::Add, [u, t], [w]).unwrap();
    model.identify_inputs_and_outputs([x], [w, u]).unwrap();
    model
}

/// Reference result of [`chain_model`] for one input value.
pub fn chain_reference(input: f32, length: usize) -> f32 {
    (0..length).fold(input, |value, i| if i % 2 == 0 { value + 0.5 } else { value.floor() })
}

/// A sample device that only runs ADD.
pub fn add_only() -> SampleConfig {
    SampleConfig::default().with_supported([float_tuple(OperationType::Add)])
}

/// A sample device that only runs FLOOR.
pub fn floor_only() -> SampleConfig {
    SampleConfig::default().with_supported([float_tuple(OperationType::Floor)])
}

/// Discover a registry over in-process sample drivers.
pub fn registry(properties: MapProperties, drivers: Vec<(&str, SampleConfig)>) -> DeviceRegistry {
    let manager = drivers
        .into_iter()
        .fold(StaticServiceManager::new(), |manager, (name, config)| {
            manager.with(name, SampleDriver::new(name, config))
        });
    DeviceRegistry::discover(Some(&manager), Arc::new(properties))
}
