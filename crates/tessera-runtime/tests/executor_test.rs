//! Preparing and running partitioned plans end to end.

mod common;

use common::*;
use tessera_hal::{ErrorStatus, ExecutionPreference, MeasureTiming};
use tessera_runtime::{ExecutionError, ExecutionPlan, MapProperties, PlanExecutor};
use tessera_sample_driver::SampleConfig;

fn run(plan: &ExecutionPlan, input: &[f32]) -> Result<Vec<f32>, ExecutionError> {
    let executor = PlanExecutor::prepare(plan, ExecutionPreference::default())?;
    let outputs = executor.execute(vec![floats(input)], MeasureTiming::No)?;
    assert_eq!(outputs.len(), 1);
    Ok(to_floats(&outputs[0]))
}

#[test]
fn test_split_plan_matches_single_device() {
    init_logging();
    let input = [-1.25, 0.0, 0.75, 3.5];
    let model = chain_model(5);

    let single = registry(MapProperties::new(), vec![("sample-all", SampleConfig::default())]);
    let single_plan =
        ExecutionPlan::partition(&model, single.devices(), ExecutionPreference::default()).unwrap();
    assert_eq!(single_plan.steps().len(), 1);

    let split = registry(
        MapProperties::new(),
        vec![("sample-float", add_only()), ("sample-floor", floor_only())],
    );
    let split_plan =
        ExecutionPlan::partition(&model, split.devices(), ExecutionPreference::default()).unwrap();
    assert_eq!(split_plan.steps().len(), 5);

    let expected: Vec<f32> = input.iter().map(|&x| chain_reference(x, 5)).collect();
    assert_eq!(run(&single_plan, &input).unwrap(), expected);
    assert_eq!(run(&split_plan, &input).unwrap(), expected);
}

#[test]
fn test_timing_is_reported_per_step() {
    let model = chain_model(2);
    let split = registry(
        MapProperties::new(),
        vec![("sample-float", add_only()), ("sample-floor", floor_only())],
    );
    let plan = ExecutionPlan::partition(&model, split.devices(), ExecutionPreference::default()).unwrap();
    let executor = PlanExecutor::prepare(&plan, ExecutionPreference::default()).unwrap();

    let (outputs, timings) = executor
        .execute_timed(vec![floats(&[1.0; 4])], MeasureTiming::Yes)
        .unwrap();
    assert_eq!(to_floats(&outputs[0]), vec![1.0; 4]);
    assert_eq!(timings.len(), 2);
    assert!(timings.iter().all(|timing| timing.is_available()));

    let (_, timings) = executor
        .execute_timed(vec![floats(&[1.0; 4])], MeasureTiming::No)
        .unwrap();
    assert!(timings.iter().all(|timing| !timing.is_available()));
}

#[test]
fn test_failing_step_fails_the_plan() {
    let model = chain_model(3);
    let split = registry(
        MapProperties::new(),
        vec![
            ("sample-float", add_only()),
            (
                "sample-floor",
                floor_only().with_execution_status(ErrorStatus::GeneralFailure),
            ),
        ],
    );
    let plan = ExecutionPlan::partition(&model, split.devices(), ExecutionPreference::default()).unwrap();

    let err = run(&plan, &[0.0; 4]).unwrap_err();
    match err {
        ExecutionError::Execute { step, device, status } => {
            assert_eq!(step, 1);
            assert_eq!(device, "sample-floor");
            assert_eq!(status, ErrorStatus::GeneralFailure);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_failing_preparation_names_the_step() {
    let model = chain_model(2);
    let split = registry(
        MapProperties::new(),
        vec![
            ("sample-float", add_only()),
            (
                "sample-floor",
                floor_only().with_preparation_status(ErrorStatus::DeviceUnavailable),
            ),
        ],
    );
    let plan = ExecutionPlan::partition(&model, split.devices(), ExecutionPreference::default()).unwrap();

    let err = PlanExecutor::prepare(&plan, ExecutionPreference::default()).unwrap_err();
    assert!(matches!(
        err,
        ExecutionError::Prepare {
            step: 1,
            status: ErrorStatus::DeviceUnavailable,
            ..
        }
    ));
}

#[test]
fn test_wrong_input_count_is_rejected() {
    let model = chain_model(1);
    let single = registry(MapProperties::new(), vec![("sample-all", SampleConfig::default())]);
    let plan = ExecutionPlan::partition(&model, single.devices(), ExecutionPreference::default()).unwrap();
    let executor = PlanExecutor::prepare(&plan, ExecutionPreference::default()).unwrap();

    let err = executor.execute(Vec::new(), MeasureTiming::No).unwrap_err();
    assert!(matches!(err, ExecutionError::InvalidInputOutput(_)));
}

#[test]
fn test_diamond_plan_wires_shared_values() {
    let model = diamond_model();
    let split = registry(
        MapProperties::new(),
        vec![("sample-float", add_only()), ("sample-floor", floor_only())],
    );
    let plan = ExecutionPlan::partition(&model, split.devices(), ExecutionPreference::default()).unwrap();
    assert_eq!(plan.steps().len(), 3);

    let executor = PlanExecutor::prepare(&plan, ExecutionPreference::default()).unwrap();
    let outputs = executor
        .execute(vec![floats(&[0.25, 1.75, -0.75, 2.0])], MeasureTiming::No)
        .unwrap();

    // t = x + 0.5, u = floor(t), w = u + t; outputs are [w, u].
    assert_eq!(outputs.len(), 2);
    assert_eq!(to_floats(&outputs[0]), vec![0.75, 4.25, -1.25, 4.5]);
    assert_eq!(to_floats(&outputs[1]), vec![0.0, 2.0, -1.0, 2.0]);
}
