//! Driver-level tests for the sample driver, talking to it through the raw
//! HAL traits without the runtime facade.

use std::sync::Arc;
use std::sync::mpsc;
use tessera_hal::{
    CacheHandle, DeviceV1_0, DeviceV1_2, ErrorStatus, ExecutionCallback, ExecutionPreference,
    HalVersion, MeasureTiming, Model, Operand, OperandType, OperationType, PreparedModelCallback,
    PreparedModelV1_0, PreparedModelV1_2, Request,
};
use tessera_sample_driver::{SampleConfig, SampleDriver};

fn floats(values: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

/// out = floor(a) * c, with c = [2, 2, 2] held as a constant.
fn floor_mul_model() -> Model {
    let mut model = Model::new();
    let a = model.add_operand(Operand::new(OperandType::TensorFloat32, [3]));
    let f = model.add_operand(Operand::new(OperandType::TensorFloat32, [3]));
    let c = model.add_operand(Operand::new(OperandType::TensorFloat32, [3]));
    let out = model.add_operand(Operand::new(OperandType::TensorFloat32, [3]));
    model.set_operand_value(c, floats(&[2.0, 2.0, 2.0])).unwrap();
    model.add_operation(OperationType::Floor, [a], [f]).unwrap();
    model.add_operation(OperationType::Mul, [f, c], [out]).unwrap();
    model.identify_inputs_and_outputs([a], [out]).unwrap();
    model
}

fn prepare(driver: &Arc<SampleDriver>, model: &Model) -> Arc<dyn PreparedModelV1_2> {
    let device = Arc::clone(driver).cast_v1_2().unwrap();
    let callback = PreparedModelCallback::new();
    let status = device.prepare_model_1_2(model, ExecutionPreference::default(), callback.clone());
    assert_eq!(status, ErrorStatus::None);
    assert_eq!(callback.status(), ErrorStatus::None);
    callback.prepared_model().unwrap().cast_v1_2().unwrap()
}

fn run_sync(prepared: &Arc<dyn PreparedModelV1_2>, input: &[f32]) -> (ErrorStatus, Vec<f32>) {
    let request = Request::from_buffers(vec![floats(input)], &[input.len() * 4]);
    let (tx, rx) = mpsc::channel();
    prepared.execute_synchronously(
        &request,
        MeasureTiming::No,
        Box::new(move |status, _| {
            let _ = tx.send(status);
        }),
    );
    let status = rx.recv().unwrap();
    let output = bytemuck::pod_collect_to_vec(&request.output(0).unwrap());
    (status, output)
}

fn empty_cache() -> CacheHandle {
    CacheHandle::new(tempfile::tempfile().unwrap())
}

#[test]
fn test_prepare_and_execute_async() {
    let driver = SampleDriver::new("sample-a", SampleConfig::default());
    let prepared = prepare(&driver, &floor_mul_model());

    let request = Request::from_buffers(vec![floats(&[1.5, -0.5, 3.0])], &[12]);
    let callback = ExecutionCallback::new();
    assert_eq!(
        prepared.execute_1_2(&request, MeasureTiming::Yes, callback.clone()),
        ErrorStatus::None
    );
    let (status, shapes, timing) = callback.result();
    assert_eq!(status, ErrorStatus::None);
    assert_eq!(shapes[0].dimensions, vec![3]);
    assert!(timing.is_available());
    let output: Vec<f32> = bytemuck::pod_collect_to_vec(&request.output(0).unwrap());
    assert_eq!(output, vec![2.0, -2.0, 6.0]);
}

#[test]
fn test_unsupported_model_rejected_synchronously() {
    let config = SampleConfig::default().with_supported([]);
    let driver = SampleDriver::new("sample-none", config);
    let callback = PreparedModelCallback::new();
    let status = driver.prepare_model(&floor_mul_model(), callback.clone());
    assert_eq!(status, ErrorStatus::InvalidArgument);
    assert!(callback.is_notified());
    assert_eq!(callback.status(), ErrorStatus::InvalidArgument);
    assert!(callback.prepared_model().is_none());
}

#[test]
fn test_preparation_failure_reported_through_callback() {
    let config = SampleConfig::default().with_preparation_status(ErrorStatus::DeviceUnavailable);
    let driver = SampleDriver::new("sample-busy", config);
    let callback = PreparedModelCallback::new();
    assert_eq!(
        driver.prepare_model(&floor_mul_model(), callback.clone()),
        ErrorStatus::None
    );
    assert_eq!(callback.status(), ErrorStatus::DeviceUnavailable);
    assert!(callback.prepared_model().is_none());
}

#[test]
fn test_version_cap_limits_casts() {
    let driver = SampleDriver::new(
        "sample-old",
        SampleConfig::default().with_version(HalVersion::V1_1),
    );
    let handle: Arc<dyn DeviceV1_0> = driver;
    assert!(Arc::clone(&handle).cast_v1_1().is_some());
    assert!(handle.cast_v1_2().is_none());
}

#[test]
fn test_cache_round_trip() {
    let driver = SampleDriver::new("sample-cache", SampleConfig::default());
    let prepared = prepare(&driver, &floor_mul_model());
    let token = [9u8; 32];
    let (model_cache, data_cache) = (empty_cache(), empty_cache());
    assert_eq!(
        prepared.save_to_cache(&model_cache, &data_cache, &token),
        ErrorStatus::None
    );

    let device = Arc::clone(&driver).cast_v1_2().unwrap();
    let callback = PreparedModelCallback::new();
    assert_eq!(
        device.prepare_model_from_cache(&model_cache, &data_cache, &token, callback.clone()),
        ErrorStatus::None
    );
    let restored = callback.prepared_model().unwrap().cast_v1_2().unwrap();
    assert_eq!(run_sync(&restored, &[0.2, 1.7, -1.2]), (ErrorStatus::None, vec![0.0, 2.0, -4.0]));
}

#[test]
fn test_save_to_non_empty_cache_is_invalid() {
    let driver = SampleDriver::new("sample-cache", SampleConfig::default());
    let prepared = prepare(&driver, &floor_mul_model());
    let model_cache = empty_cache();
    model_cache.write_all(b"stale").unwrap();
    assert_eq!(
        prepared.save_to_cache(&model_cache, &empty_cache(), &[0; 32]),
        ErrorStatus::InvalidArgument
    );
}

#[test]
fn test_tampered_model_cache_fails_closed() {
    let driver = SampleDriver::new("sample-cache", SampleConfig::default());
    let prepared = prepare(&driver, &floor_mul_model());
    let token = [1u8; 32];
    let (model_cache, data_cache) = (empty_cache(), empty_cache());
    prepared.save_to_cache(&model_cache, &data_cache, &token);

    let mut bytes = model_cache.read_all().unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0xff;
    model_cache.write_all(&bytes).unwrap();

    let device = Arc::clone(&driver).cast_v1_2().unwrap();
    let callback = PreparedModelCallback::new();
    let status = device.prepare_model_from_cache(&model_cache, &data_cache, &token, callback.clone());
    assert_eq!(status, ErrorStatus::GeneralFailure);
    assert_eq!(callback.status(), ErrorStatus::GeneralFailure);
    assert!(callback.prepared_model().is_none());
}

#[test]
fn test_cache_from_other_driver_is_rejected() {
    let writer = SampleDriver::new("sample-writer", SampleConfig::default());
    let reader = SampleDriver::new("sample-reader", SampleConfig::default());
    let prepared = prepare(&writer, &floor_mul_model());
    let token = [5u8; 32];
    let (model_cache, data_cache) = (empty_cache(), empty_cache());
    assert_eq!(
        prepared.save_to_cache(&model_cache, &data_cache, &token),
        ErrorStatus::None
    );

    let device = reader.cast_v1_2().unwrap();
    let callback = PreparedModelCallback::new();
    let status = device.prepare_model_from_cache(&model_cache, &data_cache, &token, callback.clone());
    assert_eq!(status, ErrorStatus::GeneralFailure);
}

#[test]
fn test_driver_without_caching_declines() {
    let config = SampleConfig::default().with_caching(false);
    let driver = SampleDriver::new("sample-nocache", config);
    let prepared = prepare(&driver, &floor_mul_model());
    assert_eq!(
        prepared.save_to_cache(&empty_cache(), &empty_cache(), &[0; 32]),
        ErrorStatus::GeneralFailure
    );
}

#[test]
fn test_data_cache_missing_constants_fails_closed() {
    let driver = SampleDriver::new("sample-cache", SampleConfig::default());
    let prepared = prepare(&driver, &floor_mul_model());
    let token = [2u8; 32];
    let (model_cache, data_cache) = (empty_cache(), empty_cache());
    assert_eq!(
        prepared.save_to_cache(&model_cache, &data_cache, &token),
        ErrorStatus::None
    );

    // Zero constant records.
    data_cache.write_all(&0u32.to_le_bytes()).unwrap();

    let device = Arc::clone(&driver).cast_v1_2().unwrap();
    let callback = PreparedModelCallback::new();
    let status = device.prepare_model_from_cache(&model_cache, &data_cache, &token, callback.clone());
    assert_eq!(status, ErrorStatus::GeneralFailure);
    assert_eq!(callback.status(), ErrorStatus::GeneralFailure);
    assert!(callback.prepared_model().is_none());
}
