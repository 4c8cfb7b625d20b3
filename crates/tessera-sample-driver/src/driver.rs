//! The sample device and its prepared models.

use crate::cache::{self, CacheKey};
use crate::interpreter;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tessera_hal::{
    CacheHandle, CacheToken, Capabilities, CapabilitiesV1_0, CapabilitiesV1_1, DeviceStatus,
    DeviceType, DeviceV1_0, DeviceV1_1, DeviceV1_2, ErrorStatus, ExecutionCallback,
    ExecutionPreference, Extension, HalVersion, MeasureTiming, Model, OperationTuple, OutputShape,
    PerformanceInfo, PreparedModelCallback, PreparedModelV1_0, PreparedModelV1_2, Reply, Request,
    Timing,
};

/// Behaviour of a [`SampleDriver`].
#[derive(Debug, Clone)]
pub struct SampleConfig {
    /// Newest revision the driver exposes through its casts.
    pub version: HalVersion,
    pub device_type: DeviceType,
    pub version_string: String,
    pub float32_performance: PerformanceInfo,
    pub quantized8_performance: PerformanceInfo,
    pub relaxed_performance: PerformanceInfo,
    /// Declared support; also decides `get_supported_operations` answers.
    pub supported_operation_tuples: Vec<OperationTuple>,
    pub extensions: Vec<Extension>,
    pub caching: bool,
    pub status: DeviceStatus,
    /// Status of capability, type, version and extension queries.
    pub query_status: ErrorStatus,
    /// Status delivered by the background preparation task.
    pub preparation_status: ErrorStatus,
    /// Status reported by every execution.
    pub execution_status: ErrorStatus,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            version: HalVersion::V1_2,
            device_type: DeviceType::Cpu,
            version_string: format!("tessera-sample/{}", env!("CARGO_PKG_VERSION")),
            float32_performance: PerformanceInfo::new(1.0, 1.0),
            quantized8_performance: PerformanceInfo::new(1.0, 1.0),
            relaxed_performance: PerformanceInfo::new(1.0, 1.0),
            supported_operation_tuples: interpreter::executable_tuples(),
            extensions: Vec::new(),
            caching: true,
            status: DeviceStatus::Available,
            query_status: ErrorStatus::None,
            preparation_status: ErrorStatus::None,
            execution_status: ErrorStatus::None,
        }
    }
}

impl SampleConfig {
    pub fn with_version(mut self, version: HalVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_supported(mut self, tuples: impl IntoIterator<Item = OperationTuple>) -> Self {
        self.supported_operation_tuples = tuples.into_iter().collect();
        self
    }

    /// Set float32 and quantized8 performance to the same figures.
    pub fn with_performance(mut self, exec_time: f32, power_usage: f32) -> Self {
        let info = PerformanceInfo::new(exec_time, power_usage);
        self.float32_performance = info;
        self.quantized8_performance = info;
        self.relaxed_performance = info;
        self
    }

    pub fn with_caching(mut self, caching: bool) -> Self {
        self.caching = caching;
        self
    }

    pub fn with_query_status(mut self, status: ErrorStatus) -> Self {
        self.query_status = status;
        self
    }

    pub fn with_preparation_status(mut self, status: ErrorStatus) -> Self {
        self.preparation_status = status;
        self
    }

    pub fn with_execution_status(mut self, status: ErrorStatus) -> Self {
        self.execution_status = status;
        self
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            float32_performance: self.float32_performance,
            quantized8_performance: self.quantized8_performance,
            relaxed_float32_to_float16_performance: self.relaxed_performance,
            caches_compilation: self.caching,
            supported_operation_tuples: self.supported_operation_tuples.clone(),
        }
    }
}

/// In-process driver implementing every HAL revision.
pub struct SampleDriver {
    name: String,
    config: SampleConfig,
    cache_key: CacheKey,
}

impl SampleDriver {
    /// Create a driver. Each instance signs its caches with a fresh random key.
    pub fn new(name: impl Into<String>, config: SampleConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            config,
            cache_key: rand::random(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SampleConfig {
        &self.config
    }

    fn supported_operations(&self, model: &Model, reply: Reply<Vec<bool>>) {
        if let Err(e) = model.validate() {
            tracing::warn!(driver = %self.name, "Rejecting model query: {e}");
            reply(ErrorStatus::InvalidArgument, Vec::new());
            return;
        }
        let supported = (0..model.operations().len() as u32)
            .map(|i| {
                model
                    .operation_tuple(i)
                    .map(|tuple| self.config.supported_operation_tuples.contains(&tuple))
                    .unwrap_or(false)
            })
            .collect();
        reply(ErrorStatus::None, supported);
    }

    fn check_model(&self, model: &Model) -> ErrorStatus {
        if let Err(e) = model.validate() {
            tracing::warn!(driver = %self.name, "Rejecting model: {e}");
            return ErrorStatus::InvalidArgument;
        }
        for i in 0..model.operations().len() as u32 {
            match model.operation_tuple(i) {
                Ok(tuple) if self.config.supported_operation_tuples.contains(&tuple) => {}
                _ => {
                    tracing::warn!(driver = %self.name, "Operation {i} is not supported");
                    return ErrorStatus::InvalidArgument;
                }
            }
        }
        ErrorStatus::None
    }

    fn prepare(&self, model: &Model, callback: Arc<PreparedModelCallback>) -> ErrorStatus {
        let status = self.check_model(model);
        if !status.is_ok() {
            callback.notify(status, None);
            return status;
        }
        self.launch_preparation(model.clone(), callback)
    }

    fn launch_preparation(&self, model: Model, callback: Arc<PreparedModelCallback>) -> ErrorStatus {
        let prepared = SamplePreparedModel {
            name: self.name.clone(),
            model: Arc::new(model),
            version: self.config.version,
            caching: self.config.caching,
            cache_key: self.cache_key,
            execution_status: self.config.execution_status,
        };
        let status = self.config.preparation_status;
        let notifier = Arc::clone(&callback);

        let spawned = thread::Builder::new()
            .name(format!("{}-prepare", self.name))
            .spawn(move || {
                if status.is_ok() {
                    let prepared: Arc<dyn PreparedModelV1_0> = Arc::new(prepared);
                    notifier.notify(ErrorStatus::None, Some(prepared));
                } else {
                    notifier.notify(status, None);
                }
            });

        match spawned {
            Ok(_) => {
                tracing::debug!(driver = %self.name, "Preparation launched");
                ErrorStatus::None
            }
            Err(e) => {
                tracing::error!(driver = %self.name, "Failed to launch preparation: {e}");
                callback.notify(ErrorStatus::GeneralFailure, None);
                ErrorStatus::GeneralFailure
            }
        }
    }
}

impl DeviceV1_0 for SampleDriver {
    fn get_capabilities(&self, reply: Reply<CapabilitiesV1_0>) {
        reply(
            self.config.query_status,
            CapabilitiesV1_0::from(&self.config.capabilities()),
        );
    }

    fn get_supported_operations(&self, model: &Model, reply: Reply<Vec<bool>>) {
        self.supported_operations(model, reply);
    }

    fn prepare_model(&self, model: &Model, callback: Arc<PreparedModelCallback>) -> ErrorStatus {
        self.prepare(model, callback)
    }

    fn get_status(&self) -> DeviceStatus {
        self.config.status
    }

    fn cast_v1_1(self: Arc<Self>) -> Option<Arc<dyn DeviceV1_1>> {
        if self.config.version >= HalVersion::V1_1 {
            Some(self)
        } else {
            None
        }
    }

    fn cast_v1_2(self: Arc<Self>) -> Option<Arc<dyn DeviceV1_2>> {
        if self.config.version >= HalVersion::V1_2 {
            Some(self)
        } else {
            None
        }
    }
}

impl DeviceV1_1 for SampleDriver {
    fn get_capabilities_1_1(&self, reply: Reply<CapabilitiesV1_1>) {
        reply(
            self.config.query_status,
            CapabilitiesV1_1::from(&self.config.capabilities()),
        );
    }

    fn get_supported_operations_1_1(&self, model: &Model, reply: Reply<Vec<bool>>) {
        self.supported_operations(model, reply);
    }

    fn prepare_model_1_1(
        &self,
        model: &Model,
        _preference: ExecutionPreference,
        callback: Arc<PreparedModelCallback>,
    ) -> ErrorStatus {
        self.prepare(model, callback)
    }
}

impl DeviceV1_2 for SampleDriver {
    fn get_version_string(&self, reply: Reply<String>) {
        reply(self.config.query_status, self.config.version_string.clone());
    }

    fn get_type(&self, reply: Reply<DeviceType>) {
        reply(self.config.query_status, self.config.device_type);
    }

    fn get_capabilities_1_2(&self, reply: Reply<Capabilities>) {
        reply(self.config.query_status, self.config.capabilities());
    }

    fn get_supported_extensions(&self, reply: Reply<Vec<Extension>>) {
        reply(self.config.query_status, self.config.extensions.clone());
    }

    fn get_supported_operations_1_2(&self, model: &Model, reply: Reply<Vec<bool>>) {
        self.supported_operations(model, reply);
    }

    fn is_caching_supported(&self, reply: Reply<bool>) {
        reply(self.config.query_status, self.config.caching);
    }

    fn prepare_model_1_2(
        &self,
        model: &Model,
        _preference: ExecutionPreference,
        callback: Arc<PreparedModelCallback>,
    ) -> ErrorStatus {
        self.prepare(model, callback)
    }

    fn prepare_model_from_cache(
        &self,
        model_cache: &CacheHandle,
        data_cache: &CacheHandle,
        token: &CacheToken,
        callback: Arc<PreparedModelCallback>,
    ) -> ErrorStatus {
        if !self.config.caching {
            callback.notify(ErrorStatus::GeneralFailure, None);
            return ErrorStatus::GeneralFailure;
        }

        let restored = model_cache
            .read_all()
            .and_then(|model_bytes| Ok((model_bytes, data_cache.read_all()?)));
        let (model_bytes, data_bytes) = match restored {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(driver = %self.name, "Failed to read compilation cache: {e}");
                callback.notify(ErrorStatus::GeneralFailure, None);
                return ErrorStatus::GeneralFailure;
            }
        };

        let model = match cache::decode(&model_bytes, &data_bytes, token, &self.cache_key) {
            Ok(model) => model,
            Err(e) => {
                tracing::warn!(driver = %self.name, "Rejecting compilation cache: {e}");
                callback.notify(ErrorStatus::GeneralFailure, None);
                return ErrorStatus::GeneralFailure;
            }
        };
        if !self.check_model(&model).is_ok() {
            tracing::warn!(driver = %self.name, "Cached model failed validation");
            callback.notify(ErrorStatus::GeneralFailure, None);
            return ErrorStatus::GeneralFailure;
        }
        self.launch_preparation(model, callback)
    }
}

/// A model compiled by [`SampleDriver`].
pub struct SamplePreparedModel {
    name: String,
    model: Arc<Model>,
    version: HalVersion,
    caching: bool,
    cache_key: CacheKey,
    execution_status: ErrorStatus,
}

impl SamplePreparedModel {
    fn check_request(&self, request: &Request) -> ErrorStatus {
        let arguments_fit = request
            .inputs
            .iter()
            .chain(&request.outputs)
            .all(|argument| (argument.location.pool_index as usize) < request.pools.len());
        if request.inputs.len() != self.model.input_indexes().len()
            || request.outputs.len() != self.model.output_indexes().len()
            || !arguments_fit
        {
            tracing::warn!(driver = %self.name, "Rejecting malformed request");
            return ErrorStatus::InvalidArgument;
        }
        ErrorStatus::None
    }

    fn launch(
        &self,
        request: &Request,
        measure: MeasureTiming,
        callback: Arc<ExecutionCallback>,
        with_shapes: bool,
    ) -> ErrorStatus {
        let status = self.check_request(request);
        if !status.is_ok() {
            callback.notify(status);
            return status;
        }

        let model = Arc::clone(&self.model);
        let request = request.clone();
        let forced = self.execution_status;
        let notifier = Arc::clone(&callback);
        let spawned = thread::Builder::new()
            .name(format!("{}-execute", self.name))
            .spawn(move || {
                let (status, shapes, timing) = compute(&model, forced, &request, measure);
                if with_shapes {
                    notifier.notify_1_2(status, shapes, timing);
                } else {
                    notifier.notify(status);
                }
            });

        match spawned {
            Ok(_) => ErrorStatus::None,
            Err(e) => {
                tracing::error!(driver = %self.name, "Failed to launch execution: {e}");
                callback.notify(ErrorStatus::GeneralFailure);
                ErrorStatus::GeneralFailure
            }
        }
    }
}

fn compute(
    model: &Model,
    forced: ErrorStatus,
    request: &Request,
    measure: MeasureTiming,
) -> (ErrorStatus, Vec<OutputShape>, Timing) {
    if !forced.is_ok() {
        return (forced, Vec::new(), Timing::UNAVAILABLE);
    }
    let start = Instant::now();
    let (status, shapes) = interpreter::run(model, request);
    let timing = if measure == MeasureTiming::Yes && status.is_ok() {
        let micros = start.elapsed().as_micros() as u64;
        Timing {
            time_on_device: micros,
            time_in_driver: micros,
        }
    } else {
        Timing::UNAVAILABLE
    };
    (status, shapes, timing)
}

impl PreparedModelV1_0 for SamplePreparedModel {
    fn execute(&self, request: &Request, callback: Arc<ExecutionCallback>) -> ErrorStatus {
        self.launch(request, MeasureTiming::No, callback, false)
    }

    fn cast_v1_2(self: Arc<Self>) -> Option<Arc<dyn PreparedModelV1_2>> {
        if self.version >= HalVersion::V1_2 {
            Some(self)
        } else {
            None
        }
    }
}

impl PreparedModelV1_2 for SamplePreparedModel {
    fn execute_1_2(
        &self,
        request: &Request,
        measure: MeasureTiming,
        callback: Arc<ExecutionCallback>,
    ) -> ErrorStatus {
        self.launch(request, measure, callback, true)
    }

    fn execute_synchronously(
        &self,
        request: &Request,
        measure: MeasureTiming,
        reply: Reply<(Vec<OutputShape>, Timing)>,
    ) {
        let status = self.check_request(request);
        if !status.is_ok() {
            reply(status, (Vec::new(), Timing::UNAVAILABLE));
            return;
        }
        let (status, shapes, timing) = compute(&self.model, self.execution_status, request, measure);
        reply(status, (shapes, timing));
    }

    fn save_to_cache(
        &self,
        model_cache: &CacheHandle,
        data_cache: &CacheHandle,
        token: &CacheToken,
    ) -> ErrorStatus {
        if !self.caching {
            return ErrorStatus::GeneralFailure;
        }
        match (model_cache.is_empty(), data_cache.is_empty()) {
            (Ok(true), Ok(true)) => {}
            (Ok(_), Ok(_)) => {
                tracing::warn!(driver = %self.name, "Cache files must be empty");
                return ErrorStatus::InvalidArgument;
            }
            _ => return ErrorStatus::GeneralFailure,
        }

        let model_bytes = cache::encode_model_cache(&self.model, token, &self.cache_key);
        let data_bytes = cache::encode_data_cache(&self.model);
        let written = model_cache
            .write_all(&model_bytes)
            .and_then(|()| data_cache.write_all(&data_bytes));
        match written {
            Ok(()) => {
                tracing::debug!(
                    driver = %self.name,
                    model_bytes = model_bytes.len(),
                    data_bytes = data_bytes.len(),
                    "Saved compilation cache"
                );
                ErrorStatus::None
            }
            Err(e) => {
                tracing::error!(driver = %self.name, "Failed to write compilation cache: {e}");
                ErrorStatus::GeneralFailure
            }
        }
    }
}
