//! Version-independent facade over device and prepared-model handles.
//!
//! A handle is resolved once, at construction, to the newest revision it
//! implements. Every call then matches on that resolved revision instead of
//! probing again. Callback-style driver queries are turned into blocking calls
//! returning `(status, value)`.

use crate::burst::ExecutionBurstController;
use std::sync::Arc;
use std::sync::mpsc;
use tessera_hal::{
    CacheHandle, CacheToken, Capabilities, DeviceStatus, DeviceType, DeviceV1_0, DeviceV1_1,
    DeviceV1_2, ErrorStatus, ExecutionCallback, ExecutionPreference, Extension, HalVersion,
    MeasureTiming, Model, OutputShape, PreparedModelCallback, PreparedModelV1_0,
    PreparedModelV1_2, Reply, Request, Timing,
};

/// Issue a callback-style query and block until its reply arrives.
///
/// A reply dropped without being called reads as `GeneralFailure`.
pub(crate) fn wait_for_reply<T: Default + Send + 'static>(
    what: &str,
    call: impl FnOnce(Reply<T>),
) -> (ErrorStatus, T) {
    let (tx, rx) = mpsc::channel();
    call(Box::new(move |status: ErrorStatus, value: T| {
        let _ = tx.send((status, value));
    }));
    rx.recv().unwrap_or_else(|_| {
        tracing::error!("{what}: driver dropped its reply without answering");
        (ErrorStatus::GeneralFailure, T::default())
    })
}

/// Enforce the result contract of synchronous execution.
///
/// Shapes survive only with `None` or `OutputInsufficientSize`. Timing
/// survives only when it was requested and execution succeeded.
pub(crate) fn sanitize_execution(
    status: ErrorStatus,
    output_shapes: Vec<OutputShape>,
    timing: Timing,
    measure: MeasureTiming,
) -> (ErrorStatus, Vec<OutputShape>, Timing) {
    let output_shapes = match status {
        ErrorStatus::None | ErrorStatus::OutputInsufficientSize => output_shapes,
        _ => Vec::new(),
    };
    let timing = if measure == MeasureTiming::Yes && status.is_ok() {
        timing
    } else {
        Timing::UNAVAILABLE
    };
    (status, output_shapes, timing)
}

fn fail_preparation(callback: &PreparedModelCallback, status: ErrorStatus) -> ErrorStatus {
    callback.notify(status, None);
    status
}

/// Make sure a failed launch still fires the callback once.
fn settle_launch(callback: &PreparedModelCallback, status: ErrorStatus) -> ErrorStatus {
    if !status.is_ok() && !callback.is_notified() {
        callback.notify(status, None);
    }
    status
}

enum DeviceRevision {
    V1_0,
    V1_1(Arc<dyn DeviceV1_1>),
    V1_2(Arc<dyn DeviceV1_2>),
}

struct ResolvedDevice {
    v1_0: Arc<dyn DeviceV1_0>,
    revision: DeviceRevision,
}

/// A device handle bound to its richest interface revision.
pub struct VersionedDevice {
    resolved: Option<ResolvedDevice>,
}

impl VersionedDevice {
    /// Resolve `device` to the newest revision it implements.
    pub fn new(device: Arc<dyn DeviceV1_0>) -> Self {
        let revision = if let Some(v1_2) = Arc::clone(&device).cast_v1_2() {
            DeviceRevision::V1_2(v1_2)
        } else if let Some(v1_1) = Arc::clone(&device).cast_v1_1() {
            DeviceRevision::V1_1(v1_1)
        } else {
            DeviceRevision::V1_0
        };
        Self {
            resolved: Some(ResolvedDevice {
                v1_0: device,
                revision,
            }),
        }
    }

    /// A facade without a handle. Every query fails.
    pub fn invalid() -> Self {
        Self { resolved: None }
    }

    pub fn is_valid(&self) -> bool {
        self.resolved.is_some()
    }

    /// Resolved revision, `None` for an invalid facade.
    pub fn version(&self) -> Option<HalVersion> {
        self.resolved.as_ref().map(|r| match r.revision {
            DeviceRevision::V1_0 => HalVersion::V1_0,
            DeviceRevision::V1_1(_) => HalVersion::V1_1,
            DeviceRevision::V1_2(_) => HalVersion::V1_2,
        })
    }

    pub fn get_capabilities(&self) -> (ErrorStatus, Capabilities) {
        let Some(resolved) = &self.resolved else {
            return (ErrorStatus::DeviceUnavailable, Capabilities::default());
        };
        match &resolved.revision {
            DeviceRevision::V1_2(device) => {
                wait_for_reply("getCapabilities_1_2", |reply| device.get_capabilities_1_2(reply))
            }
            DeviceRevision::V1_1(device) => {
                let (status, caps) =
                    wait_for_reply("getCapabilities_1_1", |reply| device.get_capabilities_1_1(reply));
                (status, caps.into())
            }
            DeviceRevision::V1_0 => {
                let (status, caps) =
                    wait_for_reply("getCapabilities", |reply| resolved.v1_0.get_capabilities(reply));
                (status, caps.into())
            }
        }
    }

    /// Extensions are a V1_2 concept. Older revisions report none.
    pub fn get_supported_extensions(&self) -> (ErrorStatus, Vec<Extension>) {
        let Some(resolved) = &self.resolved else {
            return (ErrorStatus::DeviceUnavailable, Vec::new());
        };
        match &resolved.revision {
            DeviceRevision::V1_2(device) => wait_for_reply("getSupportedExtensions", |reply| {
                device.get_supported_extensions(reply)
            }),
            DeviceRevision::V1_1(_) | DeviceRevision::V1_0 => (ErrorStatus::None, Vec::new()),
        }
    }

    /// One entry per operation of `model`.
    ///
    /// A model the resolved revision cannot represent is a `GeneralFailure`.
    pub fn get_supported_operations(&self, model: &Model) -> (ErrorStatus, Vec<bool>) {
        let Some(resolved) = &self.resolved else {
            return (ErrorStatus::DeviceUnavailable, Vec::new());
        };
        let Some(version) = self.version() else {
            return (ErrorStatus::DeviceUnavailable, Vec::new());
        };
        if !model.is_compliant_with(version) {
            tracing::warn!(
                %version,
                required = %model.min_version(),
                "getSupportedOperations: model is not representable on this device"
            );
            return (ErrorStatus::GeneralFailure, Vec::new());
        }

        let (status, supported) = match &resolved.revision {
            DeviceRevision::V1_2(device) => wait_for_reply("getSupportedOperations_1_2", |reply| {
                device.get_supported_operations_1_2(model, reply)
            }),
            DeviceRevision::V1_1(device) => wait_for_reply("getSupportedOperations_1_1", |reply| {
                device.get_supported_operations_1_1(model, reply)
            }),
            DeviceRevision::V1_0 => wait_for_reply("getSupportedOperations", |reply| {
                resolved.v1_0.get_supported_operations(model, reply)
            }),
        };
        if status.is_ok() && supported.len() != model.operations().len() {
            tracing::error!(
                expected = model.operations().len(),
                got = supported.len(),
                "getSupportedOperations returned the wrong number of entries"
            );
            return (ErrorStatus::GeneralFailure, Vec::new());
        }
        (status, supported)
    }

    /// Launch compilation of `model`. `callback` fires exactly once.
    pub fn prepare_model(
        &self,
        model: &Model,
        preference: ExecutionPreference,
        callback: &Arc<PreparedModelCallback>,
    ) -> ErrorStatus {
        let Some(resolved) = &self.resolved else {
            return fail_preparation(callback, ErrorStatus::DeviceUnavailable);
        };
        let Some(version) = self.version() else {
            return fail_preparation(callback, ErrorStatus::DeviceUnavailable);
        };
        if !model.is_compliant_with(version) {
            tracing::error!(%version, "prepareModel: model is not representable on this device");
            return fail_preparation(callback, ErrorStatus::GeneralFailure);
        }

        let status = match &resolved.revision {
            DeviceRevision::V1_2(device) => {
                device.prepare_model_1_2(model, preference, Arc::clone(callback))
            }
            DeviceRevision::V1_1(device) => {
                device.prepare_model_1_1(model, preference, Arc::clone(callback))
            }
            DeviceRevision::V1_0 => resolved.v1_0.prepare_model(model, Arc::clone(callback)),
        };
        settle_launch(callback, status)
    }

    /// Restore a compiled model from cache files. V1_2 only.
    pub fn prepare_model_from_cache(
        &self,
        model_cache: &CacheHandle,
        data_cache: &CacheHandle,
        token: &CacheToken,
        callback: &Arc<PreparedModelCallback>,
    ) -> ErrorStatus {
        match self.resolved.as_ref().map(|r| &r.revision) {
            Some(DeviceRevision::V1_2(device)) => {
                let status = device.prepare_model_from_cache(
                    model_cache,
                    data_cache,
                    token,
                    Arc::clone(callback),
                );
                settle_launch(callback, status)
            }
            _ => fail_preparation(callback, ErrorStatus::GeneralFailure),
        }
    }

    pub fn get_status(&self) -> DeviceStatus {
        match &self.resolved {
            Some(resolved) => resolved.v1_0.get_status(),
            None => DeviceStatus::Unknown,
        }
    }

    /// Feature level of the resolved revision, -1 without a handle.
    pub fn get_feature_level(&self) -> i64 {
        self.version().map_or(-1, HalVersion::feature_level)
    }

    /// Device type code, -1 when the device cannot answer.
    pub fn get_type(&self) -> i32 {
        let Some(resolved) = &self.resolved else {
            return -1;
        };
        match &resolved.revision {
            DeviceRevision::V1_2(device) => {
                let (status, device_type) =
                    wait_for_reply("getType", |reply: Reply<Option<DeviceType>>| {
                        device.get_type(Box::new(move |status: ErrorStatus, device_type: DeviceType| {
                            reply(status, Some(device_type))
                        }))
                    });
                match (status, device_type) {
                    (ErrorStatus::None, Some(device_type)) => device_type.code(),
                    _ => {
                        tracing::error!(%status, "getType failed");
                        -1
                    }
                }
            }
            DeviceRevision::V1_1(_) | DeviceRevision::V1_0 => DeviceType::Unknown.code(),
        }
    }

    /// Driver version string, `"UNKNOWN"` before V1_2.
    pub fn get_version_string(&self) -> (ErrorStatus, String) {
        let Some(resolved) = &self.resolved else {
            return (ErrorStatus::DeviceUnavailable, String::new());
        };
        match &resolved.revision {
            DeviceRevision::V1_2(device) => {
                wait_for_reply("getVersionString", |reply| device.get_version_string(reply))
            }
            DeviceRevision::V1_1(_) | DeviceRevision::V1_0 => {
                (ErrorStatus::None, "UNKNOWN".to_string())
            }
        }
    }

    pub fn is_caching_supported(&self) -> (ErrorStatus, bool) {
        let Some(resolved) = &self.resolved else {
            return (ErrorStatus::DeviceUnavailable, false);
        };
        match &resolved.revision {
            DeviceRevision::V1_2(device) => {
                wait_for_reply("isCachingSupported", |reply| device.is_caching_supported(reply))
            }
            DeviceRevision::V1_1(_) | DeviceRevision::V1_0 => (ErrorStatus::None, false),
        }
    }
}

impl std::fmt::Debug for VersionedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedDevice")
            .field("version", &self.version())
            .finish()
    }
}

/// A prepared-model handle bound to its richest interface revision.
pub struct VersionedPreparedModel {
    v1_0: Arc<dyn PreparedModelV1_0>,
    v1_2: Option<Arc<dyn PreparedModelV1_2>>,
}

impl VersionedPreparedModel {
    pub fn new(prepared_model: Arc<dyn PreparedModelV1_0>) -> Self {
        let v1_2 = Arc::clone(&prepared_model).cast_v1_2();
        Self {
            v1_0: prepared_model,
            v1_2,
        }
    }

    pub fn version(&self) -> HalVersion {
        if self.v1_2.is_some() {
            HalVersion::V1_2
        } else {
            HalVersion::V1_0
        }
    }

    /// Launch one execution. `callback` fires exactly once.
    pub fn execute(
        &self,
        request: &Request,
        measure: MeasureTiming,
        callback: &Arc<ExecutionCallback>,
    ) -> ErrorStatus {
        let status = match &self.v1_2 {
            Some(prepared) => prepared.execute_1_2(request, measure, Arc::clone(callback)),
            None => self.v1_0.execute(request, Arc::clone(callback)),
        };
        if !status.is_ok() && !callback.is_notified() {
            callback.notify(status);
        }
        status
    }

    /// Run one execution to completion.
    ///
    /// Before V1_2 this is an asynchronous execution followed by a wait.
    pub fn execute_synchronously(
        &self,
        request: &Request,
        measure: MeasureTiming,
    ) -> (ErrorStatus, Vec<OutputShape>, Timing) {
        let (status, output_shapes, timing) = match &self.v1_2 {
            Some(prepared) => {
                let (status, (output_shapes, timing)) =
                    wait_for_reply("executeSynchronously", |reply| {
                        prepared.execute_synchronously(request, measure, reply)
                    });
                (status, output_shapes, timing)
            }
            None => {
                let callback = ExecutionCallback::new();
                let launched = self.v1_0.execute(request, Arc::clone(&callback));
                if launched.is_ok() {
                    callback.result()
                } else {
                    (launched, Vec::new(), Timing::UNAVAILABLE)
                }
            }
        };
        sanitize_execution(status, output_shapes, timing, measure)
    }

    /// Open a burst channel. `None` before V1_2 or when the worker cannot start.
    pub fn configure_execution_burst(&self, blocking: bool) -> Option<ExecutionBurstController> {
        let prepared = Arc::clone(self.v1_2.as_ref()?);
        match ExecutionBurstController::spawn(prepared, blocking) {
            Ok(controller) => Some(controller),
            Err(e) => {
                tracing::error!("configureExecutionBurst: failed to start worker: {e}");
                None
            }
        }
    }

    /// Persist this prepared model. V1_2 only.
    ///
    /// Both files must be empty. Contents are undefined unless `None` is returned.
    pub fn save_to_cache(
        &self,
        model_cache: &CacheHandle,
        data_cache: &CacheHandle,
        token: &CacheToken,
    ) -> ErrorStatus {
        match &self.v1_2 {
            Some(prepared) => prepared.save_to_cache(model_cache, data_cache, token),
            None => ErrorStatus::GeneralFailure,
        }
    }
}

impl std::fmt::Debug for VersionedPreparedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedPreparedModel")
            .field("version", &self.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_drops_shapes_on_failure() {
        let shapes = vec![OutputShape {
            dimensions: vec![2],
            is_sufficient: true,
        }];
        for status in [
            ErrorStatus::DeviceUnavailable,
            ErrorStatus::GeneralFailure,
            ErrorStatus::InvalidArgument,
        ] {
            let (_, kept, _) =
                sanitize_execution(status, shapes.clone(), Timing::UNAVAILABLE, MeasureTiming::No);
            assert!(kept.is_empty(), "{status} kept output shapes");
        }
        let (_, kept, _) = sanitize_execution(
            ErrorStatus::OutputInsufficientSize,
            shapes.clone(),
            Timing::UNAVAILABLE,
            MeasureTiming::No,
        );
        assert_eq!(kept, shapes);
    }

    #[test]
    fn test_sanitize_timing() {
        let measured = Timing {
            time_on_device: 5,
            time_in_driver: 6,
        };
        let (_, _, timing) =
            sanitize_execution(ErrorStatus::None, Vec::new(), measured, MeasureTiming::No);
        assert_eq!(timing, Timing::UNAVAILABLE);
        let (_, _, timing) =
            sanitize_execution(ErrorStatus::None, Vec::new(), measured, MeasureTiming::Yes);
        assert_eq!(timing, measured);
        let (_, _, timing) = sanitize_execution(
            ErrorStatus::GeneralFailure,
            Vec::new(),
            measured,
            MeasureTiming::Yes,
        );
        assert_eq!(timing, Timing::UNAVAILABLE);
    }

    #[test]
    fn test_dropped_reply_is_general_failure() {
        let (status, value): (ErrorStatus, Vec<bool>) = wait_for_reply("test", drop);
        assert_eq!(status, ErrorStatus::GeneralFailure);
        assert!(value.is_empty());
    }

    #[test]
    fn test_invalid_device() {
        let device = VersionedDevice::invalid();
        assert!(!device.is_valid());
        assert_eq!(device.get_feature_level(), -1);
        assert_eq!(device.get_type(), -1);
        let callback = PreparedModelCallback::new();
        let status = device.prepare_model(&Model::new(), ExecutionPreference::default(), &callback);
        assert_eq!(status, ErrorStatus::DeviceUnavailable);
        assert_eq!(callback.status(), ErrorStatus::DeviceUnavailable);
    }
}
