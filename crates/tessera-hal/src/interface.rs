//! Driver-facing interface revisions.
//!
//! A driver implements [`DeviceV1_0`] and, optionally, the newer revisions.
//! Newer revisions extend older ones, and a handle to the oldest revision can
//! be reinterpreted as a newer one through the `cast_*` methods, which return
//! `None` unless the driver overrides them.
//!
//! Queries answer through a [`Reply`] closure, which the driver may call on
//! any thread. Asynchronous work (`prepare_*`, `execute*`) is launched by the
//! call and completes through a shared callback object.

use crate::cache::{CacheHandle, CacheToken};
use crate::callbacks::{ExecutionCallback, PreparedModelCallback};
use crate::capabilities::{Capabilities, CapabilitiesV1_0, CapabilitiesV1_1};
use crate::model::Model;
use crate::request::{OutputShape, Request, Timing};
use crate::types::{
    DeviceStatus, DeviceType, ErrorStatus, ExecutionPreference, Extension, MeasureTiming,
};
use std::sync::Arc;

/// One-shot answer to a driver query.
pub type Reply<T> = Box<dyn FnOnce(ErrorStatus, T) + Send>;

/// Interface descriptor drivers are registered under.
pub const DEVICE_DESCRIPTOR: &str = "tessera.hal.IDevice";

pub trait DeviceV1_0: Send + Sync {
    fn get_capabilities(&self, reply: Reply<CapabilitiesV1_0>);

    /// One entry per operation of `model`, in order.
    fn get_supported_operations(&self, model: &Model, reply: Reply<Vec<bool>>);

    fn prepare_model(&self, model: &Model, callback: Arc<PreparedModelCallback>) -> ErrorStatus;

    fn get_status(&self) -> DeviceStatus;

    fn cast_v1_1(self: Arc<Self>) -> Option<Arc<dyn DeviceV1_1>> {
        None
    }

    fn cast_v1_2(self: Arc<Self>) -> Option<Arc<dyn DeviceV1_2>> {
        None
    }
}

pub trait DeviceV1_1: DeviceV1_0 {
    fn get_capabilities_1_1(&self, reply: Reply<CapabilitiesV1_1>);

    fn get_supported_operations_1_1(&self, model: &Model, reply: Reply<Vec<bool>>);

    fn prepare_model_1_1(
        &self,
        model: &Model,
        preference: ExecutionPreference,
        callback: Arc<PreparedModelCallback>,
    ) -> ErrorStatus;
}

pub trait DeviceV1_2: DeviceV1_1 {
    fn get_version_string(&self, reply: Reply<String>);

    fn get_type(&self, reply: Reply<DeviceType>);

    fn get_capabilities_1_2(&self, reply: Reply<Capabilities>);

    fn get_supported_extensions(&self, reply: Reply<Vec<Extension>>);

    fn get_supported_operations_1_2(&self, model: &Model, reply: Reply<Vec<bool>>);

    fn is_caching_supported(&self, reply: Reply<bool>);

    fn prepare_model_1_2(
        &self,
        model: &Model,
        preference: ExecutionPreference,
        callback: Arc<PreparedModelCallback>,
    ) -> ErrorStatus;

    /// Restore a prepared model saved by [`PreparedModelV1_2::save_to_cache`].
    ///
    /// The model cache must be verified before anything in it is used.
    fn prepare_model_from_cache(
        &self,
        model_cache: &CacheHandle,
        data_cache: &CacheHandle,
        token: &CacheToken,
        callback: Arc<PreparedModelCallback>,
    ) -> ErrorStatus;
}

pub trait PreparedModelV1_0: Send + Sync {
    fn execute(&self, request: &Request, callback: Arc<ExecutionCallback>) -> ErrorStatus;

    fn cast_v1_2(self: Arc<Self>) -> Option<Arc<dyn PreparedModelV1_2>> {
        None
    }
}

pub trait PreparedModelV1_2: PreparedModelV1_0 {
    fn execute_1_2(
        &self,
        request: &Request,
        measure: MeasureTiming,
        callback: Arc<ExecutionCallback>,
    ) -> ErrorStatus;

    fn execute_synchronously(
        &self,
        request: &Request,
        measure: MeasureTiming,
        reply: Reply<(Vec<OutputShape>, Timing)>,
    );

    /// Write this prepared model into two zero-length cache files.
    fn save_to_cache(
        &self,
        model_cache: &CacheHandle,
        data_cache: &CacheHandle,
        token: &CacheToken,
    ) -> ErrorStatus;
}
