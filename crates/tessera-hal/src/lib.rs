//! Hardware-abstraction layer shared by the Tessera runtime and its drivers.
//!
//! This crate defines what crosses the driver boundary:
//! - Status, operand and operation enumerations (`ErrorStatus`, `OperandType`, ...)
//! - The model arena (`Model`, `Operand`, `Operation`)
//! - Execution requests and results (`Request`, `OutputShape`, `Timing`)
//! - Capability declarations for each revision (`Capabilities`)
//! - Compilation cache handles (`CacheHandle`, `CacheToken`)
//! - Single-shot completion callbacks
//! - The interface revisions V1_0, V1_1 and V1_2

pub mod cache;
pub mod callbacks;
pub mod capabilities;
pub mod interface;
pub mod model;
pub mod request;
pub mod types;

pub use cache::{CACHE_TOKEN_LEN, CacheHandle, CacheToken};
pub use callbacks::{ExecutionCallback, PreparedModelCallback};
pub use capabilities::{
    Capabilities, CapabilitiesV1_0, CapabilitiesV1_1, CapabilitiesV1_2, PerformanceInfo,
};
pub use interface::{
    DEVICE_DESCRIPTOR, DeviceV1_0, DeviceV1_1, DeviceV1_2, PreparedModelV1_0, PreparedModelV1_2,
    Reply,
};
pub use model::{Model, Operand, OperandLifetime, Operation};
pub use request::{
    DataLocation, MemoryPool, OutputShape, Request, RequestArgument, Timing, memory_pool,
};
pub use types::{
    DeviceStatus, DeviceType, ErrorStatus, ExecutionPreference, Extension, ExtensionOperandType,
    HalVersion, MeasureTiming, OperandType, OperationTuple, OperationType,
};

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, HalError>;

/// Errors raised while building or inspecting HAL data structures.
#[derive(Debug, thiserror::Error)]
pub enum HalError {
    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
