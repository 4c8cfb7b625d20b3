//! Tessera runtime: turns a model and a set of drivers into an execution plan.
//!
//! The pieces, in the order a model flows through them:
//! - [`DeviceRegistry`] discovers drivers and wraps each in a [`Device`]
//! - [`VersionedDevice`] and [`VersionedPreparedModel`] hide which interface
//!   revision a driver implements
//! - [`ExecutionPlan::partition`] assigns operations to devices and groups
//!   them into [`ExecutionStep`]s
//! - [`PlanExecutor`] compiles every step and runs the plan
//!
//! # Example
//!
//! ```no_run
//! use tessera_hal::{ExecutionPreference, MeasureTiming, Model};
//! use tessera_runtime::{DeviceRegistry, ExecutionPlan, PlanExecutor};
//!
//! # fn run(registry: &DeviceRegistry, model: &Model, input: Vec<u8>) -> anyhow::Result<()> {
//! let plan = ExecutionPlan::partition(model, registry.devices(), ExecutionPreference::default())?;
//! let executor = PlanExecutor::prepare(&plan, ExecutionPreference::default())?;
//! let outputs = executor.execute(vec![input], MeasureTiming::No)?;
//! assert_eq!(outputs.len(), model.output_indexes().len());
//! # Ok(())
//! # }
//! ```

mod burst;
pub mod coverage;
mod device;
mod error;
mod executor;
mod partition;
mod plan;
pub mod properties;
mod registry;
mod versioned;

pub use burst::ExecutionBurstController;
pub use coverage::CoverageMode;
pub use device::Device;
pub use error::{ExecutionError, PlanError, Result};
pub use executor::PlanExecutor;
pub use plan::{ExecutionPlan, ExecutionStep, OperandKind, OperandPair};
pub use properties::{EnvProperties, MapProperties, PropertySource};
pub use registry::{DeviceRegistry, ServiceManager, StaticServiceManager};
pub use versioned::{VersionedDevice, VersionedPreparedModel};
