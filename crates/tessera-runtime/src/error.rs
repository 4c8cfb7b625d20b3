//! Error types for the runtime crate.

use tessera_hal::{ErrorStatus, HalError, OperationTuple};
use thiserror::Error;

/// Errors raised while partitioning a model into an execution plan.
#[derive(Debug, Error)]
pub enum PlanError {
    /// No registered device can run an operation.
    #[error("No device supports operation {operation} {tuple}")]
    NoDevice {
        operation: u32,
        tuple: OperationTuple,
    },

    /// The model handed to the partitioner is malformed.
    #[error(transparent)]
    InvalidModel(#[from] HalError),

    /// A finished plan violates its structural invariants.
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),
}

/// Errors raised while preparing or running an execution plan.
///
/// The first failing step fails the whole plan.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A step's sub-model could not be compiled.
    #[error("Step {step} failed to prepare on '{device}': {status}")]
    Prepare {
        step: usize,
        device: String,
        status: ErrorStatus,
    },

    /// A step's execution reported a failure.
    #[error("Step {step} failed to execute on '{device}': {status}")]
    Execute {
        step: usize,
        device: String,
        status: ErrorStatus,
    },

    /// Inputs or outputs do not match the model.
    #[error("Invalid input or output: {0}")]
    InvalidInputOutput(String),
}

/// Specialized Result type for planning operations.
pub type Result<T> = std::result::Result<T, PlanError>;
