//! Running a finished plan step by step.

use crate::error::ExecutionError;
use crate::plan::{ExecutionPlan, ExecutionStep};
use crate::versioned::VersionedPreparedModel;
use std::collections::HashMap;
use tessera_hal::{ExecutionPreference, MeasureTiming, PreparedModelCallback, Request, Timing};

/// A plan whose steps are all compiled on their devices.
#[derive(Debug)]
pub struct PlanExecutor<'a> {
    plan: &'a ExecutionPlan,
    prepared: Vec<VersionedPreparedModel>,
}

impl<'a> PlanExecutor<'a> {
    /// Compile every step, waiting for each device in turn.
    #[tracing::instrument(skip_all, fields(steps = plan.steps().len()))]
    pub fn prepare(
        plan: &'a ExecutionPlan,
        preference: ExecutionPreference,
    ) -> Result<Self, ExecutionError> {
        if !plan.is_finished() {
            return Err(ExecutionError::InvalidInputOutput(
                "Plan must be finished before it is prepared".to_string(),
            ));
        }

        let mut prepared = Vec::with_capacity(plan.steps().len());
        for step in plan.steps() {
            let device = step.device();
            let callback = PreparedModelCallback::new();
            let launched = device
                .interface()
                .prepare_model(step.sub_model(), preference, &callback);
            let status = if launched.is_ok() {
                callback.status()
            } else {
                launched
            };
            let prepared_model = callback.prepared_model().filter(|_| status.is_ok());
            let Some(prepared_model) = prepared_model else {
                tracing::error!(step = step.index(), device = %device.name(), %status, "Preparation failed");
                return Err(prepare_error(step, status));
            };
            prepared.push(VersionedPreparedModel::new(prepared_model));
        }
        Ok(Self { plan, prepared })
    }

    pub fn plan(&self) -> &ExecutionPlan {
        self.plan
    }

    /// Run the plan once.
    ///
    /// `inputs` are ordered as the original model inputs; the result is
    /// ordered as the original model outputs.
    pub fn execute(
        &self,
        inputs: Vec<Vec<u8>>,
        measure: MeasureTiming,
    ) -> Result<Vec<Vec<u8>>, ExecutionError> {
        self.execute_timed(inputs, measure).map(|(outputs, _)| outputs)
    }

    /// Like [`PlanExecutor::execute`], also returning each step's timing.
    #[tracing::instrument(skip_all)]
    pub fn execute_timed(
        &self,
        inputs: Vec<Vec<u8>>,
        measure: MeasureTiming,
    ) -> Result<(Vec<Vec<u8>>, Vec<Timing>), ExecutionError> {
        let expected = self.plan.model_inputs().len();
        if inputs.len() != expected {
            return Err(ExecutionError::InvalidInputOutput(format!(
                "Expected {expected} inputs, got {}",
                inputs.len()
            )));
        }

        // Original operand index to its bytes, filled as steps complete.
        let mut values: HashMap<u32, Vec<u8>> =
            self.plan.model_inputs().iter().copied().zip(inputs).collect();
        let mut timings = Vec::with_capacity(self.prepared.len());

        for (step, prepared) in self.plan.steps().iter().zip(&self.prepared) {
            let step_inputs = step
                .model_inputs()
                .iter()
                .chain(step.sub_model_inputs())
                .map(|&(original, _)| {
                    values.get(&original).cloned().ok_or_else(|| {
                        ExecutionError::InvalidInputOutput(format!(
                            "No value for operand {original} read by step {}",
                            step.index()
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let step_outputs: Vec<(u32, u32)> = step
                .model_outputs()
                .iter()
                .chain(step.sub_model_outputs())
                .copied()
                .collect();
            let lengths = step_outputs
                .iter()
                .map(|&(original, local)| {
                    step.sub_model()
                        .operand(local)
                        .ok()
                        .and_then(|operand| operand.byte_len())
                        .ok_or_else(|| {
                            ExecutionError::InvalidInputOutput(format!(
                                "Operand {original} has no fully specified size"
                            ))
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let request = Request::from_buffers(step_inputs, &lengths);
            let (status, _, timing) = prepared.execute_synchronously(&request, measure);
            if !status.is_ok() {
                tracing::error!(step = step.index(), device = %step.device().name(), %status, "Execution failed");
                return Err(ExecutionError::Execute {
                    step: step.index(),
                    device: step.device().name().to_string(),
                    status,
                });
            }
            timings.push(timing);

            for (slot, &(original, _)) in step_outputs.iter().enumerate() {
                values.insert(original, read_output(&request, slot, original, step.index())?);
            }
            tracing::debug!(step = step.index(), "Step executed");
        }

        let outputs = self
            .plan
            .model_outputs()
            .iter()
            .map(|original| {
                values.get(original).cloned().ok_or_else(|| {
                    ExecutionError::InvalidInputOutput(format!(
                        "Model output {original} was never written"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((outputs, timings))
    }
}

fn read_output(
    request: &Request,
    slot: usize,
    original: u32,
    step: usize,
) -> Result<Vec<u8>, ExecutionError> {
    request.output(slot).ok_or_else(|| {
        ExecutionError::InvalidInputOutput(format!(
            "Step {step} did not return a readable value for operand {original}"
        ))
    })
}

fn prepare_error(step: &ExecutionStep, status: tessera_hal::ErrorStatus) -> ExecutionError {
    let status = if status.is_ok() {
        tessera_hal::ErrorStatus::GeneralFailure
    } else {
        status
    };
    ExecutionError::Prepare {
        step: step.index(),
        device: step.device().name().to_string(),
        status,
    }
}
