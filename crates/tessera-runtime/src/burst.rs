//! Execution bursts: a persistent worker for repeated executions of one
//! prepared model.

use crate::versioned::{sanitize_execution, wait_for_reply};
use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use tessera_hal::{ErrorStatus, MeasureTiming, OutputShape, PreparedModelV1_2, Request, Timing};

type BurstResult = (ErrorStatus, Vec<OutputShape>, Timing);

struct BurstJob {
    request: Request,
    measure: MeasureTiming,
}

/// Client end of a burst.
///
/// Requests are sent to a dedicated worker thread over a channel. With
/// `blocking` the caller sleeps on the result channel, otherwise it spins on
/// it, trading CPU for latency.
pub struct ExecutionBurstController {
    jobs: Option<Sender<BurstJob>>,
    results: Receiver<BurstResult>,
    blocking: bool,
    worker: Option<JoinHandle<()>>,
}

impl ExecutionBurstController {
    pub(crate) fn spawn(prepared: Arc<dyn PreparedModelV1_2>, blocking: bool) -> io::Result<Self> {
        let (job_tx, job_rx) = mpsc::channel::<BurstJob>();
        let (result_tx, result_rx) = mpsc::channel::<BurstResult>();

        let worker = thread::Builder::new()
            .name("tessera-burst".to_string())
            .spawn(move || {
                for job in job_rx {
                    let (status, (output_shapes, timing)) =
                        wait_for_reply("burst execution", |reply| {
                            prepared.execute_synchronously(&job.request, job.measure, reply)
                        });
                    if result_tx.send((status, output_shapes, timing)).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            jobs: Some(job_tx),
            results: result_rx,
            blocking,
            worker: Some(worker),
        })
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Execute one request through the burst and wait for its result.
    pub fn compute(
        &self,
        request: &Request,
        measure: MeasureTiming,
    ) -> (ErrorStatus, Vec<OutputShape>, Timing) {
        let job = BurstJob {
            request: request.clone(),
            measure,
        };
        let sent = self.jobs.as_ref().is_some_and(|jobs| jobs.send(job).is_ok());
        if !sent {
            tracing::error!("Burst worker is gone");
            return (ErrorStatus::GeneralFailure, Vec::new(), Timing::UNAVAILABLE);
        }

        let received = if self.blocking {
            self.results.recv().ok()
        } else {
            loop {
                match self.results.try_recv() {
                    Ok(result) => break Some(result),
                    Err(TryRecvError::Empty) => thread::yield_now(),
                    Err(TryRecvError::Disconnected) => break None,
                }
            }
        };

        match received {
            Some((status, output_shapes, timing)) => {
                sanitize_execution(status, output_shapes, timing, measure)
            }
            None => (ErrorStatus::GeneralFailure, Vec::new(), Timing::UNAVAILABLE),
        }
    }
}

impl Drop for ExecutionBurstController {
    fn drop(&mut self) {
        // Closing the job channel ends the worker loop.
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Burst worker panicked");
            }
        }
    }
}
