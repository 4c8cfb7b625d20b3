//! Single-shot completion objects for asynchronous prepare and execute calls.
//!
//! The launching call hands an `Arc` of the callback to the driver and returns
//! immediately. The driver notifies it exactly once from whatever thread it
//! likes. Any later notification is ignored and logged.

use crate::interface::PreparedModelV1_0;
use crate::request::{OutputShape, Timing};
use crate::types::ErrorStatus;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

struct Slot<T> {
    value: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T: Clone> Slot<T> {
    fn new() -> Self {
        Self {
            value: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Store the value if the slot is empty. First writer wins.
    fn set(&self, value: T) -> bool {
        let mut guard = self.value.lock();
        if guard.is_some() {
            return false;
        }
        *guard = Some(value);
        self.ready.notify_all();
        true
    }

    fn wait(&self) -> T {
        let mut guard = self.value.lock();
        loop {
            if let Some(value) = guard.as_ref() {
                return value.clone();
            }
            self.ready.wait(&mut guard);
        }
    }

    fn is_set(&self) -> bool {
        self.value.lock().is_some()
    }
}

type PreparedResult = (ErrorStatus, Option<Arc<dyn PreparedModelV1_0>>);

/// Completion of `prepare_model` / `prepare_model_from_cache`.
pub struct PreparedModelCallback {
    slot: Slot<PreparedResult>,
}

impl PreparedModelCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { slot: Slot::new() })
    }

    /// Deliver the preparation result. Returns `false` if already notified.
    ///
    /// A prepared model passed alongside a failure status is dropped.
    pub fn notify(
        &self,
        status: ErrorStatus,
        prepared_model: Option<Arc<dyn PreparedModelV1_0>>,
    ) -> bool {
        let prepared_model = if status.is_ok() { prepared_model } else { None };
        let accepted = self.slot.set((status, prepared_model));
        if !accepted {
            tracing::warn!(%status, "PreparedModelCallback notified more than once, ignoring");
        }
        accepted
    }

    /// Block until notified.
    pub fn wait(&self) {
        self.slot.wait();
    }

    /// Block until notified, then return the status.
    pub fn status(&self) -> ErrorStatus {
        self.slot.wait().0
    }

    /// Block until notified, then return the prepared model, if any.
    pub fn prepared_model(&self) -> Option<Arc<dyn PreparedModelV1_0>> {
        self.slot.wait().1
    }

    pub fn is_notified(&self) -> bool {
        self.slot.is_set()
    }
}

/// Completion of an asynchronous execution.
pub struct ExecutionCallback {
    slot: Slot<(ErrorStatus, Vec<OutputShape>, Timing)>,
}

impl ExecutionCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { slot: Slot::new() })
    }

    /// Deliver a V1_0 style result carrying only a status.
    pub fn notify(&self, status: ErrorStatus) -> bool {
        self.notify_1_2(status, Vec::new(), Timing::UNAVAILABLE)
    }

    /// Deliver a result with output shapes and timing.
    pub fn notify_1_2(
        &self,
        status: ErrorStatus,
        output_shapes: Vec<OutputShape>,
        timing: Timing,
    ) -> bool {
        let accepted = self.slot.set((status, output_shapes, timing));
        if !accepted {
            tracing::warn!(%status, "ExecutionCallback notified more than once, ignoring");
        }
        accepted
    }

    pub fn wait(&self) {
        self.slot.wait();
    }

    pub fn status(&self) -> ErrorStatus {
        self.slot.wait().0
    }

    pub fn output_shapes(&self) -> Vec<OutputShape> {
        self.slot.wait().1
    }

    pub fn timing(&self) -> Timing {
        self.slot.wait().2
    }

    /// Block until notified, then return everything at once.
    pub fn result(&self) -> (ErrorStatus, Vec<OutputShape>, Timing) {
        self.slot.wait()
    }

    pub fn is_notified(&self) -> bool {
        self.slot.is_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_first_notification_wins() {
        let callback = PreparedModelCallback::new();
        assert!(!callback.is_notified());
        assert!(callback.notify(ErrorStatus::GeneralFailure, None));
        assert!(!callback.notify(ErrorStatus::None, None));
        assert_eq!(callback.status(), ErrorStatus::GeneralFailure);
        assert!(callback.prepared_model().is_none());
    }

    #[test]
    fn test_wait_across_threads() {
        let callback = ExecutionCallback::new();
        let notifier = Arc::clone(&callback);
        let handle = thread::spawn(move || {
            notifier.notify_1_2(
                ErrorStatus::OutputInsufficientSize,
                vec![OutputShape {
                    dimensions: vec![4],
                    is_sufficient: false,
                }],
                Timing::UNAVAILABLE,
            );
        });
        let (status, shapes, timing) = callback.result();
        handle.join().unwrap();
        assert_eq!(status, ErrorStatus::OutputInsufficientSize);
        assert_eq!(shapes.len(), 1);
        assert!(!timing.is_available());
    }

    #[test]
    fn test_v1_0_notify_has_no_shapes() {
        let callback = ExecutionCallback::new();
        callback.notify(ErrorStatus::None);
        assert!(callback.output_shapes().is_empty());
        assert_eq!(callback.timing(), Timing::UNAVAILABLE);
    }
}
