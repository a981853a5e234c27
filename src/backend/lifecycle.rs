use std::sync::atomic::{AtomicBool, Ordering};

use crate::utils::error::PubSubError;

/// `Stopped -> Running -> Stopped` state for backends without resources of
/// their own to hold while running.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    running: AtomicBool,
}

impl Lifecycle {
    pub(crate) fn start(&self) -> Result<(), PubSubError> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| PubSubError::AlreadyRunning)
    }

    pub(crate) fn stop(&self) -> Result<(), PubSubError> {
        self.running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| PubSubError::NotRunning { operation: "stop" })
    }

    pub(crate) fn ensure_running(&self, operation: &'static str) -> Result<(), PubSubError> {
        if self.running.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(PubSubError::NotRunning { operation })
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}
