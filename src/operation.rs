//! Cancellable remote operations
//!
//! An `Operation` wraps one spawned remote call. It is in flight until the
//! call finishes (`Completed`) or someone cancels it (`Cancelled`). Racing it
//! against a deadline cancels the underlying call when the deadline wins:
//! the task is aborted, which drops the HTTP future and with it the
//! connection.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    InFlight,
    Completed,
    Cancelled,
}

pub struct Operation<T> {
    name: String,
    handle: JoinHandle<T>,
    state: Arc<Mutex<OperationState>>,
}

impl<T: Send + 'static> Operation<T> {
    pub fn spawn<F>(name: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        let state = Arc::new(Mutex::new(OperationState::InFlight));
        let task_state = state.clone();
        let handle = tokio::spawn(async move {
            let output = future.await;
            if let Ok(mut state) = task_state.lock() {
                if *state == OperationState::InFlight {
                    *state = OperationState::Completed;
                }
            }
            output
        });

        Self {
            name: name.into(),
            handle,
            state,
        }
    }

    pub fn state(&self) -> OperationState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(OperationState::Cancelled)
    }

    /// Abort the underlying call. No effect once completed.
    pub fn cancel(&self) {
        if let Ok(mut state) = self.state.lock() {
            if *state == OperationState::InFlight {
                *state = OperationState::Cancelled;
                self.handle.abort();
                debug!(operation = %self.name, "operation cancelled");
            }
        }
    }

    /// Shared view of the state, usable after `self` has been consumed
    pub fn state_handle(&self) -> Arc<Mutex<OperationState>> {
        self.state.clone()
    }

    /// Wait for the result, cancelling the call if `deadline` elapses first
    pub async fn with_deadline(mut self, deadline: Duration) -> AppResult<T> {
        tokio::select! {
            joined = &mut self.handle => match joined {
                Ok(output) => Ok(output),
                Err(e) if e.is_cancelled() => Err(AppError::cancelled(self.name.clone())),
                Err(e) => Err(AppError::transport(format!("{} failed: {}", self.name, e))),
            },
            _ = tokio::time::sleep(deadline) => {
                warn!(operation = %self.name, deadline_ms = deadline.as_millis() as u64, "deadline elapsed");
                self.cancel();
                Err(AppError::timeout(self.name.clone(), deadline))
            }
        }
    }
}

/// Run `future` as a cancellable operation bounded by `deadline`
pub async fn run_with_deadline<T, F>(name: &str, deadline: Duration, future: F) -> AppResult<T>
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    Operation::spawn(name, future).with_deadline(deadline).await
}
