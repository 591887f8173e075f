//! Status poller
//!
//! Polls the status of one payment link on a fixed interval until a terminal
//! status is seen or the poller is stopped. Query failures are logged and the
//! next tick is the retry; nothing is escalated to the caller.
//!
//! State machine: `Idle -> Running -> Stopped`. `start` always stops the
//! previous run first, so at most one poll task is live per poller.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::payments::traits::PaymentBackend;
use crate::payments::types::PaymentStatus;
use crate::session::{SessionCorrelator, SessionId, TimerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Running,
    Stopped,
}

struct PollerRun {
    session_id: SessionId,
    link_id: String,
    timer: TimerHandle,
    task: JoinHandle<()>,
}

struct PollerSlot {
    run: Option<PollerRun>,
    started: bool,
}

pub struct StatusPoller {
    backend: Arc<dyn PaymentBackend>,
    correlator: Arc<SessionCorrelator>,
    interval: Duration,
    slot: Mutex<PollerSlot>,
}

impl StatusPoller {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(4);

    pub fn new(
        backend: Arc<dyn PaymentBackend>,
        correlator: Arc<SessionCorrelator>,
        interval: Duration,
    ) -> Self {
        Self {
            backend,
            correlator,
            interval,
            slot: Mutex::new(PollerSlot {
                run: None,
                started: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PollerSlot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Begin polling `link_id` for `session_id`.
    ///
    /// `on_transition` runs at most once, only if this poller is the first to
    /// settle the session and the session is still active at that moment.
    pub fn start<F>(&self, link_id: &str, session_id: &SessionId, on_transition: F)
    where
        F: FnOnce(PaymentStatus) + Send + 'static,
    {
        self.stop();

        let (timer, stop_rx) = TimerHandle::new("status-poller");
        if !self.correlator.register_timer(session_id, timer.clone()) {
            warn!(session_id = %session_id, link_id, "not starting poller for stale session");
            self.lock().started = true;
            return;
        }

        info!(
            session_id = %session_id,
            link_id,
            interval_ms = self.interval.as_millis() as u64,
            "status poller started"
        );

        let task = tokio::spawn(poll_loop(
            self.backend.clone(),
            self.correlator.clone(),
            self.interval,
            link_id.to_string(),
            session_id.clone(),
            timer.clone(),
            stop_rx,
            on_transition,
        ));

        let mut slot = self.lock();
        slot.started = true;
        slot.run = Some(PollerRun {
            session_id: session_id.clone(),
            link_id: link_id.to_string(),
            timer,
            task,
        });
    }

    /// Stop the current run, if any. Idempotent; safe before `start`.
    ///
    /// A status request already in flight is allowed to finish, but its
    /// result is discarded.
    pub fn stop(&self) {
        let run = self.lock().run.take();
        if let Some(run) = run {
            if !run.timer.is_cancelled() {
                debug!(session_id = %run.session_id, link_id = %run.link_id, "status poller stopped");
            }
            run.timer.cancel();
        }
    }

    pub fn state(&self) -> PollerState {
        let slot = self.lock();
        match &slot.run {
            Some(run) if !run.timer.is_cancelled() && !run.task.is_finished() => {
                PollerState::Running
            }
            _ if slot.started => PollerState::Stopped,
            _ => PollerState::Idle,
        }
    }

    /// Session the current run belongs to
    pub fn session(&self) -> Option<SessionId> {
        self.lock().run.as_ref().map(|run| run.session_id.clone())
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

#[allow(clippy::too_many_arguments)]
async fn poll_loop<F>(
    backend: Arc<dyn PaymentBackend>,
    correlator: Arc<SessionCorrelator>,
    interval: Duration,
    link_id: String,
    session_id: SessionId,
    timer: TimerHandle,
    mut stop_rx: watch::Receiver<bool>,
    on_transition: F,
) where
    F: FnOnce(PaymentStatus) + Send + 'static,
{
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => {}
        }
        if *stop_rx.borrow() {
            break;
        }

        ticks += 1;
        let result = backend.payment_link_status(&link_id).await;

        if *stop_rx.borrow() {
            debug!(session_id = %session_id, %link_id, "poller stopped during request, result discarded");
            break;
        }

        match result {
            Ok(status) if status.is_terminal() => {
                timer.cancel();
                if correlator.try_settle(&session_id, status) {
                    info!(session_id = %session_id, %link_id, %status, ticks, "poller observed terminal status");
                    on_transition(status);
                } else {
                    debug!(session_id = %session_id, %link_id, %status, "terminal status already handled or session stale");
                }
                break;
            }
            Ok(_) => {
                debug!(session_id = %session_id, %link_id, ticks, "payment still pending");
            }
            Err(e) => {
                warn!(session_id = %session_id, %link_id, ticks, error = %e, "status query failed, retrying next tick");
            }
        }
    }
}
