//! Session correlation
//!
//! A session is one local attempt to watch one payment link to completion.
//! Every asynchronous callback (poller tick, push message, late remote
//! response) carries the `SessionId` that was active when it was scheduled and
//! is dropped unless that id is still the active one.
//!
//! The correlator also owns:
//! - the registry of timer handles armed for the active session, cancelled
//!   precisely when the session is replaced or ended
//! - the session's status field, settled through a single compare-and-set so
//!   the first terminal observation wins and every later one is a no-op

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use crate::payments::types::PaymentStatus;

/// Opaque session identifier: creation time in milliseconds plus random bits
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        let random = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", Utc::now().timestamp_millis(), &random[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: SessionId,
    pub link_id: Option<String>,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

/// Cancellation handle for a timer-driven task.
///
/// Cancelling is cooperative: the task observes the signal at its next
/// suspension point. Work already in flight may finish, but its result is
/// then rejected by the session check.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    name: &'static str,
    stop: Arc<watch::Sender<bool>>,
}

impl TimerHandle {
    pub fn new(name: &'static str) -> (Self, watch::Receiver<bool>) {
        let (stop, rx) = watch::channel(false);
        (
            Self {
                name,
                stop: Arc::new(stop),
            },
            rx,
        )
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn cancel(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.stop.borrow()
    }
}

#[derive(Default)]
struct CorrelatorState {
    active: Option<Session>,
    timers: Vec<TimerHandle>,
}

impl CorrelatorState {
    fn cancel_timers(&mut self) -> usize {
        let count = self.timers.len();
        for timer in self.timers.drain(..) {
            timer.cancel();
        }
        count
    }

    fn active_matches(&self, session_id: &SessionId) -> Option<&Session> {
        self.active
            .as_ref()
            .filter(|session| &session.session_id == session_id)
    }
}

/// Owner of the single active session
#[derive(Default)]
pub struct SessionCorrelator {
    state: Mutex<CorrelatorState>,
}

impl SessionCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CorrelatorState> {
        // A poisoned lock only means a panicking holder; the data is plain
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a fresh session, invalidating the previous one and cancelling
    /// every timer registered under it
    pub fn new_session(&self) -> SessionId {
        let session_id = SessionId::generate();
        let mut state = self.lock();

        let cancelled = state.cancel_timers();
        if let Some(previous) = state.active.take() {
            info!(
                previous = %previous.session_id,
                session_id = %session_id,
                cancelled_timers = cancelled,
                "session superseded"
            );
        } else {
            info!(session_id = %session_id, "session started");
        }

        state.active = Some(Session {
            session_id: session_id.clone(),
            link_id: None,
            status: PaymentStatus::Pending,
            created_at: Utc::now(),
        });
        session_id
    }

    /// End the active session without starting another (sign-out, teardown,
    /// account lockdown)
    pub fn end_session(&self) -> Option<SessionId> {
        let mut state = self.lock();
        let cancelled = state.cancel_timers();
        let ended = state.active.take().map(|session| session.session_id);
        if let Some(session_id) = &ended {
            info!(session_id = %session_id, cancelled_timers = cancelled, "session ended");
        }
        ended
    }

    pub fn current(&self) -> Option<SessionId> {
        self.lock()
            .active
            .as_ref()
            .map(|session| session.session_id.clone())
    }

    pub fn is_current(&self, session_id: &SessionId) -> bool {
        self.lock().active_matches(session_id).is_some()
    }

    pub fn snapshot(&self) -> Option<Session> {
        self.lock().active.clone()
    }

    /// Link bound to `session_id`, if that session is still active
    pub fn link_for(&self, session_id: &SessionId) -> Option<String> {
        self.lock()
            .active_matches(session_id)
            .and_then(|session| session.link_id.clone())
    }

    /// Bind the issued link to the session. Refused when the session is stale
    /// or already has a link.
    pub fn bind_link(&self, session_id: &SessionId, link_id: &str) -> bool {
        let mut state = self.lock();
        match state.active.as_mut() {
            Some(session) if &session.session_id == session_id && session.link_id.is_none() => {
                session.link_id = Some(link_id.to_string());
                debug!(session_id = %session_id, link_id, "link bound to session");
                true
            }
            _ => false,
        }
    }

    /// Track a timer under `session_id`. A timer for a stale session is
    /// cancelled on the spot and `false` is returned.
    pub fn register_timer(&self, session_id: &SessionId, timer: TimerHandle) -> bool {
        let mut state = self.lock();
        if state.active_matches(session_id).is_none() {
            debug!(session_id = %session_id, timer = timer.name(), "timer for stale session cancelled");
            timer.cancel();
            return false;
        }
        state.timers.retain(|t| !t.is_cancelled());
        state.timers.push(timer);
        true
    }

    pub fn active_timers(&self) -> usize {
        self.lock()
            .timers
            .iter()
            .filter(|t| !t.is_cancelled())
            .count()
    }

    /// Compare-and-set the session status from Pending to a terminal status.
    ///
    /// Returns true for exactly one caller per session: the first to report a
    /// terminal status while the session is still active. Stale sessions,
    /// non-terminal statuses and repeat reports all return false.
    pub fn try_settle(&self, session_id: &SessionId, status: PaymentStatus) -> bool {
        if !status.is_terminal() {
            return false;
        }

        let mut state = self.lock();
        match state.active.as_mut() {
            Some(session) if &session.session_id == session_id => {
                if session.status.is_terminal() {
                    debug!(session_id = %session_id, %status, "session already settled");
                    return false;
                }
                session.status = status;
                let cancelled = state.cancel_timers();
                info!(session_id = %session_id, %status, cancelled_timers = cancelled, "session settled");
                true
            }
            _ => {
                debug!(session_id = %session_id, %status, "stale session report dropped");
                false
            }
        }
    }
}
