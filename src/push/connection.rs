//! Push connection manager
//!
//! One `ConnectionManager` owns one persistent connection for one identity,
//! fixed at construction. It reconnects after abnormal closes with a bounded
//! budget and publishes its state on a watch channel. `teardown()` closes
//! with a normal closure, cancels any scheduled reconnect and waits for the
//! connection task to finish.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (abnormal close)
//!      ^                                          |
//!      |                      ReconnectScheduled <+  attempts < max
//!      +-- gave up (unavailable) <----------------+  attempts == max
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::dispatch::HandlerRegistry;
use super::transport::{PushStream, PushTransport, StreamEvent, NORMAL_CLOSURE};
use crate::notify::{Notice, Notifier};

const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ReconnectScheduled,
}

/// Observable state of the push channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub user_id: Option<String>,
    pub state: PushConnectionState,
    pub reconnect_attempts: u32,
    /// Sticky once the reconnect budget is spent; cleared by the next connect
    pub unavailable: bool,
}

impl ChannelSnapshot {
    pub fn disconnected() -> Self {
        Self {
            user_id: None,
            state: PushConnectionState::Disconnected,
            reconnect_attempts: 0,
            unavailable: false,
        }
    }
}

impl Default for ChannelSnapshot {
    fn default() -> Self {
        Self::disconnected()
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
            max_attempts: 5,
        }
    }
}

pub struct ConnectionManager {
    user_id: String,
    transport: Arc<dyn PushTransport>,
    handlers: Arc<HandlerRegistry>,
    policy: ReconnectPolicy,
    snapshot: Arc<watch::Sender<ChannelSnapshot>>,
    notifier: Option<Arc<dyn Notifier>>,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn new(
        user_id: impl Into<String>,
        transport: Arc<dyn PushTransport>,
        handlers: Arc<HandlerRegistry>,
        policy: ReconnectPolicy,
        snapshot: Arc<watch::Sender<ChannelSnapshot>>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            user_id: user_id.into(),
            transport,
            handlers,
            policy,
            snapshot,
            notifier,
            stop_tx,
            task: None,
        }
    }

    /// Spawn the connection task. No-op while one is already running.
    pub fn start(&mut self) {
        if self.is_running() {
            debug!(user_id = %self.user_id, "push connection already running");
            return;
        }

        self.stop_tx.send_replace(false);
        let worker = Worker {
            user_id: self.user_id.clone(),
            transport: self.transport.clone(),
            handlers: self.handlers.clone(),
            policy: self.policy.clone(),
            snapshot: self.snapshot.clone(),
            notifier: self.notifier.clone(),
        };
        self.task = Some(tokio::spawn(worker.run(self.stop_tx.subscribe())));
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn is_open(&self) -> bool {
        let snapshot = self.snapshot.borrow();
        snapshot.state == PushConnectionState::Connected
            && snapshot.user_id.as_deref() == Some(self.user_id.as_str())
    }

    /// Close with a normal closure, cancel any scheduled reconnect and reset
    /// the published state
    pub async fn teardown(&mut self) {
        self.stop_tx.send_replace(true);

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(TEARDOWN_TIMEOUT, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(user_id = %self.user_id, error = %e, "push task failed"),
                Err(_) => {
                    warn!(user_id = %self.user_id, "push task did not stop in time, aborting");
                    task.abort();
                }
            }
        }

        self.snapshot.send_replace(ChannelSnapshot::disconnected());
        info!(user_id = %self.user_id, "push connection torn down");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // The task notices on its next suspension point and closes normally
        self.stop_tx.send_replace(true);
    }
}

enum ReadOutcome {
    Stopped,
    Closed(u16),
}

struct Worker {
    user_id: String,
    transport: Arc<dyn PushTransport>,
    handlers: Arc<HandlerRegistry>,
    policy: ReconnectPolicy,
    snapshot: Arc<watch::Sender<ChannelSnapshot>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl Worker {
    fn publish(&self, state: PushConnectionState, attempts: u32, unavailable: bool) {
        self.snapshot.send_replace(ChannelSnapshot {
            user_id: Some(self.user_id.clone()),
            state,
            reconnect_attempts: attempts,
            unavailable,
        });
    }

    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        let mut attempts: u32 = 0;

        loop {
            if *stop_rx.borrow() {
                break;
            }
            self.publish(PushConnectionState::Connecting, attempts, false);

            let opened = tokio::select! {
                _ = stop_rx.changed() => break,
                opened = self.transport.open(&self.user_id) => opened,
            };

            let close_code = match opened {
                Ok(mut stream) => {
                    if attempts > 0 {
                        info!(user_id = %self.user_id, attempts, "push channel reconnected");
                    } else {
                        info!(user_id = %self.user_id, "push channel connected");
                    }
                    attempts = 0;
                    self.publish(PushConnectionState::Connected, attempts, false);

                    match self.read_until_closed(stream.as_mut(), &mut stop_rx).await {
                        ReadOutcome::Stopped => {
                            stream.close(NORMAL_CLOSURE).await;
                            break;
                        }
                        ReadOutcome::Closed(code) => code,
                    }
                }
                Err(e) => {
                    warn!(user_id = %self.user_id, error = %e, "push channel open failed");
                    super::transport::ABNORMAL_CLOSURE
                }
            };

            if close_code == NORMAL_CLOSURE {
                info!(user_id = %self.user_id, "push channel closed normally by server");
                self.publish(PushConnectionState::Disconnected, 0, false);
                break;
            }

            if attempts >= self.policy.max_attempts {
                error!(
                    user_id = %self.user_id,
                    attempts,
                    "push channel unavailable, giving up on reconnects"
                );
                self.publish(PushConnectionState::Disconnected, attempts, true);
                if let Some(notifier) = &self.notifier {
                    notifier.notify(Notice::ChannelUnavailable);
                }
                break;
            }

            attempts += 1;
            warn!(
                user_id = %self.user_id,
                code = close_code,
                attempt = attempts,
                max_attempts = self.policy.max_attempts,
                delay_ms = self.policy.delay.as_millis() as u64,
                "push channel dropped, reconnect scheduled"
            );
            self.publish(PushConnectionState::ReconnectScheduled, attempts, false);

            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = tokio::time::sleep(self.policy.delay) => {}
            }
        }

        debug!(user_id = %self.user_id, "push connection task finished");
    }

    async fn read_until_closed(
        &self,
        stream: &mut dyn PushStream,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> ReadOutcome {
        loop {
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        return ReadOutcome::Stopped;
                    }
                }
                event = stream.next_event() => match event {
                    StreamEvent::Text(text) => {
                        self.handlers.dispatch_text(&text);
                    }
                    StreamEvent::Closed { code } => return ReadOutcome::Closed(code),
                },
            }
        }
    }
}
