//! Ban poller
//!
//! Checks the user's ban status at startup and then on a coarse interval,
//! independent of any payment flow. A detected ban is written to
//! `AccountState` and announced once through the notifier. The poller never
//! clears a ban: only an explicit unban signal does.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::account::state::{AccountRestriction, AccountState};
use crate::error::AppResult;
use crate::notify::{Notice, Notifier};
use crate::payments::traits::AccountBackend;

#[derive(Debug, Clone)]
pub struct BanPollerConfig {
    pub interval: Duration,
}

impl Default for BanPollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

pub struct BanPoller {
    backend: Arc<dyn AccountBackend>,
    state: Arc<AccountState>,
    notifier: Arc<dyn Notifier>,
    config: BanPollerConfig,
}

impl BanPoller {
    pub fn new(
        backend: Arc<dyn AccountBackend>,
        state: Arc<AccountState>,
        notifier: Arc<dyn Notifier>,
        config: BanPollerConfig,
    ) -> Self {
        Self {
            backend,
            state,
            notifier,
            config,
        }
    }

    /// One ban-status lookup. Returns the restriction now in effect.
    pub async fn check_now(&self, user_id: &str) -> AppResult<AccountRestriction> {
        let status = self.backend.ban_status(user_id).await?;
        let reported = AccountRestriction::from(status);

        if reported.is_banned {
            let reason = reported.reason.clone();
            if self.state.apply_ban(reported) {
                self.notifier.notify(Notice::AccountRestricted { reason });
            }
        } else if self.state.is_banned() {
            debug!(user_id, "ban status reports clear; restriction stays until explicit unban");
        }

        Ok(self.state.restriction())
    }

    /// Check immediately, then every `interval` until shutdown is signalled
    pub async fn run(self, user_id: String, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            user_id = %user_id,
            interval_secs = self.config.interval.as_secs(),
            "ban poller started"
        );

        loop {
            if let Err(e) = self.check_now(&user_id).await {
                warn!(user_id = %user_id, error = %e, "ban status check failed");
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // A dropped sender stops the poller too
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }

        info!(user_id = %user_id, "ban poller stopped");
    }

    /// Spawn `run` on the runtime. Send `true` on the returned sender, or drop
    /// it, to stop.
    pub fn spawn(self, user_id: impl Into<String>) -> (watch::Sender<bool>, JoinHandle<()>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(user_id.into(), shutdown_rx));
        (shutdown_tx, handle)
    }
}
