//! Shared account restriction state
//!
//! Written only by the ban poller and by authoritative push messages; read by
//! the account gate and anything that has to lock itself down. Each update is
//! one `send_if_modified` on a watch channel: the check and the write happen
//! under the channel's lock, so exactly one writer wins a transition.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::payments::types::BanStatusResponse;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRestriction {
    pub is_banned: bool,
    pub reason: Option<String>,
    pub ban_type: Option<String>,
}

impl AccountRestriction {
    pub fn banned(reason: Option<String>, ban_type: Option<String>) -> Self {
        Self {
            is_banned: true,
            reason,
            ban_type,
        }
    }
}

impl From<BanStatusResponse> for AccountRestriction {
    fn from(status: BanStatusResponse) -> Self {
        Self {
            is_banned: status.is_banned,
            reason: status.ban_reason,
            ban_type: status.ban_type,
        }
    }
}

/// Process-wide restriction holder
pub struct AccountState {
    restriction: watch::Sender<AccountRestriction>,
}

impl AccountState {
    pub fn new() -> Self {
        let (restriction, _) = watch::channel(AccountRestriction::default());
        Self { restriction }
    }

    pub fn restriction(&self) -> AccountRestriction {
        self.restriction.borrow().clone()
    }

    pub fn is_banned(&self) -> bool {
        self.restriction.borrow().is_banned
    }

    pub fn subscribe(&self) -> watch::Receiver<AccountRestriction> {
        self.restriction.subscribe()
    }

    /// Record a restriction. Returns true only when the account was not
    /// already banned, so callers can notify exactly once.
    pub fn apply_ban(&self, restriction: AccountRestriction) -> bool {
        let applied = self.restriction.send_if_modified(|current| {
            if current.is_banned {
                return false;
            }
            *current = AccountRestriction {
                is_banned: true,
                ..restriction
            };
            true
        });
        if applied {
            let current = self.restriction();
            warn!(
                reason = current.reason.as_deref().unwrap_or("unspecified"),
                ban_type = current.ban_type.as_deref().unwrap_or("unspecified"),
                "account restricted"
            );
        }
        applied
    }

    /// Lift the restriction. Only an explicit unban signal may call this; a
    /// poll that merely reports "not banned" never clears a ban.
    pub fn apply_unban(&self) -> bool {
        let lifted = self.restriction.send_if_modified(|current| {
            if !current.is_banned {
                return false;
            }
            *current = AccountRestriction::default();
            true
        });
        if lifted {
            info!("account restriction lifted");
        }
        lifted
    }
}

impl Default for AccountState {
    fn default() -> Self {
        Self::new()
    }
}
