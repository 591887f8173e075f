//! Account gate: may this account create payment links right now?

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::account::state::AccountState;
use crate::error::{AppError, AppResult};
use crate::payments::traits::AccountBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eligibility {
    pub eligible: bool,
    pub reason: Option<String>,
}

impl Eligibility {
    pub fn allowed() -> Self {
        Self {
            eligible: true,
            reason: None,
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            eligible: false,
            reason: Some(reason.into()),
        }
    }

    /// Turn a denial into the error the rest of the flow propagates
    pub fn into_result(self) -> AppResult<()> {
        if self.eligible {
            Ok(())
        } else {
            Err(AppError::authorization(
                self.reason.unwrap_or_else(|| "account is not eligible".to_string()),
            ))
        }
    }
}

/// Fails closed: a known ban, a lookup error, or any missing capability flag
/// all mean "not eligible". No retries.
pub struct AccountGate {
    backend: Arc<dyn AccountBackend>,
    state: Arc<AccountState>,
}

impl AccountGate {
    pub fn new(backend: Arc<dyn AccountBackend>, state: Arc<AccountState>) -> Self {
        Self { backend, state }
    }

    pub async fn check_eligibility(&self, user_id: &str) -> Eligibility {
        // A known restriction blocks without asking the backend
        if let Some(denied) = self.restricted(user_id) {
            return denied;
        }

        let capabilities = match self.backend.account_capabilities(user_id).await {
            Ok(capabilities) => capabilities,
            Err(e) => {
                warn!(user_id, error = %e, "account lookup failed, denying");
                return Eligibility::denied("could not verify account status");
            }
        };

        // A ban may have landed while the lookup was in flight
        if let Some(denied) = self.restricted(user_id) {
            return denied;
        }

        match capabilities.blocking_reason() {
            Some(reason) => {
                info!(user_id, reason, "eligibility denied");
                Eligibility::denied(reason)
            }
            None => {
                debug!(user_id, "eligibility granted");
                Eligibility::allowed()
            }
        }
    }

    fn restricted(&self, user_id: &str) -> Option<Eligibility> {
        let restriction = self.state.restriction();
        if !restriction.is_banned {
            return None;
        }
        info!(user_id, "eligibility denied: account restricted");
        Some(Eligibility::denied(restriction_message(restriction.reason)))
    }
}

/// "account is restricted", plus the ban reason when one was given
pub fn restriction_message(reason: Option<String>) -> String {
    format!(
        "account is restricted{}",
        reason.map(|r| format!(": {}", r)).unwrap_or_default()
    )
}
