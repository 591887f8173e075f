//! Link issuer
//!
//! Creates at most one payment link per session. Shape and minimum-charge
//! validation run before any remote call; the create call itself is raced
//! against a fixed deadline and is never retried. A caller that already holds
//! a link can hand it back for reuse, which binds it without a remote call.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::account::gate::restriction_message;
use crate::account::AccountState;
use crate::error::{AppError, AppResult, ValidationError};
use crate::fx::{ExchangeRateCache, MinimumCharge};
use crate::operation::run_with_deadline;
use crate::payments::traits::PaymentBackend;
use crate::payments::types::{CreateLinkRequest, PaymentLink, PaymentRequestSpec};
use crate::session::{SessionCorrelator, SessionId};

/// Everything needed to issue one link
#[derive(Debug, Clone)]
pub struct LinkRequest {
    pub user_id: String,
    pub spec: PaymentRequestSpec,
    pub session_id: SessionId,
    /// Previously issued link to bind instead of creating a new one
    pub reuse: Option<PaymentLink>,
}

pub struct LinkIssuer {
    backend: Arc<dyn PaymentBackend>,
    correlator: Arc<SessionCorrelator>,
    rates: Arc<ExchangeRateCache>,
    minimum: MinimumCharge,
    deadline: Duration,
    /// Checked immediately before the create call goes out
    account_state: Option<Arc<AccountState>>,
    /// Sessions that already spent their one create call
    claimed: Mutex<HashSet<SessionId>>,
}

impl LinkIssuer {
    pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(20);

    pub fn new(
        backend: Arc<dyn PaymentBackend>,
        correlator: Arc<SessionCorrelator>,
        rates: Arc<ExchangeRateCache>,
        minimum: MinimumCharge,
        deadline: Duration,
    ) -> Self {
        Self {
            backend,
            correlator,
            rates,
            minimum,
            deadline,
            account_state: None,
            claimed: Mutex::new(HashSet::new()),
        }
    }

    /// Refuse to create links while `state` reports the account restricted
    pub fn with_account_state(mut self, state: Arc<AccountState>) -> Self {
        self.account_state = Some(state);
        self
    }

    /// Claim the session's single create call. False when already claimed.
    fn claim(&self, session_id: &SessionId) -> bool {
        let mut claimed = self.claimed.lock().unwrap_or_else(|p| p.into_inner());
        // Only the active session can still create; older claims are dead weight
        let current = self.correlator.current();
        claimed.retain(|id| Some(id) == current.as_ref());
        claimed.insert(session_id.clone())
    }

    /// Issue (or reuse) the link for `request.session_id`.
    ///
    /// # Errors
    /// - `Validation` for bad input, an amount under the minimum, a session
    ///   that already has a link, or a settled link offered for reuse
    /// - `Authorization` when the account is restricted
    /// - `External` / `Timeout` from the create call
    /// - `Superseded` when the session was replaced before the link arrived
    pub async fn create_link(&self, request: LinkRequest) -> AppResult<PaymentLink> {
        let LinkRequest {
            user_id,
            spec,
            session_id,
            reuse,
        } = request;

        if let Some(link) = reuse {
            return self.reuse_link(&session_id, link);
        }

        spec.validate()?;
        if user_id.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "user_id".to_string(),
            }
            .into());
        }
        if !self.correlator.is_current(&session_id) {
            return Err(AppError::superseded(session_id.as_str()));
        }
        if self.correlator.link_for(&session_id).is_some() {
            return Err(ValidationError::LinkAlreadyIssued {
                session_id: session_id.to_string(),
            }
            .into());
        }

        self.minimum.check(&spec, &self.rates).await?;
        let amount = spec.currency.to_minor_units(spec.amount)?;

        if let Some(state) = &self.account_state {
            let restriction = state.restriction();
            if restriction.is_banned {
                info!(session_id = %session_id, "account restricted, payment link not created");
                return Err(AppError::authorization(restriction_message(restriction.reason)));
            }
        }

        if !self.claim(&session_id) {
            return Err(ValidationError::LinkAlreadyIssued {
                session_id: session_id.to_string(),
            }
            .into());
        }

        let payload = CreateLinkRequest {
            user_id,
            amount,
            currency: spec.currency.code().to_lowercase(),
            description: spec.description.clone(),
            customer_name: spec.payer_display_name.clone(),
            customer_email: spec.payer_email.clone(),
        };

        let backend = self.backend.clone();
        let link = run_with_deadline("create payment link", self.deadline, async move {
            backend.create_payment_link(payload).await
        })
        .await
        .and_then(|created| created)
        .map_err(|e| {
            warn!(session_id = %session_id, error = %e, "payment link creation failed");
            e
        })?;

        if link.url.trim().is_empty() {
            return Err(AppError::protocol("payment link has an empty url"));
        }

        if !self.correlator.bind_link(&session_id, &link.link_id) {
            debug!(session_id = %session_id, link_id = %link.link_id, "link arrived for a stale session, discarded");
            return Err(AppError::superseded(session_id.as_str()));
        }

        info!(
            session_id = %session_id,
            link_id = %link.link_id,
            amount = %spec.amount,
            currency = %spec.currency,
            "payment link issued"
        );
        Ok(link)
    }

    fn reuse_link(&self, session_id: &SessionId, link: PaymentLink) -> AppResult<PaymentLink> {
        if link.status.is_terminal() {
            return Err(ValidationError::TerminalLink {
                link_id: link.link_id,
            }
            .into());
        }

        match self.correlator.link_for(session_id) {
            Some(bound) if bound == link.link_id => return Ok(link),
            Some(_) => {
                return Err(ValidationError::LinkAlreadyIssued {
                    session_id: session_id.to_string(),
                }
                .into())
            }
            None => {}
        }

        if !self.correlator.bind_link(session_id, &link.link_id) {
            return Err(AppError::superseded(session_id.as_str()));
        }
        info!(session_id = %session_id, link_id = %link.link_id, "existing payment link reused");
        Ok(link)
    }
}
