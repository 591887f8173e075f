//! Remote backend trait definitions
//!
//! The engine talks to the payment backend through these traits so the
//! transport can be swapped (HTTP in production, in-memory fakes in tests).

use crate::error::AppResult;
use crate::payments::types::{
    AccountCapabilities, BanStatusResponse, CreateLinkRequest, PaymentLink, PaymentStatus,
};
use async_trait::async_trait;

/// Payment-link endpoints of the backend
#[async_trait]
pub trait PaymentBackend: Send + Sync {
    /// Create a single-use payment link
    ///
    /// Called at most once per session. Implementations must not retry on
    /// their own: a failed create is surfaced and the caller decides whether
    /// to start a new session.
    ///
    /// # Errors
    /// * `ClientFault` for 4xx responses
    /// * `TransientServer` for 5xx responses and network failures
    /// * `Timeout` when the HTTP client gives up
    async fn create_payment_link(&self, request: CreateLinkRequest) -> AppResult<PaymentLink>;

    /// Fetch the current status of a payment link, already mapped onto the
    /// local lifecycle
    async fn payment_link_status(&self, link_id: &str) -> AppResult<PaymentStatus>;
}

/// Account lookups used by the account gate and the ban poller
#[async_trait]
pub trait AccountBackend: Send + Sync {
    /// Onboarding and charge capability flags for the user's connected account
    async fn account_capabilities(&self, user_id: &str) -> AppResult<AccountCapabilities>;

    /// Current ban status of the user
    async fn ban_status(&self, user_id: &str) -> AppResult<BanStatusResponse>;
}
