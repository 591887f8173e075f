//! Stripe-backed payment link endpoints
//!
//! The app backend fronts Stripe; this client talks to the backend's
//! `/stripe/*` and `/users/*` routes over HTTP.

use crate::error::{AppError, AppResult};
use crate::payments::traits::{AccountBackend, PaymentBackend};
use crate::payments::types::{
    AccountCapabilities, BanStatusResponse, CreateLinkRequest, CreateLinkResponse,
    LinkStatusResponse, PaymentLink, PaymentStatus,
};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const SERVICE: &str = "payment backend";

/// Backend client configuration
#[derive(Debug, Clone)]
pub struct StripeBackendConfig {
    /// Backend base URL, without trailing slash
    pub base_url: String,
    /// Optional bearer token sent with every request
    pub api_token: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for StripeBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            api_token: None,
            timeout: Duration::from_secs(15),
        }
    }
}

/// HTTP client for the payment backend
pub struct StripeBackend {
    config: StripeBackendConfig,
    base_url: Url,
    client: Client,
}

impl StripeBackend {
    pub fn new(mut config: StripeBackendConfig) -> AppResult<Self> {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            AppError::configuration(format!("Invalid backend url '{}': {}", config.base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::configuration(format!(
                "Backend url '{}' cannot carry a path",
                config.base_url
            )));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("paylink-engine/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        info!(base_url = %config.base_url, "payment backend client initialized");
        Ok(Self {
            config,
            base_url,
            client,
        })
    }

    pub fn config(&self) -> &StripeBackendConfig {
        &self.config
    }

    /// Base url with `segments` appended, each one percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Issue one request and decode the JSON body.
    ///
    /// No retries: 4xx maps to a client fault, 5xx and network failures to a
    /// transient error, client-side timeouts to `Timeout`.
    async fn send<T>(
        &self,
        method: reqwest::Method,
        segments: &[&str],
        body: Option<&serde_json::Value>,
    ) -> AppResult<T>
    where
        T: DeserializeOwned,
    {
        let url = self.endpoint(segments);
        let path = url.path().to_string();
        let endpoint = path.as_str();
        let mut request = self
            .client
            .request(method.clone(), url)
            .header("Accept", "application/json");

        if let Some(token) = &self.config.api_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                warn!(%method, endpoint, "request timed out");
                AppError::timeout(format!("{} {}", method, endpoint), self.config.timeout)
            } else {
                warn!(%method, endpoint, error = %e, "request failed");
                AppError::transient(SERVICE, None, e.to_string())
            }
        })?;

        let status = response.status();
        let response_text = response.text().await.unwrap_or_default();

        if status.is_success() {
            debug!(%method, endpoint, status = status.as_u16(), "request succeeded");
            return serde_json::from_str::<T>(&response_text).map_err(|e| {
                error!(endpoint, "failed to parse backend response: {}", e);
                AppError::protocol(format!("Invalid response format: {}", e))
                    .with_context(endpoint.to_string())
            });
        }

        let message = extract_error_message(&response_text)
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

        if status.is_client_error() {
            warn!(endpoint, status = status.as_u16(), %message, "backend rejected request");
            Err(AppError::client_fault(SERVICE, status.as_u16(), message))
        } else {
            warn!(endpoint, status = status.as_u16(), %message, "backend error");
            Err(AppError::transient(SERVICE, Some(status.as_u16()), message))
        }
    }
}

/// Pull a human-readable message out of `{"error": ...}` / `{"message": ...}` bodies
fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["error", "message"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}

#[async_trait]
impl PaymentBackend for StripeBackend {
    async fn create_payment_link(&self, request: CreateLinkRequest) -> AppResult<PaymentLink> {
        info!(
            user_id = %request.user_id,
            amount = request.amount,
            currency = %request.currency,
            "creating payment link"
        );

        let payload = serde_json::to_value(&request)?;
        let response: CreateLinkResponse = self
            .send(
                reqwest::Method::POST,
                &["stripe", "create-payment-link"],
                Some(&payload),
            )
            .await?;

        if response.payment_link_url.trim().is_empty() {
            return Err(AppError::protocol("Backend returned an empty payment link url"));
        }

        let link = response.into_link();
        info!(link_id = %link.link_id, "payment link created");
        Ok(link)
    }

    async fn payment_link_status(&self, link_id: &str) -> AppResult<PaymentStatus> {
        let response: LinkStatusResponse = self
            .send(
                reqwest::Method::GET,
                &["stripe", "payment-link-status", link_id],
                None,
            )
            .await?;

        let status = PaymentStatus::from_remote(&response.status);
        debug!(link_id, remote = %response.status, %status, "payment link status");
        Ok(status)
    }
}

#[async_trait]
impl AccountBackend for StripeBackend {
    async fn account_capabilities(&self, user_id: &str) -> AppResult<AccountCapabilities> {
        self.send(
            reqwest::Method::GET,
            &["stripe", "user-account", user_id],
            None,
        )
        .await
    }

    async fn ban_status(&self, user_id: &str) -> AppResult<BanStatusResponse> {
        self.send(
            reqwest::Method::GET,
            &["users", "ban-status", user_id],
            None,
        )
        .await
    }
}
