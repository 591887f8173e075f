//! Payment link types and data structures
//!
//! Domain types shared by the issuer, poller and push channel, plus the wire
//! shapes of the backend's payment-link endpoints.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, AppResult, ValidationError};

/// Currencies a payment link can be issued in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Jmd,
    Eur,
    Gbp,
    Cad,
}

impl Currency {
    /// Currency the minimum charge is expressed in
    pub const REFERENCE: Currency = Currency::Usd;

    pub const ALL: [Currency; 5] = [
        Currency::Usd,
        Currency::Jmd,
        Currency::Eur,
        Currency::Gbp,
        Currency::Cad,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Jmd => "JMD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Cad => "CAD",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::Usd => "$",
            Currency::Jmd => "J$",
            Currency::Eur => "€",
            Currency::Gbp => "£",
            Currency::Cad => "CA$",
        }
    }

    /// Number of decimal places in one minor unit
    pub fn minor_unit_exponent(&self) -> u32 {
        2
    }

    /// Last-resort USD→currency rate when neither the FX source nor the cache
    /// can provide one
    pub fn default_rate(&self) -> Decimal {
        match self {
            Currency::Usd => Decimal::ONE,
            Currency::Jmd => Decimal::new(15700, 2),
            Currency::Eur => Decimal::new(92, 2),
            Currency::Gbp => Decimal::new(79, 2),
            Currency::Cad => Decimal::new(136, 2),
        }
    }

    /// Convert a major-unit amount into integer minor units, rounding half
    /// away from zero
    pub fn to_minor_units(&self, amount: Decimal) -> AppResult<i64> {
        let scale = Decimal::from(10_i64.pow(self.minor_unit_exponent()));
        let minor = (amount * scale).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        i64::try_from(minor).map_err(|_| {
            AppError::validation(ValidationError::AmountOutOfRange {
                amount: amount.to_string(),
            })
        })
    }

    /// Format an amount with the currency symbol, e.g. `$1.00` or `J$157.00`
    pub fn format_amount(&self, amount: Decimal) -> String {
        let rounded = amount.round_dp_with_strategy(
            self.minor_unit_exponent(),
            RoundingStrategy::MidpointAwayFromZero,
        );
        format!(
            "{}{:.prec$}",
            self.symbol(),
            rounded,
            prec = self.minor_unit_exponent() as usize
        )
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_uppercase();
        Currency::ALL
            .into_iter()
            .find(|c| c.code() == code)
            .ok_or_else(|| {
                AppError::configuration(format!("Unsupported currency '{}'", s.trim()))
            })
    }
}

/// What the payer is being asked to pay. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequestSpec {
    /// Amount in major units (e.g. dollars)
    pub amount: Decimal,
    pub currency: Currency,
    pub payer_display_name: String,
    pub payer_email: Option<String>,
    pub description: String,
}

impl PaymentRequestSpec {
    pub fn new(amount: Decimal, currency: Currency, description: impl Into<String>) -> Self {
        Self {
            amount,
            currency,
            payer_display_name: String::new(),
            payer_email: None,
            description: description.into(),
        }
    }

    pub fn with_payer(mut self, name: impl Into<String>, email: Option<String>) -> Self {
        self.payer_display_name = name.into();
        self.payer_email = email;
        self
    }

    /// Shape checks that need no exchange rate
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount);
        }
        if self.description.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "description".to_string(),
            });
        }
        // Sent as the processor's customer name
        if self.payer_display_name.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "payer_display_name".to_string(),
            });
        }
        Ok(())
    }
}

/// Status of a payment link. Completed and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Failed)
    }

    /// Map the processor's status string onto the local lifecycle
    pub fn from_remote(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "paid" | "completed" => PaymentStatus::Completed,
            "failed" | "expired" => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single-use payment request issued by the processor.
///
/// The url never changes after issue; a refresh produces a new link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLink {
    pub link_id: String,
    pub url: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

/// Body of `POST /stripe/create-payment-link`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLinkRequest {
    pub user_id: String,
    /// Minor units
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub customer_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
}

/// Response of `POST /stripe/create-payment-link`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLinkResponse {
    pub id: String,
    pub payment_link_url: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl CreateLinkResponse {
    pub fn into_link(self) -> PaymentLink {
        PaymentLink {
            link_id: self.id,
            url: self.payment_link_url,
            status: self
                .status
                .as_deref()
                .map(PaymentStatus::from_remote)
                .unwrap_or(PaymentStatus::Pending),
            created_at: Utc::now(),
        }
    }
}

/// Response of `GET /stripe/payment-link-status/{linkId}`
#[derive(Debug, Clone, Deserialize)]
pub struct LinkStatusResponse {
    pub status: String,
}

/// Onboarding and charge capability flags of the connected account.
///
/// Missing flags deserialize as `None` and count as "not capable".
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountCapabilities {
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub charges_enabled: Option<bool>,
    #[serde(default)]
    pub details_submitted: Option<bool>,
    #[serde(default)]
    pub onboarding_complete: Option<bool>,
}

impl AccountCapabilities {
    /// Reason the account cannot take payments, if any
    pub fn blocking_reason(&self) -> Option<&'static str> {
        if self.account_id.as_deref().map_or(true, |id| id.trim().is_empty()) {
            return Some("no connected payment account");
        }
        // onboardingComplete is authoritative when present, detailsSubmitted otherwise
        let onboarded = self.onboarding_complete.or(self.details_submitted);
        if onboarded != Some(true) {
            return Some("onboarding is not complete");
        }
        if self.charges_enabled != Some(true) {
            return Some("charges are not enabled");
        }
        None
    }
}

/// Response of `GET /users/ban-status/{userId}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanStatusResponse {
    pub is_banned: bool,
    #[serde(default)]
    pub ban_reason: Option<String>,
    #[serde(default)]
    pub ban_type: Option<String>,
}
