//! Exchange rates and the minimum-charge policy
//!
//! The processor's minimum charge is fixed in the reference currency (USD).
//! To validate an amount in another currency the minimum is converted with a
//! cached USD→currency rate:
//! - a cached rate younger than the TTL is used as-is
//! - otherwise the rate source is asked once
//! - if that fails, any cached rate (even stale) is used
//! - and failing that, the currency's hardcoded default

use crate::error::{AppError, AppResult, ValidationError};
use crate::payments::types::{Currency, PaymentRequestSpec};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A USD→currency rate and when it was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeRate {
    pub rate: Decimal,
    pub fetched_at: DateTime<Utc>,
}

impl ExchangeRate {
    pub fn new(rate: Decimal) -> Self {
        Self {
            rate,
            fetched_at: Utc::now(),
        }
    }

    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now.signed_duration_since(self.fetched_at) < ttl,
            Err(_) => true,
        }
    }
}

/// Where fresh rates come from
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Units of `currency` per one unit of the reference currency
    async fn fetch_rate(&self, currency: Currency) -> AppResult<Decimal>;
}

/// FX endpoint returning `{"rates": {"JMD": 157.3, ...}}` for a USD base
pub struct HttpRateSource {
    client: Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    rates: HashMap<String, Decimal>,
}

impl HttpRateSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to create FX client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    async fn fetch_rate(&self, currency: Currency) -> AppResult<Decimal> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| AppError::transient("fx source", None, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::transient(
                "fx source",
                Some(status.as_u16()),
                format!("HTTP {}", status.as_u16()),
            ));
        }

        let body: RatesResponse = response
            .json()
            .await
            .map_err(|e| AppError::protocol(format!("Invalid FX response: {}", e)))?;

        body.rates
            .get(currency.code())
            .copied()
            .filter(|rate| *rate > Decimal::ZERO)
            .ok_or_else(|| AppError::protocol(format!("FX response has no rate for {}", currency)))
    }
}

/// Process-wide cache of USD→currency rates
pub struct ExchangeRateCache {
    source: Arc<dyn RateSource>,
    ttl: Duration,
    entries: RwLock<HashMap<Currency, ExchangeRate>>,
}

impl ExchangeRateCache {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

    pub fn new(source: Arc<dyn RateSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn cached(&self, currency: Currency) -> Option<ExchangeRate> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(&currency).copied())
    }

    /// Replace the cached rate for one currency in a single assignment
    pub fn store(&self, currency: Currency, rate: ExchangeRate) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(currency, rate);
        }
    }

    /// Resolve the rate to use right now. Never fails.
    pub async fn rate_for(&self, currency: Currency) -> Decimal {
        if currency == Currency::REFERENCE {
            return Decimal::ONE;
        }

        let cached = self.cached(currency);
        if let Some(entry) = cached {
            if entry.is_fresh(self.ttl, Utc::now()) {
                debug!(%currency, rate = %entry.rate, "exchange rate cache hit");
                return entry.rate;
            }
        }

        match self.source.fetch_rate(currency).await {
            Ok(rate) => {
                info!(%currency, %rate, "exchange rate refreshed");
                self.store(currency, ExchangeRate::new(rate));
                rate
            }
            Err(e) => match cached {
                Some(entry) => {
                    warn!(%currency, error = %e, fetched_at = %entry.fetched_at, "FX fetch failed, using cached rate");
                    entry.rate
                }
                None => {
                    let fallback = currency.default_rate();
                    warn!(%currency, error = %e, rate = %fallback, "FX fetch failed, using default rate");
                    fallback
                }
            },
        }
    }
}

/// Minimum chargeable amount, fixed in the reference currency
#[derive(Debug, Clone, Copy)]
pub struct MinimumCharge {
    pub reference_minimum: Decimal,
}

impl Default for MinimumCharge {
    fn default() -> Self {
        Self {
            reference_minimum: Decimal::ONE,
        }
    }
}

impl MinimumCharge {
    pub fn new(reference_minimum: Decimal) -> Self {
        Self { reference_minimum }
    }

    /// Minimum in `currency` given a USD→currency rate, rounded to minor units
    pub fn minimum_in(&self, currency: Currency, rate: Decimal) -> Decimal {
        (self.reference_minimum * rate).round_dp_with_strategy(
            currency.minor_unit_exponent(),
            RoundingStrategy::MidpointAwayFromZero,
        )
    }

    /// Reject the request when its amount converts below the minimum
    pub async fn check(
        &self,
        spec: &PaymentRequestSpec,
        rates: &ExchangeRateCache,
    ) -> Result<(), ValidationError> {
        let rate = rates.rate_for(spec.currency).await;
        let minimum = self.minimum_in(spec.currency, rate);

        if spec.amount >= minimum {
            return Ok(());
        }

        let reference = Currency::REFERENCE.format_amount(self.reference_minimum);
        let minimum = if spec.currency == Currency::REFERENCE {
            reference
        } else {
            format!(
                "{} ({} {})",
                spec.currency.format_amount(minimum),
                reference,
                Currency::REFERENCE
            )
        };

        Err(ValidationError::AmountTooLow {
            amount: spec.amount.to_string(),
            currency: spec.currency.to_string(),
            minimum,
        })
    }
}
