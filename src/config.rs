use anyhow::{anyhow, Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::logging::{LogFormat, LoggingConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,
    pub backend: BackendConfig,
    pub push: PushConfig,
    pub fx: FxConfig,
    pub timing: TimingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub url: String,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct FxConfig {
    pub url: String,
    pub rate_ttl: Duration,
    pub min_charge_usd: Decimal,
}

#[derive(Debug, Clone)]
pub struct TimingConfig {
    pub link_deadline: Duration,
    pub poll_interval: Duration,
    pub ban_poll_interval: Duration,
}

const DEFAULT_FX_URL: &str = "https://open.er-api.com/v6/latest/USD";

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` passes the process
    /// environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let secs = |key: &str, default: &str| -> Result<Duration> {
            let value: u64 = var_or(key, default)
                .trim()
                .parse()
                .with_context(|| format!("{} must be a whole number of seconds", key))?;
            Ok(Duration::from_secs(value))
        };

        let backend = BackendConfig {
            base_url: lookup("API_BASE_URL").context("API_BASE_URL not set")?,
            api_token: lookup("API_TOKEN").filter(|t| !t.trim().is_empty()),
            request_timeout: secs("REQUEST_TIMEOUT_SECS", "15")?,
        };

        let push = PushConfig {
            url: lookup("PUSH_URL").context("PUSH_URL not set")?,
            reconnect_delay: secs("PUSH_RECONNECT_DELAY_SECS", "3")?,
            max_reconnect_attempts: var_or("PUSH_MAX_RECONNECT_ATTEMPTS", "5")
                .trim()
                .parse()
                .context("PUSH_MAX_RECONNECT_ATTEMPTS must be a valid number")?,
        };

        let rate_ttl_hours: u64 = var_or("RATE_TTL_HOURS", "24")
            .trim()
            .parse()
            .context("RATE_TTL_HOURS must be a valid number")?;
        let rate_ttl_secs = rate_ttl_hours
            .checked_mul(60 * 60)
            .ok_or_else(|| anyhow!("RATE_TTL_HOURS is too large: {}", rate_ttl_hours))?;
        let fx = FxConfig {
            url: var_or("FX_URL", DEFAULT_FX_URL),
            rate_ttl: Duration::from_secs(rate_ttl_secs),
            min_charge_usd: Decimal::from_str(var_or("MIN_CHARGE_USD", "1.00").trim())
                .context("MIN_CHARGE_USD must be a decimal amount")?,
        };

        let timing = TimingConfig {
            link_deadline: secs("LINK_DEADLINE_SECS", "20")?,
            poll_interval: secs("POLL_INTERVAL_SECS", "4")?,
            ban_poll_interval: secs("BAN_POLL_INTERVAL_SECS", "60")?,
        };

        let format = match var_or("LOG_FORMAT", "pretty").trim().to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "json" => LogFormat::Json,
            other => return Err(anyhow!("LOG_FORMAT must be 'pretty' or 'json', got {}", other)),
        };
        let logging = LoggingConfig {
            level: var_or("LOG_LEVEL", "info"),
            format,
        };

        let config = Config {
            environment: var_or("ENVIRONMENT", "development"),
            backend,
            push,
            fx,
            timing,
            logging,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.environment.as_str()) {
            return Err(anyhow!(
                "Environment must be one of: {:?}, got {}",
                valid_environments,
                self.environment
            ));
        }

        if self.backend.base_url.trim().is_empty() {
            return Err(anyhow!("API_BASE_URL cannot be empty"));
        }
        if !self.backend.base_url.starts_with("http://")
            && !self.backend.base_url.starts_with("https://")
        {
            return Err(anyhow!(
                "API_BASE_URL must be an http(s) URL, got {}",
                self.backend.base_url
            ));
        }

        if self.push.url.trim().is_empty() {
            return Err(anyhow!("PUSH_URL cannot be empty"));
        }
        if !self.push.url.starts_with("ws://") && !self.push.url.starts_with("wss://") {
            return Err(anyhow!(
                "PUSH_URL must be a ws:// or wss:// URL, got {}",
                self.push.url
            ));
        }

        if self.fx.url.trim().is_empty() {
            return Err(anyhow!("FX_URL cannot be empty"));
        }
        if self.fx.min_charge_usd <= Decimal::ZERO {
            return Err(anyhow!(
                "MIN_CHARGE_USD must be greater than 0, got {}",
                self.fx.min_charge_usd
            ));
        }
        if self.fx.rate_ttl.is_zero() {
            return Err(anyhow!("RATE_TTL_HOURS must be greater than 0"));
        }

        let poll_secs = self.timing.poll_interval.as_secs();
        if !(1..=60).contains(&poll_secs) {
            return Err(anyhow!(
                "POLL_INTERVAL_SECS must be between 1 and 60, got {}",
                poll_secs
            ));
        }
        for (name, value) in [
            ("REQUEST_TIMEOUT_SECS", self.backend.request_timeout),
            ("LINK_DEADLINE_SECS", self.timing.link_deadline),
            ("BAN_POLL_INTERVAL_SECS", self.timing.ban_poll_interval),
            ("PUSH_RECONNECT_DELAY_SECS", self.push.reconnect_delay),
        ] {
            if value.is_zero() {
                return Err(anyhow!("{} must be greater than 0", name));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("API_BASE_URL", "https://api.example.com"),
        ("PUSH_URL", "wss://push.example.com/ws"),
    ];

    #[test]
    fn test_defaults() {
        let config = load(&REQUIRED).unwrap();
        assert_eq!(config.environment, "development");
        assert_eq!(config.backend.request_timeout, Duration::from_secs(15));
        assert_eq!(config.timing.poll_interval, Duration::from_secs(4));
        assert_eq!(config.timing.link_deadline, Duration::from_secs(20));
        assert_eq!(config.timing.ban_poll_interval, Duration::from_secs(60));
        assert_eq!(config.push.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.push.max_reconnect_attempts, 5);
        assert_eq!(config.fx.rate_ttl, Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.fx.min_charge_usd, Decimal::new(100, 2));
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.backend.api_token.is_none());
    }

    #[test]
    fn test_missing_required() {
        let err = load(&[("PUSH_URL", "wss://push.example.com")]).unwrap_err();
        assert!(err.to_string().contains("API_BASE_URL"));
    }

    #[test]
    fn test_push_url_must_be_websocket() {
        let err = load(&[
            ("API_BASE_URL", "https://api.example.com"),
            ("PUSH_URL", "https://push.example.com"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("PUSH_URL"));
    }

    #[test]
    fn test_poll_interval_bounds() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("POLL_INTERVAL_SECS", "0"));
        assert!(load(&vars).is_err());

        let mut vars = REQUIRED.to_vec();
        vars.push(("POLL_INTERVAL_SECS", "61"));
        assert!(load(&vars).is_err());

        let mut vars = REQUIRED.to_vec();
        vars.push(("POLL_INTERVAL_SECS", "5"));
        assert_eq!(load(&vars).unwrap().timing.poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_bad_values() {
        for (key, value) in [
            ("ENVIRONMENT", "qa"),
            ("MIN_CHARGE_USD", "0"),
            ("MIN_CHARGE_USD", "one dollar"),
            ("LOG_FORMAT", "xml"),
            ("BAN_POLL_INTERVAL_SECS", "0"),
            ("REQUEST_TIMEOUT_SECS", "-1"),
        ] {
            let mut vars = REQUIRED.to_vec();
            vars.push((key, value));
            assert!(load(&vars).is_err(), "{}={} should be rejected", key, value);
        }
    }

    #[test]
    fn test_huge_rate_ttl_is_an_error() {
        let mut vars = REQUIRED.to_vec();
        let huge = u64::MAX.to_string();
        vars.push(("RATE_TTL_HOURS", huge.as_str()));
        let err = load(&vars).unwrap_err();
        assert!(err.to_string().contains("RATE_TTL_HOURS"));

        let mut vars = REQUIRED.to_vec();
        vars.push(("RATE_TTL_HOURS", "2"));
        assert_eq!(load(&vars).unwrap().fx.rate_ttl, Duration::from_secs(2 * 60 * 60));
    }

    #[test]
    fn test_json_logging_and_token() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("LOG_FORMAT", "JSON"));
        vars.push(("API_TOKEN", "secret"));
        let config = load(&vars).unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.backend.api_token.as_deref(), Some("secret"));
    }
}
