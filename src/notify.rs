//! High-salience notifications
//!
//! Presentation (toasts, haptics, alerts) lives outside the engine; the engine
//! only decides *when* something must be shown, through `Notifier`.

use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The account was restricted; shown once per restriction
    AccountRestricted { reason: Option<String> },
    /// An explicit unban signal lifted the restriction
    AccountRestored,
    /// The push channel gave up reconnecting
    ChannelUnavailable,
    OnboardingComplete,
    OnboardingFailed { reason: Option<String> },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Writes notices to the log. Used by the binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        match notice {
            Notice::AccountRestricted { reason } => warn!(
                reason = reason.as_deref().unwrap_or("unspecified"),
                "account restricted: payments are disabled"
            ),
            Notice::AccountRestored => info!("account restriction lifted"),
            Notice::ChannelUnavailable => {
                warn!("live updates unavailable; payment status will be checked periodically")
            }
            Notice::OnboardingComplete => info!("onboarding complete"),
            Notice::OnboardingFailed { reason } => warn!(
                reason = reason.as_deref().unwrap_or("unspecified"),
                "onboarding failed"
            ),
        }
    }
}
