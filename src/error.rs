//! Error taxonomy for the payment-link engine
//!
//! One-shot operations (account gate, link issuer) surface these errors to
//! their caller. Background tasks (status poller, push channel) log them and
//! keep going.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type used across the crate
pub type AppResult<T> = Result<T, AppError>;

/// Input rejected before any remote call was made
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Amount must be greater than zero")]
    NonPositiveAmount,

    #[error("Amount {amount} {currency} is below the minimum charge of {minimum}")]
    AmountTooLow {
        amount: String,
        currency: String,
        /// Minimum expressed for display, e.g. "$1.00" or "J$157.00 ($1.00 USD)"
        minimum: String,
    },

    #[error("Amount {amount} cannot be represented in minor units")]
    AmountOutOfRange { amount: String },

    #[error("Field '{field}' cannot be empty")]
    EmptyField { field: String },

    #[error("A payment link was already issued for session {session_id}")]
    LinkAlreadyIssued { session_id: String },

    #[error("Payment link {link_id} is already settled and cannot be reused")]
    TerminalLink { link_id: String },
}

/// Failures reported by a remote service
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExternalError {
    /// 4xx: the request itself was rejected
    #[error("{service} rejected the request (HTTP {status}): {message}")]
    ClientFault {
        service: String,
        status: u16,
        message: String,
    },

    /// 5xx or a network failure
    #[error("{service} is temporarily unavailable: {message}")]
    TransientServer {
        service: String,
        status: Option<u16>,
        message: String,
    },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InfrastructureError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("HTTP client error: {message}")]
    HttpClient { message: String },

    #[error("Push transport error: {message}")]
    Transport { message: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AppErrorKind {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout { operation: String, after: Duration },

    #[error(transparent)]
    External(#[from] ExternalError),

    #[error("Account is not allowed to transact: {reason}")]
    Authorization { reason: String },

    #[error("Malformed message: {message}")]
    Protocol { message: String },

    #[error("Session {session_id} was superseded")]
    Superseded { session_id: String },

    #[error("{operation} was cancelled")]
    Cancelled { operation: String },

    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    pub fn with_context<S: Into<String>>(mut self, context: S) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn validation(error: ValidationError) -> Self {
        Self::new(AppErrorKind::Validation(error))
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::new(AppErrorKind::Timeout {
            operation: operation.into(),
            after,
        })
    }

    pub fn authorization(reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Authorization {
            reason: reason.into(),
        })
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Protocol {
            message: message.into(),
        })
    }

    pub fn superseded(session_id: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Superseded {
            session_id: session_id.into(),
        })
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Cancelled {
            operation: operation.into(),
        })
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: message.into(),
            },
        ))
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(InfrastructureError::Transport {
            message: message.into(),
        }))
    }

    pub fn client_fault(service: &str, status: u16, message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::External(ExternalError::ClientFault {
            service: service.to_string(),
            status,
            message: message.into(),
        }))
    }

    pub fn transient(service: &str, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::External(ExternalError::TransientServer {
            service: service.to_string(),
            status,
            message: message.into(),
        }))
    }

    /// Whether asking the user to try again could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            AppErrorKind::Timeout { .. }
                | AppErrorKind::External(ExternalError::TransientServer { .. })
                | AppErrorKind::Superseded { .. }
                | AppErrorKind::Cancelled { .. }
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.kind, AppErrorKind::Validation(_))
    }

    pub fn is_authorization(&self) -> bool {
        matches!(self.kind, AppErrorKind::Authorization { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, AppErrorKind::Timeout { .. })
    }

    /// Text suitable for showing to the person requesting the link.
    ///
    /// Validation and authorization failures are explained; everything else
    /// collapses to a generic retry prompt.
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Validation(e) => e.to_string(),
            AppErrorKind::Authorization { reason } => {
                format!("Payments are unavailable for this account: {}", reason)
            }
            AppErrorKind::External(ExternalError::ClientFault { message, .. }) => {
                format!("The payment request was rejected: {}", message)
            }
            _ => "Something went wrong while contacting the payment service. Please try again."
                .to_string(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{} ({})", self.kind, context),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for AppError {}

impl From<ValidationError> for AppError {
    fn from(error: ValidationError) -> Self {
        Self::validation(error)
    }
}

impl From<ExternalError> for AppError {
    fn from(error: ExternalError) -> Self {
        Self::new(AppErrorKind::External(error))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::protocol(format!("JSON error: {}", error))
    }
}
