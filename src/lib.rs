//! Payment-link lifecycle engine.
//!
//! Issues single-use payment links behind an account gate and decides when a
//! link is done by racing a status poller against a push channel, with a
//! per-session compare-and-set so the outcome is delivered exactly once.

pub mod account;
pub mod config;
pub mod error;
pub mod flow;
pub mod fx;
pub mod issuer;
pub mod logging;
pub mod notify;
pub mod operation;
pub mod payments;
pub mod poller;
pub mod push;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{AppError, AppErrorKind, AppResult};
pub use flow::{FlowConfig, FlowDeps, FlowEvent, PaymentFlow, SettleSource};
