//! Backend implementations
//!
//! Concrete implementations of the `PaymentBackend` and `AccountBackend` traits.

pub mod stripe;

pub use stripe::{StripeBackend, StripeBackendConfig};
