//! Payment backend integration module
//!
//! Domain types for payment links and the traits the engine uses to reach the
//! backend, with the HTTP implementation under `providers`.

pub mod providers;
pub mod traits;
pub mod types;

pub use traits::{AccountBackend, PaymentBackend};
pub use types::{Currency, PaymentLink, PaymentRequestSpec, PaymentStatus};
