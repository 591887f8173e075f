//! Account eligibility and restriction tracking

pub mod ban;
pub mod gate;
pub mod state;

pub use ban::{BanPoller, BanPollerConfig};
pub use gate::{AccountGate, Eligibility};
pub use state::{AccountRestriction, AccountState};
