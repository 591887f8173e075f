//! Push channel: one persistent connection per signed-in user carrying typed
//! JSON envelopes, with bounded reconnects and per-kind handler dispatch.

pub mod channel;
pub mod connection;
pub mod dispatch;
pub mod messages;
pub mod transport;

pub use channel::PushChannel;
pub use connection::{ChannelSnapshot, ConnectionManager, PushConnectionState, ReconnectPolicy};
pub use dispatch::{HandlerRegistry, PushHandler, SubscriptionId};
pub use messages::{decode, Decoded, PushKind, PushMessage};
pub use transport::{PushStream, PushTransport, StreamEvent, ABNORMAL_CLOSURE, NORMAL_CLOSURE};

#[cfg(feature = "ws")]
pub use transport::WsTransport;
