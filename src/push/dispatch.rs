//! Handler registry for push messages
//!
//! Handlers subscribe per message kind and get a `SubscriptionId` back for
//! unsubscribing. Dispatch never fails: malformed frames and unknown types are
//! logged and dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use super::messages::{decode, Decoded, PushKind, PushMessage};

pub type PushHandler = Arc<dyn Fn(&PushMessage) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<PushKind, Vec<(SubscriptionId, PushHandler)>>>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: PushKind, handler: F) -> SubscriptionId
    where
        F: Fn(&PushMessage) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut handlers) = self.handlers.write() {
            handlers
                .entry(kind)
                .or_default()
                .push((id, Arc::new(handler)));
        }
        debug!(%kind, subscription = id.0, "push handler subscribed");
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Ok(mut handlers) = self.handlers.write() else {
            return false;
        };
        let mut removed = false;
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|(sid, _)| *sid != id);
            removed |= list.len() != before;
        }
        handlers.retain(|_, list| !list.is_empty());
        removed
    }

    pub fn handler_count(&self, kind: PushKind) -> usize {
        self.handlers
            .read()
            .map(|handlers| handlers.get(&kind).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Deliver a decoded message to every handler of its kind. Returns the
    /// number of handlers invoked.
    pub fn dispatch(&self, message: &PushMessage) -> usize {
        // Snapshot first so handlers may (un)subscribe without deadlocking
        let targets: Vec<PushHandler> = self
            .handlers
            .read()
            .map(|handlers| {
                handlers
                    .get(&message.kind())
                    .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default();

        if targets.is_empty() {
            debug!(kind = %message.kind(), "no handler for push message");
        }
        for handler in &targets {
            handler(message);
        }
        targets.len()
    }

    /// Decode a raw frame and dispatch it
    pub fn dispatch_text(&self, text: &str) -> usize {
        match decode(text) {
            Ok(Decoded::Known(message)) => self.dispatch(&message),
            Ok(Decoded::Unknown { message_type }) => {
                warn!(message_type = %message_type, "unknown push message type dropped");
                0
            }
            Err(e) => {
                warn!(error = %e, "malformed push message dropped");
                0
            }
        }
    }
}
