//! Process-wide push channel
//!
//! Holds at most one `ConnectionManager`, always for the signed-in identity.
//! Identity changes go through `switch_user`, which tears the old connection
//! down before a new one is built.

use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use super::connection::{ChannelSnapshot, ConnectionManager, ReconnectPolicy};
use super::dispatch::HandlerRegistry;
use super::transport::PushTransport;
use crate::notify::Notifier;

pub struct PushChannel {
    transport: Arc<dyn PushTransport>,
    handlers: Arc<HandlerRegistry>,
    policy: ReconnectPolicy,
    snapshot: Arc<watch::Sender<ChannelSnapshot>>,
    notifier: Option<Arc<dyn Notifier>>,
    manager: Mutex<Option<ConnectionManager>>,
}

impl PushChannel {
    pub fn new(
        transport: Arc<dyn PushTransport>,
        policy: ReconnectPolicy,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        let (snapshot, _) = watch::channel(ChannelSnapshot::disconnected());
        Self {
            transport,
            handlers: Arc::new(HandlerRegistry::new()),
            policy,
            snapshot: Arc::new(snapshot),
            notifier,
            manager: Mutex::new(None),
        }
    }

    pub fn handlers(&self) -> Arc<HandlerRegistry> {
        self.handlers.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Open the channel for `user_id`. A no-op when a live connection for the
    /// same user exists; a connection for any other user is torn down first.
    pub async fn connect(&self, user_id: &str) {
        let mut slot = self.manager.lock().await;

        if let Some(current) = slot.as_ref() {
            if current.user_id() == user_id && current.is_running() {
                debug!(user_id, "push channel already connected");
                return;
            }
        }
        if let Some(mut previous) = slot.take() {
            previous.teardown().await;
        }

        let mut manager = ConnectionManager::new(
            user_id,
            self.transport.clone(),
            self.handlers.clone(),
            self.policy.clone(),
            self.snapshot.clone(),
            self.notifier.clone(),
        );
        manager.start();
        info!(user_id, "push channel connecting");
        *slot = Some(manager);
    }

    /// Tear down the connection held for `user_id`. Returns false when there
    /// was none; calling it twice is harmless.
    pub async fn disconnect(&self, user_id: &str) -> bool {
        let mut slot = self.manager.lock().await;
        match slot.as_ref() {
            Some(current) if current.user_id() == user_id => {}
            _ => return false,
        }
        if let Some(mut manager) = slot.take() {
            manager.teardown().await;
        }
        true
    }

    /// Follow an identity change. `None` means signed out.
    pub async fn switch_user(&self, user_id: Option<&str>) {
        match user_id {
            Some(user_id) => self.connect(user_id).await,
            None => self.teardown().await,
        }
    }

    /// Tear down whatever connection is held
    pub async fn teardown(&self) {
        if let Some(mut manager) = self.manager.lock().await.take() {
            manager.teardown().await;
        }
    }

    pub async fn connected_user(&self) -> Option<String> {
        self.manager
            .lock()
            .await
            .as_ref()
            .map(|manager| manager.user_id().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::connection::PushConnectionState;
    use crate::testing::{OpenScript, ScriptedTransport};
    use std::time::Duration;

    fn channel(transport: Arc<ScriptedTransport>) -> PushChannel {
        PushChannel::new(transport, ReconnectPolicy::default(), None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_same_user_is_noop() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(OpenScript::Accept(vec![]));
        let channel = channel(transport.clone());

        channel.connect("u1").await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        channel.connect("u1").await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(transport.opens(), 1);
        assert_eq!(channel.snapshot().state, PushConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_change_replaces_connection() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(OpenScript::Accept(vec![]));
        transport.push(OpenScript::Accept(vec![]));
        let channel = channel(transport.clone());

        channel.switch_user(Some("u1")).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        channel.switch_user(Some("u2")).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(transport.opened_for(), vec!["u1".to_string(), "u2".to_string()]);
        assert_eq!(channel.snapshot().user_id.as_deref(), Some("u2"));
        assert_eq!(channel.connected_user().await.as_deref(), Some("u2"));

        channel.switch_user(None).await;
        assert_eq!(channel.snapshot(), ChannelSnapshot::disconnected());
        assert!(channel.connected_user().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent_and_scoped_to_user() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(OpenScript::Accept(vec![]));
        let channel = channel(transport.clone());

        channel.connect("u1").await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!channel.disconnect("someone-else").await);
        assert_eq!(channel.snapshot().state, PushConnectionState::Connected);
        assert!(channel.disconnect("u1").await);
        assert!(!channel.disconnect("u1").await);
        assert_eq!(transport.close_codes(), vec![super::super::transport::NORMAL_CLOSURE]);
    }
}
