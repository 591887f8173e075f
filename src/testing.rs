//! In-crate fakes for the remote collaborators. Test builds only.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::{AppError, AppResult};
use crate::payments::traits::{AccountBackend, PaymentBackend};
use crate::payments::types::{
    AccountCapabilities, BanStatusResponse, CreateLinkRequest, CreateLinkResponse, PaymentLink,
    PaymentStatus,
};
use crate::push::transport::{PushStream, PushTransport, StreamEvent};

/// Scriptable payment + account backend that counts every call
pub(crate) struct FakeBackend {
    pub create_calls: AtomicUsize,
    pub account_calls: AtomicUsize,
    pub ban_calls: AtomicUsize,
    pub fail_account_lookup: AtomicBool,
    created: Mutex<Vec<CreateLinkRequest>>,
    create_delay: Mutex<Option<Duration>>,
    create_error: Mutex<Option<AppError>>,
    statuses: Mutex<HashMap<String, VecDeque<AppResult<PaymentStatus>>>>,
    status_calls: Mutex<HashMap<String, usize>>,
    status_delay: Mutex<Option<Duration>>,
    capabilities: Mutex<AccountCapabilities>,
    account_delay: Mutex<Option<Duration>>,
    ban: Mutex<BanStatusResponse>,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self {
            create_calls: AtomicUsize::new(0),
            account_calls: AtomicUsize::new(0),
            ban_calls: AtomicUsize::new(0),
            fail_account_lookup: AtomicBool::new(false),
            created: Mutex::new(Vec::new()),
            create_delay: Mutex::new(None),
            create_error: Mutex::new(None),
            statuses: Mutex::new(HashMap::new()),
            status_calls: Mutex::new(HashMap::new()),
            status_delay: Mutex::new(None),
            capabilities: Mutex::new(AccountCapabilities {
                account_id: Some("acct_test".to_string()),
                charges_enabled: Some(true),
                details_submitted: Some(true),
                onboarding_complete: Some(true),
            }),
            account_delay: Mutex::new(None),
            ban: Mutex::new(BanStatusResponse::default()),
        }
    }

    pub(crate) fn created(&self) -> Vec<CreateLinkRequest> {
        self.created.lock().unwrap().clone()
    }

    pub(crate) fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = Some(delay);
    }

    /// The next create call fails with `error`
    pub(crate) fn fail_next_create(&self, error: AppError) {
        *self.create_error.lock().unwrap() = Some(error);
    }

    /// Queue one status answer for `link_id`. An empty queue answers Pending.
    pub(crate) fn push_status(&self, link_id: &str, status: AppResult<PaymentStatus>) {
        self.statuses
            .lock()
            .unwrap()
            .entry(link_id.to_string())
            .or_default()
            .push_back(status);
    }

    pub(crate) fn status_calls_for(&self, link_id: &str) -> usize {
        self.status_calls
            .lock()
            .unwrap()
            .get(link_id)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn set_status_delay(&self, delay: Duration) {
        *self.status_delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn set_capabilities(&self, capabilities: AccountCapabilities) {
        *self.capabilities.lock().unwrap() = capabilities;
    }

    pub(crate) fn set_account_delay(&self, delay: Duration) {
        *self.account_delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn set_ban(&self, ban: BanStatusResponse) {
        *self.ban.lock().unwrap() = ban;
    }
}

#[async_trait]
impl PaymentBackend for FakeBackend {
    async fn create_payment_link(&self, request: CreateLinkRequest) -> AppResult<PaymentLink> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.created.lock().unwrap().push(request);

        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.create_error.lock().unwrap().take() {
            return Err(error);
        }

        Ok(CreateLinkResponse {
            id: format!("plink_{}", n),
            payment_link_url: format!("https://pay.example.com/plink_{}", n),
            status: Some("active".to_string()),
        }
        .into_link())
    }

    async fn payment_link_status(&self, link_id: &str) -> AppResult<PaymentStatus> {
        *self
            .status_calls
            .lock()
            .unwrap()
            .entry(link_id.to_string())
            .or_default() += 1;

        let delay = *self.status_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.statuses
            .lock()
            .unwrap()
            .get_mut(link_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(PaymentStatus::Pending))
    }
}

#[async_trait]
impl AccountBackend for FakeBackend {
    async fn account_capabilities(&self, _user_id: &str) -> AppResult<AccountCapabilities> {
        self.account_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.account_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_account_lookup.load(Ordering::SeqCst) {
            return Err(AppError::transient("payment backend", None, "connection refused"));
        }
        Ok(self.capabilities.lock().unwrap().clone())
    }

    async fn ban_status(&self, _user_id: &str) -> AppResult<BanStatusResponse> {
        self.ban_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.ban.lock().unwrap().clone())
    }
}

/// What the next `open` call does
pub(crate) enum OpenScript {
    /// Connect, deliver these events, then hold the connection open
    Accept(Vec<StreamEvent>),
    /// Connect and deliver whatever the test sends
    Live(mpsc::UnboundedReceiver<StreamEvent>),
    Fail,
}

/// Push transport driven by a queue of scripts. Once the queue is empty
/// every open fails.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    scripts: Mutex<VecDeque<OpenScript>>,
    opened_for: Mutex<Vec<String>>,
    close_codes: Arc<Mutex<Vec<u16>>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, script: OpenScript) {
        self.scripts.lock().unwrap().push_back(script);
    }

    /// Queue a live connection and return the sender feeding it
    pub(crate) fn push_live(&self) -> mpsc::UnboundedSender<StreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(OpenScript::Live(rx));
        tx
    }

    pub(crate) fn opens(&self) -> usize {
        self.opened_for.lock().unwrap().len()
    }

    pub(crate) fn opened_for(&self) -> Vec<String> {
        self.opened_for.lock().unwrap().clone()
    }

    /// Close codes sent by the client, in order
    pub(crate) fn close_codes(&self) -> Vec<u16> {
        self.close_codes.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushTransport for ScriptedTransport {
    async fn open(&self, user_id: &str) -> AppResult<Box<dyn PushStream>> {
        self.opened_for.lock().unwrap().push(user_id.to_string());
        let script = self.scripts.lock().unwrap().pop_front();

        let events = match script {
            Some(OpenScript::Accept(events)) => {
                let (tx, rx) = mpsc::unbounded_channel();
                for event in events {
                    let _ = tx.send(event);
                }
                rx
            }
            Some(OpenScript::Live(rx)) => rx,
            Some(OpenScript::Fail) | None => {
                return Err(AppError::transport("connection refused"));
            }
        };

        Ok(Box::new(FakeStream {
            events,
            close_codes: self.close_codes.clone(),
        }))
    }
}

struct FakeStream {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    close_codes: Arc<Mutex<Vec<u16>>>,
}

#[async_trait]
impl PushStream for FakeStream {
    async fn next_event(&mut self) -> StreamEvent {
        match self.events.recv().await {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self, code: u16) {
        self.close_codes.lock().unwrap().push(code);
    }
}
