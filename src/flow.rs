//! Payment flow orchestration
//!
//! `PaymentFlow` drives one user's payment links end to end:
//!
//! 1. the account gate must pass (fails closed)
//! 2. a fresh session is started and the link issued under it
//! 3. the status poller and the push channel race to observe the terminal
//!    status; the session's compare-and-set lets exactly one of them win
//! 4. the winner stops the other and `FlowEvent::Settled` is emitted once
//!
//! A ban observed at any point (ban poller or push) ends the active session,
//! so nothing from it can settle afterwards, and emits `FlowEvent::Restricted`.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::account::gate::restriction_message;
use crate::account::{AccountGate, AccountRestriction, AccountState};
use crate::error::{AppError, AppResult, ValidationError};
use crate::fx::{ExchangeRateCache, MinimumCharge};
use crate::issuer::{LinkIssuer, LinkRequest};
use crate::notify::{Notice, Notifier};
use crate::payments::traits::{AccountBackend, PaymentBackend};
use crate::payments::types::{PaymentLink, PaymentRequestSpec, PaymentStatus};
use crate::poller::StatusPoller;
use crate::push::{ChannelSnapshot, PushChannel, PushKind, PushMessage, SubscriptionId};
use crate::session::{SessionCorrelator, SessionId};

/// Which channel observed the terminal status first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleSource {
    Poller,
    Push,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    LinkReady {
        session_id: SessionId,
        link: PaymentLink,
    },
    /// Emitted exactly once per session
    Settled {
        session_id: SessionId,
        link_id: String,
        status: PaymentStatus,
        source: SettleSource,
    },
    Restricted {
        reason: Option<String>,
    },
    /// The push channel gave up; status now comes from polling alone
    ChannelUnavailable,
}

#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub poll_interval: Duration,
    pub link_deadline: Duration,
    pub minimum: MinimumCharge,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            poll_interval: StatusPoller::DEFAULT_INTERVAL,
            link_deadline: LinkIssuer::DEFAULT_DEADLINE,
            minimum: MinimumCharge::default(),
        }
    }
}

/// Collaborators shared with the rest of the process
pub struct FlowDeps {
    pub payments: Arc<dyn PaymentBackend>,
    pub accounts: Arc<dyn AccountBackend>,
    pub rates: Arc<ExchangeRateCache>,
    pub push: Arc<PushChannel>,
    pub account_state: Arc<AccountState>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Default)]
struct FlowSlots {
    last_spec: Option<PaymentRequestSpec>,
    session_handlers: Vec<SubscriptionId>,
    account_handlers: Vec<SubscriptionId>,
    watchers: Vec<JoinHandle<()>>,
}

pub struct PaymentFlow {
    user_id: String,
    gate: AccountGate,
    issuer: LinkIssuer,
    poller: Arc<StatusPoller>,
    correlator: Arc<SessionCorrelator>,
    push: Arc<PushChannel>,
    account_state: Arc<AccountState>,
    events: mpsc::UnboundedSender<FlowEvent>,
    slots: Mutex<FlowSlots>,
}

impl PaymentFlow {
    /// Build the flow for `user_id` and start its background watchers.
    /// Must be called inside a tokio runtime.
    pub fn new(
        user_id: impl Into<String>,
        deps: FlowDeps,
        config: FlowConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<FlowEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let correlator = Arc::new(SessionCorrelator::new());

        let flow = Arc::new(Self {
            user_id: user_id.into(),
            gate: AccountGate::new(deps.accounts, deps.account_state.clone()),
            issuer: LinkIssuer::new(
                deps.payments.clone(),
                correlator.clone(),
                deps.rates,
                config.minimum,
                config.link_deadline,
            )
            .with_account_state(deps.account_state.clone()),
            poller: Arc::new(StatusPoller::new(
                deps.payments,
                correlator.clone(),
                config.poll_interval,
            )),
            correlator,
            push: deps.push,
            account_state: deps.account_state,
            events,
            slots: Mutex::new(FlowSlots::default()),
        });

        let account_handlers = install_account_handlers(&flow.push, &flow.account_state, deps.notifier);
        let watchers = vec![
            tokio::spawn(watch_restriction(
                Arc::downgrade(&flow),
                flow.account_state.subscribe(),
            )),
            tokio::spawn(watch_channel(
                Arc::downgrade(&flow),
                flow.push.subscribe_state(),
            )),
        ];
        {
            let mut slots = flow.lock();
            slots.account_handlers = account_handlers;
            slots.watchers = watchers;
        }

        info!(user_id = %flow.user_id, "payment flow ready");
        (flow, events_rx)
    }

    fn lock(&self) -> MutexGuard<'_, FlowSlots> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: FlowEvent) {
        if self.events.send(event).is_err() {
            debug!(user_id = %self.user_id, "flow event dropped, no receiver");
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn current_session(&self) -> Option<SessionId> {
        self.correlator.current()
    }

    pub fn restriction(&self) -> AccountRestriction {
        self.account_state.restriction()
    }

    pub fn poller(&self) -> &StatusPoller {
        &self.poller
    }

    /// Gate, start a new session, issue its link and start watching it.
    ///
    /// # Errors
    /// `Authorization` when the account gate denies; anything the link
    /// issuer reports otherwise.
    pub async fn request_link(&self, spec: PaymentRequestSpec) -> AppResult<PaymentLink> {
        self.issue(spec, None).await
    }

    /// Replace the current link with a new one for the last requested spec.
    /// The previous session is invalidated before the new link is created.
    pub async fn refresh(&self) -> AppResult<PaymentLink> {
        let spec = self.lock().last_spec.clone().ok_or(ValidationError::EmptyField {
            field: "payment request".to_string(),
        })?;
        info!(user_id = %self.user_id, "refreshing payment link");
        self.issue(spec, None).await
    }

    /// Watch an already issued link under a new session without creating
    /// another one
    pub async fn resume(&self, spec: PaymentRequestSpec, link: PaymentLink) -> AppResult<PaymentLink> {
        self.issue(spec, Some(link)).await
    }

    async fn issue(
        &self,
        spec: PaymentRequestSpec,
        reuse: Option<PaymentLink>,
    ) -> AppResult<PaymentLink> {
        self.gate.check_eligibility(&self.user_id).await.into_result()?;

        let session_id = self.correlator.new_session();
        self.poller.stop();
        self.drop_session_handlers();
        // The gate's answer is stale if a ban arrived while it was waiting
        self.ensure_unrestricted()?;
        self.lock().last_spec = Some(spec.clone());

        self.push.connect(&self.user_id).await;

        let created = self
            .issuer
            .create_link(LinkRequest {
                user_id: self.user_id.clone(),
                spec,
                session_id: session_id.clone(),
                reuse,
            })
            .await;
        // A ban during the create call wins over whatever it returned
        self.ensure_unrestricted()?;
        let link = created?;

        self.watch(&session_id, &link);
        self.emit(FlowEvent::LinkReady {
            session_id,
            link: link.clone(),
        });
        Ok(link)
    }

    /// Race the poller and the push channel for `link` under `session_id`
    fn watch(&self, session_id: &SessionId, link: &PaymentLink) {
        let events = self.events.clone();
        let poller_session = session_id.clone();
        let poller_link = link.link_id.clone();
        self.poller.start(&link.link_id, session_id, move |status| {
            let _ = events.send(FlowEvent::Settled {
                session_id: poller_session,
                link_id: poller_link,
                status,
                source: SettleSource::Poller,
            });
        });

        let handlers = self.push.handlers();
        let ids: Vec<SubscriptionId> = [PushKind::PaymentCompleted, PushKind::PaymentFailed]
            .into_iter()
            .map(|kind| {
                let session_id = session_id.clone();
                let link_id = link.link_id.clone();
                let correlator = self.correlator.clone();
                let poller = Arc::downgrade(&self.poller);
                let events = self.events.clone();

                handlers.subscribe(kind, move |message| {
                    let (reported, status) = match message {
                        PushMessage::PaymentCompleted { payment_link_id, .. } => {
                            (payment_link_id, PaymentStatus::Completed)
                        }
                        PushMessage::PaymentFailed { payment_link_id, .. } => {
                            (payment_link_id, PaymentStatus::Failed)
                        }
                        _ => return,
                    };
                    if *reported != link_id {
                        debug!(session_id = %session_id, link_id = %reported, "push for another link ignored");
                        return;
                    }
                    if !correlator.try_settle(&session_id, status) {
                        debug!(session_id = %session_id, %link_id, %status, "push report dropped");
                        return;
                    }

                    info!(session_id = %session_id, %link_id, %status, "push observed terminal status");
                    if let Some(poller) = poller.upgrade() {
                        poller.stop();
                    }
                    let _ = events.send(FlowEvent::Settled {
                        session_id: session_id.clone(),
                        link_id: link_id.clone(),
                        status,
                        source: SettleSource::Push,
                    });
                })
            })
            .collect();

        self.lock().session_handlers = ids;
    }

    fn drop_session_handlers(&self) {
        let ids = std::mem::take(&mut self.lock().session_handlers);
        let handlers = self.push.handlers();
        for id in ids {
            handlers.unsubscribe(id);
        }
    }

    /// Stop watching the current link and end its session
    pub fn cancel(&self) -> Option<SessionId> {
        self.poller.stop();
        self.drop_session_handlers();
        let ended = self.correlator.end_session();
        if let Some(session_id) = &ended {
            info!(user_id = %self.user_id, session_id = %session_id, "payment flow cancelled");
        }
        ended
    }

    /// End the active session and refuse to continue while restricted
    fn ensure_unrestricted(&self) -> AppResult<()> {
        let restriction = self.account_state.restriction();
        if !restriction.is_banned {
            return Ok(());
        }
        self.cancel();
        Err(AppError::authorization(restriction_message(restriction.reason)))
    }

    fn lockdown(&self, reason: Option<String>) {
        warn!(user_id = %self.user_id, "account restricted, locking payment flow");
        self.cancel();
        self.emit(FlowEvent::Restricted { reason });
    }

    /// Stop everything this flow started and release the push connection
    pub async fn shutdown(&self) {
        self.cancel();

        let (account_handlers, watchers) = {
            let mut slots = self.lock();
            (
                std::mem::take(&mut slots.account_handlers),
                std::mem::take(&mut slots.watchers),
            )
        };
        let handlers = self.push.handlers();
        for id in account_handlers {
            handlers.unsubscribe(id);
        }
        for watcher in watchers {
            watcher.abort();
        }

        self.push.disconnect(&self.user_id).await;
        info!(user_id = %self.user_id, "payment flow shut down");
    }
}

impl Drop for PaymentFlow {
    fn drop(&mut self) {
        for watcher in &self.lock().watchers {
            watcher.abort();
        }
    }
}

/// Route the account-level push messages into account state and notices
fn install_account_handlers(
    push: &PushChannel,
    account_state: &Arc<AccountState>,
    notifier: Arc<dyn Notifier>,
) -> Vec<SubscriptionId> {
    let handlers = push.handlers();
    let mut ids = Vec::new();

    let state = account_state.clone();
    let notify = notifier.clone();
    ids.push(handlers.subscribe(PushKind::AccountBanned, move |message| {
        if let PushMessage::AccountBanned { ban_reason, ban_type } = message {
            if state.apply_ban(AccountRestriction::banned(ban_reason.clone(), ban_type.clone())) {
                notify.notify(Notice::AccountRestricted {
                    reason: ban_reason.clone(),
                });
            }
        }
    }));

    let state = account_state.clone();
    let notify = notifier.clone();
    ids.push(handlers.subscribe(PushKind::AccountUnbanned, move |_| {
        if state.apply_unban() {
            notify.notify(Notice::AccountRestored);
        }
    }));

    let notify = notifier.clone();
    ids.push(handlers.subscribe(PushKind::OnboardingComplete, move |_| {
        notify.notify(Notice::OnboardingComplete);
    }));

    let notify = notifier;
    ids.push(handlers.subscribe(PushKind::OnboardingFailed, move |message| {
        if let PushMessage::OnboardingFailed { reason } = message {
            notify.notify(Notice::OnboardingFailed {
                reason: reason.clone(),
            });
        }
    }));

    ids
}

async fn watch_restriction(flow: Weak<PaymentFlow>, mut rx: watch::Receiver<AccountRestriction>) {
    while rx.changed().await.is_ok() {
        let restriction = rx.borrow_and_update().clone();
        let Some(flow) = flow.upgrade() else {
            break;
        };
        if restriction.is_banned {
            flow.lockdown(restriction.reason);
        }
    }
}

async fn watch_channel(flow: Weak<PaymentFlow>, mut rx: watch::Receiver<ChannelSnapshot>) {
    let mut was_unavailable = rx.borrow().unavailable;
    while rx.changed().await.is_ok() {
        let unavailable = rx.borrow_and_update().unavailable;
        if unavailable && !was_unavailable {
            let Some(flow) = flow.upgrade() else {
                break;
            };
            flow.emit(FlowEvent::ChannelUnavailable);
        }
        was_unavailable = unavailable;
    }
}
