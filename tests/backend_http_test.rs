//! End-to-end tests against an in-process fake of the payment backend.
//!
//! The fake is an axum router bound to an ephemeral loopback port; the real
//! reqwest client, exchange-rate source and payment flow talk to it over HTTP.

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use paylink_engine::account::{AccountGate, AccountState, BanPoller, BanPollerConfig};
use paylink_engine::error::{AppError, AppErrorKind, AppResult, ExternalError};
use paylink_engine::flow::{FlowConfig, FlowDeps, FlowEvent, PaymentFlow, SettleSource};
use paylink_engine::fx::{ExchangeRateCache, HttpRateSource, MinimumCharge, RateSource};
use paylink_engine::notify::LogNotifier;
use paylink_engine::payments::providers::{StripeBackend, StripeBackendConfig};
use paylink_engine::payments::traits::{AccountBackend, PaymentBackend};
use paylink_engine::payments::types::{
    CreateLinkRequest, Currency, PaymentRequestSpec, PaymentStatus,
};
use paylink_engine::push::{PushChannel, PushStream, PushTransport, ReconnectPolicy};

#[derive(Default)]
struct FakeServer {
    creates: AtomicUsize,
    last_create: Mutex<Option<Value>>,
    last_auth: Mutex<Option<String>>,
}

async fn create_link(
    State(server): State<Arc<FakeServer>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let n = server.creates.fetch_add(1, Ordering::SeqCst) + 1;
    *server.last_auth.lock().unwrap() = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    *server.last_create.lock().unwrap() = Some(body.clone());

    if body["amount"].as_i64().unwrap_or(0) < 50 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Amount must be at least 50 cents"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "id": "plink_paid",
            "paymentLinkUrl": format!("https://pay.example.com/{}", n),
            "status": "active"
        })),
    )
}

async fn link_status(Path(link_id): Path<String>) -> (StatusCode, Json<Value>) {
    match link_id.as_str() {
        "plink_paid" => (StatusCode::OK, Json(json!({"status": "paid"}))),
        "plink_expired" => (StatusCode::OK, Json(json!({"status": "expired"}))),
        "plink_open" => (StatusCode::OK, Json(json!({"status": "open"}))),
        "plink_down" => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"message": "maintenance"})),
        ),
        "plink_garbled" => (StatusCode::OK, Json(json!({"state": "??"}))),
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "No such payment link"})),
        ),
    }
}

async fn user_account(Path(user_id): Path<String>) -> Json<Value> {
    match user_id.as_str() {
        "onboarded" => Json(json!({
            "accountId": "acct_1",
            "chargesEnabled": true,
            "detailsSubmitted": true,
            "onboardingComplete": true
        })),
        "pending" => Json(json!({
            "accountId": "acct_2",
            "chargesEnabled": false,
            "detailsSubmitted": false
        })),
        _ => Json(json!({})),
    }
}

async fn ban_status(Path(user_id): Path<String>) -> Json<Value> {
    if user_id == "banned" {
        Json(json!({"isBanned": true, "banReason": "chargebacks", "banType": "permanent"}))
    } else {
        Json(json!({"isBanned": false}))
    }
}

async fn fx_rates() -> Json<Value> {
    Json(json!({"result": "success", "rates": {"USD": 1, "JMD": 155.5}}))
}

async fn spawn_server() -> (String, Arc<FakeServer>) {
    let server = Arc::new(FakeServer::default());
    let app = Router::new()
        .route("/stripe/create-payment-link", post(create_link))
        .route("/stripe/payment-link-status/:id", get(link_status))
        .route("/stripe/user-account/:id", get(user_account))
        .route("/users/ban-status/:id", get(ban_status))
        .route("/fx", get(fx_rates))
        .with_state(server.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), server)
}

fn backend(base_url: &str) -> StripeBackend {
    StripeBackend::new(StripeBackendConfig {
        base_url: format!("{}/", base_url),
        api_token: Some("test-token".to_string()),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn create_request(amount: i64) -> CreateLinkRequest {
    CreateLinkRequest {
        user_id: "onboarded".to_string(),
        amount,
        currency: "usd".to_string(),
        description: "Haircut".to_string(),
        customer_name: "Jane Brown".to_string(),
        customer_email: None,
    }
}

/// Push transport for a backend without a push endpoint
struct Offline;

#[async_trait]
impl PushTransport for Offline {
    async fn open(&self, _user_id: &str) -> AppResult<Box<dyn PushStream>> {
        Err(AppError::transport("push endpoint not available"))
    }
}

#[tokio::test]
async fn test_create_link_round_trip() {
    let (base_url, server) = spawn_server().await;
    let backend = backend(&base_url);

    let link = backend.create_payment_link(create_request(2500)).await.unwrap();

    assert_eq!(link.link_id, "plink_paid");
    assert_eq!(link.url, "https://pay.example.com/1");
    assert_eq!(link.status, PaymentStatus::Pending);

    let body = server.last_create.lock().unwrap().clone().unwrap();
    assert_eq!(body["userId"], "onboarded");
    assert_eq!(body["amount"], 2500);
    assert_eq!(body["customerName"], "Jane Brown");
    assert!(body.get("customerEmail").is_none());
    assert_eq!(
        server.last_auth.lock().unwrap().as_deref(),
        Some("Bearer test-token")
    );
}

#[tokio::test]
async fn test_client_fault_is_not_retried() {
    let (base_url, server) = spawn_server().await;
    let backend = backend(&base_url);

    let err = backend
        .create_payment_link(create_request(10))
        .await
        .unwrap_err();

    match err.kind {
        AppErrorKind::External(ExternalError::ClientFault { status, ref message, .. }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "Amount must be at least 50 cents");
        }
        ref other => panic!("unexpected error {:?}", other),
    }
    assert!(!err.is_retryable());
    assert_eq!(server.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_status_mapping() {
    let (base_url, _server) = spawn_server().await;
    let backend = backend(&base_url);

    assert_eq!(
        backend.payment_link_status("plink_paid").await.unwrap(),
        PaymentStatus::Completed
    );
    assert_eq!(
        backend.payment_link_status("plink_expired").await.unwrap(),
        PaymentStatus::Failed
    );
    assert_eq!(
        backend.payment_link_status("plink_open").await.unwrap(),
        PaymentStatus::Pending
    );

    let down = backend.payment_link_status("plink_down").await.unwrap_err();
    assert!(down.is_retryable());
    assert!(matches!(
        down.kind,
        AppErrorKind::External(ExternalError::TransientServer { status: Some(503), .. })
    ));

    let missing = backend.payment_link_status("plink_missing").await.unwrap_err();
    assert!(matches!(
        missing.kind,
        AppErrorKind::External(ExternalError::ClientFault { status: 404, .. })
    ));

    let garbled = backend.payment_link_status("plink_garbled").await.unwrap_err();
    assert!(matches!(garbled.kind, AppErrorKind::Protocol { .. }));
}

#[tokio::test]
async fn test_network_failure_is_transient() {
    // Nothing listens on the discard port
    let backend = backend("http://127.0.0.1:9");
    let err = backend.payment_link_status("plink_paid").await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_account_gate_over_http() {
    let (base_url, _server) = spawn_server().await;
    let gate = AccountGate::new(Arc::new(backend(&base_url)), Arc::new(AccountState::new()));

    assert!(gate.check_eligibility("onboarded").await.eligible);

    let pending = gate.check_eligibility("pending").await;
    assert!(!pending.eligible);

    // No connected account at all
    let unknown = gate.check_eligibility("stranger").await;
    assert_eq!(unknown.reason.as_deref(), Some("no connected payment account"));
}

#[tokio::test]
async fn test_ban_status_over_http() {
    let (base_url, _server) = spawn_server().await;
    let backend = Arc::new(backend(&base_url));
    let status = backend.ban_status("banned").await.unwrap();
    assert!(status.is_banned);
    assert_eq!(status.ban_type.as_deref(), Some("permanent"));

    let state = Arc::new(AccountState::new());
    let poller = BanPoller::new(
        backend,
        state.clone(),
        Arc::new(LogNotifier),
        BanPollerConfig::default(),
    );
    let restriction = poller.check_now("banned").await.unwrap();
    assert!(restriction.is_banned);
    assert_eq!(restriction.reason.as_deref(), Some("chargebacks"));
    assert!(state.is_banned());
}

#[tokio::test]
async fn test_fx_source_over_http() {
    let (base_url, _server) = spawn_server().await;
    let source = HttpRateSource::new(format!("{}/fx", base_url), Duration::from_secs(5)).unwrap();

    assert_eq!(
        source.fetch_rate(Currency::Jmd).await.unwrap(),
        Decimal::from_str("155.5").unwrap()
    );
    assert!(source.fetch_rate(Currency::Gbp).await.is_err());
}

fn flow_for(
    base_url: &str,
    user_id: &str,
) -> (Arc<PaymentFlow>, tokio::sync::mpsc::UnboundedReceiver<FlowEvent>) {
    let backend = Arc::new(backend(base_url));
    let rates = Arc::new(ExchangeRateCache::new(
        Arc::new(
            HttpRateSource::new(format!("{}/fx", base_url), Duration::from_secs(5)).unwrap(),
        ),
        ExchangeRateCache::DEFAULT_TTL,
    ));

    PaymentFlow::new(
        user_id,
        FlowDeps {
            payments: backend.clone(),
            accounts: backend,
            rates,
            push: Arc::new(PushChannel::new(
                Arc::new(Offline),
                ReconnectPolicy {
                    delay: Duration::from_millis(50),
                    max_attempts: 0,
                },
                None,
            )),
            account_state: Arc::new(AccountState::new()),
            notifier: Arc::new(LogNotifier),
        },
        FlowConfig {
            poll_interval: Duration::from_millis(200),
            link_deadline: Duration::from_secs(5),
            minimum: MinimumCharge::default(),
        },
    )
}

#[tokio::test]
async fn test_flow_settles_through_polling() {
    let (base_url, server) = spawn_server().await;
    let (flow, mut events) = flow_for(&base_url, "onboarded");

    let spec = PaymentRequestSpec::new(Decimal::new(2500, 2), Currency::Usd, "Haircut")
        .with_payer("Jane Brown", None);
    let link = flow.request_link(spec).await.unwrap();
    assert!(!link.url.is_empty());

    let settled = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(FlowEvent::Settled { status, source, .. }) => break (status, source),
                Some(_) => continue,
                None => panic!("event stream closed"),
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(settled, (PaymentStatus::Completed, SettleSource::Poller));
    assert_eq!(server.creates.load(Ordering::SeqCst), 1);
    flow.shutdown().await;
}

#[tokio::test]
async fn test_flow_rejects_below_minimum_in_local_currency() {
    let (base_url, server) = spawn_server().await;
    let (flow, _events) = flow_for(&base_url, "onboarded");

    // 100 JMD is below $1.00 at 155.5 JMD per USD
    let spec = PaymentRequestSpec::new(Decimal::new(100, 0), Currency::Jmd, "Patty")
        .with_payer("Jane Brown", None);
    let err = flow.request_link(spec).await.unwrap_err();

    assert!(err.is_validation());
    assert!(err.to_string().contains("J$155.50"));
    assert_eq!(server.creates.load(Ordering::SeqCst), 0);
    flow.shutdown().await;
}

#[tokio::test]
async fn test_flow_blocks_incomplete_onboarding() {
    let (base_url, server) = spawn_server().await;
    let (flow, _events) = flow_for(&base_url, "pending");

    let spec = PaymentRequestSpec::new(Decimal::new(25, 0), Currency::Usd, "Haircut")
        .with_payer("Jane Brown", None);
    let err = flow.request_link(spec).await.unwrap_err();

    assert!(err.is_authorization());
    assert_eq!(server.creates.load(Ordering::SeqCst), 0);
    flow.shutdown().await;
}
