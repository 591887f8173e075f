use anyhow::{anyhow, Context, Result};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

use paylink_engine::account::{AccountState, BanPoller, BanPollerConfig};
use paylink_engine::config::Config;
use paylink_engine::flow::{FlowConfig, FlowDeps, FlowEvent, PaymentFlow};
use paylink_engine::fx::{ExchangeRateCache, HttpRateSource, MinimumCharge};
use paylink_engine::logging;
use paylink_engine::notify::{LogNotifier, Notifier};
use paylink_engine::payments::providers::{StripeBackend, StripeBackendConfig};
use paylink_engine::payments::types::{Currency, PaymentRequestSpec};
use paylink_engine::push::{PushChannel, ReconnectPolicy, WsTransport};

const USAGE: &str = "usage: paylink-engine <user_id> <amount> <currency> [description]";

struct Args {
    user_id: String,
    amount: Decimal,
    currency: Currency,
    description: String,
}

fn parse_args() -> Result<Args> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        return Err(anyhow!(USAGE));
    }

    Ok(Args {
        user_id: args[0].clone(),
        amount: Decimal::from_str(&args[1])
            .with_context(|| format!("Invalid amount '{}'", args[1]))?,
        currency: Currency::from_str(&args[2])?,
        description: args
            .get(3)
            .cloned()
            .unwrap_or_else(|| "Payment request".to_string()),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::from_env()?;
    logging::init_tracing(&config.logging)?;
    let args = parse_args()?;

    tracing::info!("Starting paylink-engine");
    tracing::info!("Environment: {}", config.environment);
    tracing::info!("Backend: {}", config.backend.base_url);

    let backend = Arc::new(StripeBackend::new(StripeBackendConfig {
        base_url: config.backend.base_url.clone(),
        api_token: config.backend.api_token.clone(),
        timeout: config.backend.request_timeout,
    })?);
    let rates = Arc::new(ExchangeRateCache::new(
        Arc::new(HttpRateSource::new(
            config.fx.url.clone(),
            config.backend.request_timeout,
        )?),
        config.fx.rate_ttl,
    ));
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let account_state = Arc::new(AccountState::new());
    let push = Arc::new(PushChannel::new(
        Arc::new(WsTransport::new(
            config.push.url.clone(),
            config.backend.request_timeout,
        )),
        ReconnectPolicy {
            delay: config.push.reconnect_delay,
            max_attempts: config.push.max_reconnect_attempts,
        },
        Some(notifier.clone()),
    ));

    push.connect(&args.user_id).await;

    let ban_poller = BanPoller::new(
        backend.clone(),
        account_state.clone(),
        notifier.clone(),
        BanPollerConfig {
            interval: config.timing.ban_poll_interval,
        },
    );
    if let Err(e) = ban_poller.check_now(&args.user_id).await {
        tracing::warn!(error = %e, "initial ban check failed");
    }
    let (ban_shutdown, ban_task) = ban_poller.spawn(args.user_id.clone());

    let (flow, mut events) = PaymentFlow::new(
        args.user_id.clone(),
        FlowDeps {
            payments: backend.clone(),
            accounts: backend,
            rates,
            push: push.clone(),
            account_state,
            notifier,
        },
        FlowConfig {
            poll_interval: config.timing.poll_interval,
            link_deadline: config.timing.link_deadline,
            minimum: MinimumCharge::new(config.fx.min_charge_usd),
        },
    );

    let spec = PaymentRequestSpec::new(args.amount, args.currency, args.description)
        .with_payer(args.user_id.clone(), None);

    let outcome = match flow.request_link(spec).await {
        Ok(link) => {
            println!("{}", link.url);
            wait_for_outcome(&mut events).await
        }
        Err(e) => {
            tracing::error!(error = %e, "could not create payment link");
            Err(anyhow!(e.user_message()))
        }
    };

    flow.shutdown().await;
    let _ = ban_shutdown.send(true);
    if let Err(e) = ban_task.await {
        tracing::warn!(error = %e, "ban poller task failed");
    }

    outcome
}

async fn wait_for_outcome(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<FlowEvent>,
) -> Result<()> {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(FlowEvent::Settled { link_id, status, source, .. }) => {
                    tracing::info!(%link_id, %status, ?source, "payment settled");
                    println!("{}", status);
                    return Ok(());
                }
                Some(FlowEvent::Restricted { reason }) => {
                    return Err(anyhow!(
                        "account restricted: {}",
                        reason.unwrap_or_else(|| "no reason given".to_string())
                    ));
                }
                Some(FlowEvent::ChannelUnavailable) => {
                    tracing::warn!("push channel unavailable, relying on polling");
                }
                Some(FlowEvent::LinkReady { .. }) => {}
                None => return Err(anyhow!("payment flow stopped unexpectedly")),
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
                return Ok(());
            }
        }
    }
}
