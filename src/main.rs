use anyhow::Result;
use chrono::Utc;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

use arb_agent::alerts::AlertClient;
use arb_agent::auth::{sign_request, SignedRequest};
use arb_agent::config::Config;
use arb_agent::connector::{BookTop, Market, MarketConnector, MarketPrice};
use arb_agent::gateway::TradeGateway;
use arb_agent::ledger::PositionLedger;
use arb_agent::paper::PaperConnector;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(match config.log_level.as_str() {
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("╔═══════════════════════════════════════╗");
    info!("║   Prediction-Market Arbitrage Agent   ║");
    info!("╠═══════════════════════════════════════╣");
    info!("║ Mode: {:30}  ║", if config.dry_run { "DRY RUN (paper venues)" } else { "LIVE TRADING" });
    info!("║ Capital/bundle: ${:20} ║", config.capital_per_bundle);
    info!("║ Min net edge: {:19} bps ║", config.min_net_edge_bps);
    info!("║ Platforms: {:26} ║", config.allowed_platforms.join(","));
    info!("╚═══════════════════════════════════════╝");

    if !config.dry_run {
        anyhow::bail!(
            "live venue connectors are deployed separately; run with DRY_RUN=true"
        );
    }

    let alerts = AlertClient::new(config.discord_webhook.clone());
    alerts.agent_started(config.dry_run).await;

    let connectors = paper_venues(&config);
    let ledger = Arc::new(PositionLedger::open(&config.data_dir)?);
    let gateway = TradeGateway::new(config.clone(), connectors, ledger);

    run_scan_loop(config, gateway).await
}

/// Paper venues for dry-run mode, seeded with a cross-venue divergence
/// and one intra-venue mispricing so the full pipeline has work to do.
fn paper_venues(config: &Config) -> Vec<Arc<dyn MarketConnector>> {
    let mut venues: Vec<Arc<dyn MarketConnector>> = Vec::new();
    for (index, platform) in config.allowed_platforms.iter().take(2).enumerate() {
        let venue = Arc::new(PaperConnector::new(platform));
        venue.add_market(Market {
            market_id: format!("{}-btc-100k", platform),
            title: "Will BTC close above $100k on Dec 31?".to_string(),
            resolution_date: None,
            active: true,
        });
        if index == 0 {
            venue.set_book(
                &format!("{}-btc-100k", platform),
                BookTop {
                    yes_bid: Some(dec!(0.55)),
                    yes_ask: Some(dec!(0.43)),
                    liquidity: Some(dec!(5000)),
                },
            );
            venue.set_price(
                &format!("{}-btc-100k", platform),
                MarketPrice {
                    yes: Some(dec!(0.44)),
                    no: Some(dec!(0.56)),
                },
            );
        } else {
            venue.set_book(
                &format!("{}-btc-100k", platform),
                BookTop {
                    yes_bid: Some(dec!(0.49)),
                    yes_ask: Some(dec!(0.51)),
                    liquidity: Some(dec!(5000)),
                },
            );
            venue.set_price(
                &format!("{}-btc-100k", platform),
                MarketPrice {
                    yes: Some(dec!(0.50)),
                    no: Some(dec!(0.50)),
                },
            );
        }
        venues.push(venue);
    }
    venues
}

/// Sign a gateway request with the agent's own key, or leave it
/// unsigned when the key set is empty (bootstrap mode).
fn self_signed(config: &Config, path: &str, body: String) -> SignedRequest {
    let timestamp = Utc::now().timestamp();
    let nonce = Uuid::new_v4().to_string();
    let (key_id, signature) = match config.api_keys.first() {
        Some(key) => (
            key.key_id.clone(),
            sign_request(
                &key.secret,
                "POST",
                path,
                &body,
                &config.agent_id,
                timestamp,
                &nonce,
            ),
        ),
        None => (String::new(), String::new()),
    };
    SignedRequest {
        method: "POST".to_string(),
        path: path.to_string(),
        body,
        agent_id: config.agent_id.clone(),
        key_id,
        timestamp,
        nonce,
        signature,
    }
}

async fn run_scan_loop(config: Config, gateway: TradeGateway) -> Result<()> {
    loop {
        let report = match gateway.scan().await {
            Ok(report) => report,
            Err(e) => {
                error!("Scan failed: {}", e);
                tokio::time::sleep(tokio::time::Duration::from_secs(config.scan_interval_secs))
                    .await;
                continue;
            }
        };

        info!(
            "Scan: {} opportunities over {} markets ({} gaps)",
            report.opportunities.len(),
            report.coverage.markets_scanned,
            report.coverage.skipped.len()
        );
        for skipped in &report.coverage.skipped {
            warn!(
                "  gap: {} {} - {}",
                skipped.platform,
                skipped.market_id.as_deref().unwrap_or("*"),
                skipped.reason
            );
        }
        for opportunity in report.opportunities.iter().take(3) {
            info!(
                "  {:?} profit {} ({}%) confidence {:?}",
                opportunity.kind,
                opportunity.profit,
                opportunity.profit_percent.round_dp(2),
                opportunity.confidence
            );
        }

        if !report.opportunities.is_empty() {
            quote_and_execute(&config, &gateway).await;
        }

        tokio::time::sleep(tokio::time::Duration::from_secs(config.scan_interval_secs)).await;
    }
}

/// Push the best opportunity through the full signed quote -> execute
/// path, exactly as an external caller would.
async fn quote_and_execute(config: &Config, gateway: &TradeGateway) {
    let quote_body = serde_json::json!({}).to_string();
    let quote = gateway
        .handle_quote(&self_signed(config, "/quote", quote_body))
        .await;
    let grant = match quote.data {
        Some(grant) => grant,
        None => {
            let reason = quote
                .error
                .map(|e| format!("{}: {}", e.code, e.message))
                .unwrap_or_else(|| "empty response".to_string());
            info!("No quote this round ({})", reason);
            return;
        }
    };
    info!(
        "Quoted bundle {}: {} shares, expected profit ${}",
        grant.bundle_id, grant.share_count, grant.expected_profit
    );

    let execute_body = serde_json::json!({
        "token": grant.token,
        "idempotency_key": Uuid::new_v4().to_string(),
    })
    .to_string();
    let executed = gateway
        .handle_execute(&self_signed(config, "/execute", execute_body))
        .await;
    match executed.data {
        Some(outcome) => info!(
            "Bundle {} finished {:?} (reported profit {:?})",
            outcome.bundle_id, outcome.status, outcome.reported_profit
        ),
        None => {
            let reason = executed
                .error
                .map(|e| format!("{}: {}", e.code, e.message))
                .unwrap_or_else(|| "empty response".to_string());
            warn!("Execution did not complete ({})", reason);
        }
    }
}
