use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;

/// A registered gateway signing key. When `agent_id` is set the key is
/// bound to that agent and requests claiming any other agent are rejected.
#[derive(Debug, Clone)]
pub struct ApiKey {
    pub key_id: String,
    pub secret: String,
    pub agent_id: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    // Identity
    pub agent_id: String,

    // Gateway auth
    /// Registered signing keys. Empty set enables unsigned bootstrap mode.
    pub api_keys: Vec<ApiKey>,
    pub replay_window_secs: i64,
    pub nonce_ttl_secs: i64,

    // Confirmation tokens
    pub token_secret: String,
    pub token_ttl_secs: i64,

    // Trading parameters
    pub capital_per_bundle: Decimal,
    pub slippage_bps: u32,
    pub fee_bps: u32,
    pub min_net_edge_bps: u32,

    // Policy
    pub allowed_platforms: Vec<String>,
    pub max_slippage_bps: u32,
    pub max_order_notional: Decimal,
    pub kill_switch: bool,

    // Execution
    pub connector_timeout_secs: u64,
    pub bundle_retention: usize,
    pub scan_market_limit: usize,
    pub scan_interval_secs: u64,

    // Mode
    pub dry_run: bool,
    pub log_level: String,

    // Alerts
    pub discord_webhook: Option<String>,

    // Storage
    pub data_dir: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            agent_id: env::var("AGENT_ID").unwrap_or_else(|_| "arb-agent".to_string()),

            api_keys: parse_api_keys(&env::var("GATEWAY_API_KEYS").unwrap_or_default())?,
            replay_window_secs: env::var("REPLAY_WINDOW_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("Invalid REPLAY_WINDOW_SECS")?,
            nonce_ttl_secs: env::var("NONCE_TTL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .context("Invalid NONCE_TTL_SECS")?,

            token_secret: env::var("TOKEN_SECRET")
                .context("TOKEN_SECRET not set")?,
            token_ttl_secs: env::var("TOKEN_TTL_SECS")
                .unwrap_or_else(|_| "90".to_string())
                .parse()
                .context("Invalid TOKEN_TTL_SECS")?,

            capital_per_bundle: env::var("CAPITAL_PER_BUNDLE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .context("Invalid CAPITAL_PER_BUNDLE")?,
            slippage_bps: env::var("SLIPPAGE_BPS")
                .unwrap_or_else(|_| "40".to_string())
                .parse()
                .context("Invalid SLIPPAGE_BPS")?,
            fee_bps: env::var("FEE_BPS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("Invalid FEE_BPS")?,
            min_net_edge_bps: env::var("MIN_NET_EDGE_BPS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .context("Invalid MIN_NET_EDGE_BPS")?,

            allowed_platforms: env::var("ALLOWED_PLATFORMS")
                .unwrap_or_else(|_| "polymarket,kalshi".to_string())
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            max_slippage_bps: env::var("MAX_SLIPPAGE_BPS")
                .unwrap_or_else(|_| "200".to_string())
                .parse()
                .context("Invalid MAX_SLIPPAGE_BPS")?,
            max_order_notional: env::var("MAX_ORDER_NOTIONAL")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .context("Invalid MAX_ORDER_NOTIONAL")?,
            kill_switch: env::var("KILL_SWITCH")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),

            connector_timeout_secs: env::var("CONNECTOR_TIMEOUT_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("Invalid CONNECTOR_TIMEOUT_SECS")?,
            bundle_retention: env::var("BUNDLE_RETENTION")
                .unwrap_or_else(|_| "200".to_string())
                .parse()
                .context("Invalid BUNDLE_RETENTION")?,
            scan_market_limit: env::var("SCAN_MARKET_LIMIT")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("Invalid SCAN_MARKET_LIMIT")?,
            scan_interval_secs: env::var("SCAN_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid SCAN_INTERVAL_SECS")?,

            dry_run: env::var("DRY_RUN")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            discord_webhook: env::var("DISCORD_WEBHOOK").ok(),

            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
        })
    }
}

#[cfg(test)]
impl Config {
    /// Baseline config for unit tests. Individual tests override fields.
    pub fn for_tests() -> Self {
        Config {
            agent_id: "test-agent".to_string(),
            api_keys: Vec::new(),
            replay_window_secs: 60,
            nonce_ttl_secs: 300,
            token_secret: "test-token-secret".to_string(),
            token_ttl_secs: 90,
            capital_per_bundle: Decimal::from(100),
            slippage_bps: 40,
            fee_bps: 20,
            min_net_edge_bps: 15,
            allowed_platforms: vec!["alpha".to_string(), "beta".to_string()],
            max_slippage_bps: 200,
            max_order_notional: Decimal::from(500),
            kill_switch: false,
            connector_timeout_secs: 5,
            bundle_retention: 200,
            scan_market_limit: 20,
            scan_interval_secs: 30,
            dry_run: true,
            log_level: "info".to_string(),
            discord_webhook: None,
            data_dir: "./data".to_string(),
        }
    }
}

/// Parse `key_id:secret[:agent_id]` entries separated by commas.
fn parse_api_keys(raw: &str) -> Result<Vec<ApiKey>> {
    let mut keys = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let mut parts = entry.splitn(3, ':');
        let key_id = parts.next().unwrap_or_default();
        let secret = parts
            .next()
            .with_context(|| format!("API key entry '{}' missing secret", entry))?;
        if key_id.is_empty() || secret.is_empty() {
            anyhow::bail!("API key entry '{}' has an empty key id or secret", entry);
        }
        keys.push(ApiKey {
            key_id: key_id.to_string(),
            secret: secret.to_string(),
            agent_id: parts.next().map(str::to_string),
            enabled: true,
        });
    }
    Ok(keys)
}
