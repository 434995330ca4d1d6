use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::error;

use crate::types::BundleStatus;

/// Discord webhook client for trade telemetry. Every send is
/// best-effort: a delivery failure is logged and swallowed, never
/// surfaced into a trade's reported outcome.
pub struct AlertClient {
    client: Client,
    webhook_url: Option<String>,
    enabled: bool,
}

impl AlertClient {
    pub fn new(webhook_url: Option<String>) -> Self {
        let enabled = webhook_url.is_some();
        Self {
            client: Client::new(),
            webhook_url,
            enabled,
        }
    }

    async fn send(&self, content: &str, color: u32) {
        if !self.enabled {
            return;
        }
        let url = match &self.webhook_url {
            Some(u) => u,
            None => return,
        };

        let payload = json!({
            "embeds": [{
                "description": content,
                "color": color
            }]
        });

        if let Err(e) = self.client.post(url).json(&payload).send().await {
            error!("Failed to send alert: {}", e);
        }
    }

    /// Alert: agent started
    pub async fn agent_started(&self, dry_run: bool) {
        let mode = if dry_run { "DRY RUN" } else { "LIVE" };
        let msg = format!("🤖 **Arb Agent Started**\nMode: {}", mode);
        self.send(&msg, 0x00FF00).await;
    }

    /// Alert: opportunity quoted
    pub async fn quote_issued(&self, bundle_id: &str, expected_profit: Decimal) {
        let msg = format!(
            "📊 **Quote Issued**\nBundle: {}\nExpected profit: ${}",
            bundle_id, expected_profit
        );
        self.send(&msg, 0x0099FF).await;
    }

    /// Alert: bundle reached a terminal state
    pub async fn bundle_completed(
        &self,
        bundle_id: &str,
        status: BundleStatus,
        reported_profit: Option<Decimal>,
    ) {
        let (emoji, color) = match status {
            BundleStatus::Success => ("🎉", 0x00FF00),
            BundleStatus::PartialUnwound => ("⚖️", 0xFFA500),
            _ => ("❌", 0xFF0000),
        };
        let profit = reported_profit
            .map(|p| format!("${}", p))
            .unwrap_or_else(|| "-".to_string());
        let msg = format!(
            "{} **Bundle Completed**\n{}\nStatus: {:?}\nProfit: {}",
            emoji, bundle_id, status, profit
        );
        self.send(&msg, color).await;
    }

    /// Alert: error occurred
    pub async fn error(&self, context: &str, error: &str) {
        let msg = format!("❌ **Error**\n{}\n```{}```", context, error);
        self.send(&msg, 0xFF0000).await;
    }
}
