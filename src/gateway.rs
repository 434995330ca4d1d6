//! Trade gateway.
//!
//! The composition root for the request paths:
//!
//! ```text
//! quote:   auth -> policy -> scan -> plan -> confirmation token
//! execute: auth -> idempotency replay -> policy -> token -> orchestrator
//! ```
//!
//! Every response goes out in the uniform envelope with a stable error
//! code. Validation, auth, and policy failures return synchronously
//! with zero side effects.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::alerts::AlertClient;
use crate::auth::{GatewayAuth, SignedRequest};
use crate::bundle::{BundleStore, InMemoryBundleStore};
use crate::config::Config;
use crate::connector::{with_timeout, MarketConnector};
use crate::error::AgentError;
use crate::idempotency::IdempotencyCache;
use crate::ledger::PositionLedger;
use crate::orchestrator::{ExecutionOrchestrator, ExecutionOutcome};
use crate::planner::{BundlePlanner, PlanAssumptions};
use crate::policy::PolicyEngine;
use crate::scanner::{ArbScanner, ScanReport};
use crate::token::{ConfirmationTokens, TokenPayload};
use crate::types::{AuthContext, PositionView};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Uniform response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub request_id: String,
    pub data: Option<T>,
    pub error: Option<ApiError>,
    pub timestamp: DateTime<Utc>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            request_id: Uuid::new_v4().to_string(),
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn err(error: &AgentError) -> Self {
        Self {
            success: false,
            request_id: Uuid::new_v4().to_string(),
            data: None,
            error: Some(ApiError {
                code: error.code().to_string(),
                message: error.to_string(),
                details: None,
            }),
            timestamp: Utc::now(),
        }
    }
}

/// Body of a quote request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuoteRequest {
    /// Capital to deploy; defaults to the configured per-bundle cap
    pub capital: Option<Decimal>,
    /// Slippage tolerance the caller is willing to accept
    pub max_slippage_bps: Option<u32>,
}

/// A quoted, token-gated execution offer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteGrant {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub bundle_id: String,
    pub share_count: Decimal,
    pub estimated_cost: Decimal,
    pub expected_profit: Decimal,
    pub expected_profit_percent: Decimal,
}

/// Body of an execute request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub token: String,
    pub idempotency_key: String,
}

pub struct TradeGateway {
    config: Config,
    auth: GatewayAuth,
    policy: PolicyEngine,
    tokens: ConfirmationTokens,
    idempotency: IdempotencyCache,
    scanner: ArbScanner,
    planner: BundlePlanner,
    orchestrator: ExecutionOrchestrator,
    ledger: Arc<PositionLedger>,
    connectors: Vec<Arc<dyn MarketConnector>>,
    alerts: Arc<AlertClient>,
    pub bundles: Arc<dyn BundleStore>,
}

impl TradeGateway {
    pub fn new(
        config: Config,
        connectors: Vec<Arc<dyn MarketConnector>>,
        ledger: Arc<PositionLedger>,
    ) -> Self {
        let bundles: Arc<dyn BundleStore> =
            Arc::new(InMemoryBundleStore::new(config.bundle_retention));
        let alerts = Arc::new(AlertClient::new(config.discord_webhook.clone()));
        let auth = GatewayAuth::new(
            config.api_keys.clone(),
            config.replay_window_secs,
            config.nonce_ttl_secs,
        );
        let policy = PolicyEngine::new(&config);
        let tokens = ConfirmationTokens::new(&config.token_secret, config.token_ttl_secs);
        let scanner = ArbScanner::new(&config, connectors.clone());
        let planner = BundlePlanner::new(bundles.clone());
        let orchestrator = ExecutionOrchestrator::new(
            connectors.clone(),
            bundles.clone(),
            ledger.clone(),
            alerts.clone(),
            config.connector_timeout_secs,
            &config.agent_id,
        );
        Self {
            config,
            auth,
            policy,
            tokens,
            idempotency: IdempotencyCache::new(),
            scanner,
            planner,
            orchestrator,
            ledger,
            connectors,
            alerts,
            bundles,
        }
    }

    /// Scan without the request envelope, for the agent's own loop.
    pub async fn scan(&self) -> crate::error::Result<ScanReport> {
        self.scanner.scan_all().await
    }

    fn authenticate(&self, request: &SignedRequest) -> Result<AuthContext, AgentError> {
        self.auth.verify(request)
    }

    /// Quote path: find the best opportunity on allowed venues, size a
    /// bundle, and hand back a single-use confirmation token.
    pub async fn handle_quote(&self, request: &SignedRequest) -> ApiResponse<QuoteGrant> {
        let ctx = match self.authenticate(request) {
            Ok(ctx) => ctx,
            Err(e) => return ApiResponse::err(&e),
        };

        let quote_request: QuoteRequest = match parse_body(&request.body) {
            Ok(parsed) => parsed,
            Err(e) => return ApiResponse::err(&e),
        };
        let capital = quote_request.capital.unwrap_or(self.config.capital_per_bundle);
        let max_slippage_bps = quote_request
            .max_slippage_bps
            .unwrap_or(self.config.slippage_bps);

        if capital <= Decimal::ZERO {
            return ApiResponse::err(&AgentError::Validation(
                "capital must be positive".to_string(),
            ));
        }
        if let Err(e) = self.policy.check_slippage(max_slippage_bps) {
            return ApiResponse::err(&e);
        }
        if let Err(e) = self.policy.check_notional(capital) {
            return ApiResponse::err(&e);
        }

        let report = match self.scanner.scan_all().await {
            Ok(report) => report,
            Err(e) => return ApiResponse::err(&e),
        };

        // best opportunity whose venues all clear the allow-list
        let opportunity = report.opportunities.iter().find(|opp| {
            opp.legs
                .iter()
                .all(|leg| self.policy.check_platform(&leg.platform).is_ok())
        });
        let opportunity = match opportunity {
            Some(opp) => opp,
            None => {
                return ApiResponse::err(&AgentError::ExecutionRejected(
                    "no executable opportunity on allowed platforms".to_string(),
                ))
            }
        };

        let assumptions = PlanAssumptions {
            capital,
            slippage_bps: self.config.slippage_bps,
            fee_bps: self.config.fee_bps,
            min_net_edge_bps: self.config.min_net_edge_bps,
        };
        let bundle = match self.planner.plan(opportunity, &assumptions) {
            Ok(bundle) => bundle,
            Err(e) => return ApiResponse::err(&e),
        };

        let payload = TokenPayload {
            version: 0,
            agent_id: ctx.agent_id.clone(),
            bundle_id: bundle.bundle_id.clone(),
            market_id: bundle.legs[0].market_id.clone(),
            side: bundle.legs[0].side,
            shares: bundle.share_count,
            quoted_cost: bundle.estimated_cost(),
            max_slippage_bps,
            expires_at: Utc::now(),
        };
        let (token, expires_at) = match self.tokens.issue(payload) {
            Ok(issued) => issued,
            Err(e) => return ApiResponse::err(&e),
        };

        info!(
            "Quoted bundle {} to {} ({} shares, expires {})",
            bundle.bundle_id, ctx.agent_id, bundle.share_count, expires_at
        );
        let alerts = self.alerts.clone();
        let bundle_id = bundle.bundle_id.clone();
        let expected_profit = bundle.expected_profit;
        tokio::spawn(async move {
            alerts.quote_issued(&bundle_id, expected_profit).await;
        });

        let estimated_cost = bundle.estimated_cost();
        ApiResponse::ok(QuoteGrant {
            token,
            expires_at,
            bundle_id: bundle.bundle_id,
            share_count: bundle.share_count,
            estimated_cost,
            expected_profit: bundle.expected_profit,
            expected_profit_percent: bundle.expected_profit_percent,
        })
    }

    /// Execute path: replay-safe, token-gated execution of a planned
    /// bundle. The exact first response for an idempotency key is
    /// returned for every retry of that key.
    pub async fn handle_execute(&self, request: &SignedRequest) -> ApiResponse<ExecutionOutcome> {
        let ctx = match self.authenticate(request) {
            Ok(ctx) => ctx,
            Err(e) => return ApiResponse::err(&e),
        };

        let execute_request: ExecuteRequest = match parse_body(&request.body) {
            Ok(parsed) => parsed,
            Err(e) => return ApiResponse::err(&e),
        };
        if execute_request.idempotency_key.trim().is_empty() {
            return ApiResponse::err(&AgentError::Validation(
                "idempotency_key must not be empty".to_string(),
            ));
        }

        if let Some(cached) = self.idempotency.get(&execute_request.idempotency_key) {
            match serde_json::from_value(cached) {
                Ok(replayed) => {
                    info!(
                        "Replaying cached response for idempotency key {}",
                        execute_request.idempotency_key
                    );
                    return replayed;
                }
                Err(e) => {
                    return ApiResponse::err(&AgentError::Internal(format!(
                        "cached response unreadable: {}",
                        e
                    )))
                }
            }
        }

        let response = self.execute_inner(&ctx, &execute_request).await;

        match serde_json::to_value(&response) {
            Ok(serialized) => self
                .idempotency
                .put(&execute_request.idempotency_key, serialized),
            Err(e) => warn!("Failed to cache execute response: {}", e),
        }
        response
    }

    async fn execute_inner(
        &self,
        ctx: &AuthContext,
        request: &ExecuteRequest,
    ) -> ApiResponse<ExecutionOutcome> {
        if let Err(e) = self.policy.check_kill_switch() {
            return ApiResponse::err(&e);
        }

        let payload = match self.tokens.verify_and_consume(&request.token) {
            Ok(payload) => payload,
            Err(e) => return ApiResponse::err(&e),
        };
        if payload.agent_id != ctx.agent_id {
            return ApiResponse::err(&AgentError::TokenInvalid);
        }

        if let Err(e) = self.policy.check_slippage(payload.max_slippage_bps) {
            return ApiResponse::err(&e);
        }
        if let Err(e) = self.policy.check_notional(payload.quoted_cost) {
            return ApiResponse::err(&e);
        }

        match self.orchestrator.execute(&payload.bundle_id).await {
            Ok(outcome) => ApiResponse::ok(outcome),
            Err(e) => ApiResponse::err(&e),
        }
    }

    /// Positions path: ledger aggregation marked with best-effort live
    /// prices. The fill log is read-only here.
    pub async fn handle_positions(&self, request: &SignedRequest) -> ApiResponse<Vec<PositionView>> {
        if let Err(e) = self.authenticate(request) {
            return ApiResponse::err(&e);
        }

        let positions = self.ledger.positions();
        let mut prices = BTreeMap::new();
        for position in &positions {
            let connector = self
                .connectors
                .iter()
                .find(|c| c.platform() == position.platform);
            let connector = match connector {
                Some(c) => c,
                None => continue,
            };
            let price = with_timeout(
                self.config.connector_timeout_secs,
                connector.get_market_price(&position.market_id),
            )
            .await;
            let quote = match price {
                Ok(quote) => quote,
                Err(e) => {
                    warn!(
                        "No live price for {}/{}: {}",
                        position.platform, position.market_id, e
                    );
                    continue;
                }
            };
            let current = match position.outcome {
                crate::types::Outcome::Yes => quote.yes,
                crate::types::Outcome::No => quote.no,
            };
            if let Some(current) = current {
                prices.insert(
                    (
                        position.platform.clone(),
                        position.market_id.clone(),
                        position.outcome,
                    ),
                    current,
                );
            }
        }

        ApiResponse::ok(self.ledger.mark(&prices))
    }
}

fn parse_body<T: for<'de> Deserialize<'de>>(body: &str) -> Result<T, AgentError> {
    serde_json::from_str(body)
        .map_err(|e| AgentError::Validation(format!("malformed request body: {}", e)))
}
