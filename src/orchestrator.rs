//! Bundle execution orchestrator.
//!
//! Runs a planned bundle's two legs to a terminal state:
//!
//! ```text
//! planned -> executing -> success | failed | partial_unwound
//! ```
//!
//! Leg B is sent only after leg A's outcome is known. That ordering is
//! the risk bound: the agent is never exposed on both legs of an
//! unconfirmed hedge, so it must survive any future concurrency change.
//! Every status transition is persisted immediately, and each leg that
//! actually filled is appended to the position ledger.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::alerts::AlertClient;
use crate::bundle::BundleStore;
use crate::connector::{with_timeout, MarketConnector, OrderRequest, OrderResult, OrderStatus};
use crate::error::{AgentError, Result};
use crate::ledger::PositionLedger;
use crate::types::{BundleStatus, ExecutionBundle, Outcome, SizedLeg, TradeFillRecord};

const MIN_UNWIND_PRICE: Decimal = dec!(0.01);
const MAX_UNWIND_PRICE: Decimal = dec!(0.99);

/// Per-leg result reported back to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegOutcome {
    pub platform: String,
    pub market_id: String,
    pub outcome: Outcome,
    pub order_id: Option<String>,
    pub status: String,
    pub filled_size: Decimal,
    pub filled_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub bundle_id: String,
    pub status: BundleStatus,
    pub legs: Vec<LegOutcome>,
    /// The planner's pre-trade estimate; populated only on success
    pub reported_profit: Option<Decimal>,
}

pub struct ExecutionOrchestrator {
    connectors: HashMap<String, Arc<dyn MarketConnector>>,
    store: Arc<dyn BundleStore>,
    ledger: Arc<PositionLedger>,
    alerts: Arc<AlertClient>,
    timeout_secs: u64,
    agent_id: String,
}

impl ExecutionOrchestrator {
    pub fn new(
        connectors: Vec<Arc<dyn MarketConnector>>,
        store: Arc<dyn BundleStore>,
        ledger: Arc<PositionLedger>,
        alerts: Arc<AlertClient>,
        timeout_secs: u64,
        agent_id: &str,
    ) -> Self {
        Self {
            connectors: connectors
                .into_iter()
                .map(|c| (c.platform().to_string(), c))
                .collect(),
            store,
            ledger,
            alerts,
            timeout_secs,
            agent_id: agent_id.to_string(),
        }
    }

    fn persist(&self, bundle: &mut ExecutionBundle, status: BundleStatus, reason: Option<String>) {
        bundle.status = status;
        bundle.failure_reason = reason;
        bundle.updated_at = Utc::now();
        self.store.put(bundle.clone());
    }

    fn record_fill(&self, leg: &SizedLeg, result: &OrderResult, source: &str) {
        if result.filled_size <= Decimal::ZERO {
            return;
        }
        let record = TradeFillRecord {
            order_id: result.order_id.clone(),
            platform: leg.platform.clone(),
            market_id: leg.market_id.clone(),
            outcome: leg.outcome,
            side: leg.side,
            filled_size: result.filled_size,
            filled_price: result.filled_price,
            status: format!("{:?}", result.status).to_lowercase(),
            timestamp: result.timestamp,
            source: source.to_string(),
            agent_id: self.agent_id.clone(),
        };
        if let Err(e) = self.ledger.append(record) {
            // the fill happened on-venue; losing the record is an
            // accounting gap, not a trade failure
            warn!("Failed to journal fill for {}: {}", leg.market_id, e);
        }
    }

    async fn place_leg(&self, leg: &SizedLeg) -> Result<OrderResult> {
        let connector = self.connectors.get(&leg.platform).ok_or_else(|| {
            AgentError::ExecutionRejected(format!("no connector for platform '{}'", leg.platform))
        })?;
        let order = OrderRequest {
            market_id: leg.market_id.clone(),
            outcome: leg.outcome,
            side: leg.side,
            price: leg.price,
            size: leg.shares,
        };
        let result = with_timeout(self.timeout_secs, connector.place_order(&order)).await?;
        Ok(result)
    }

    fn notify(&self, bundle_id: &str, status: BundleStatus, profit: Option<Decimal>) {
        let alerts = self.alerts.clone();
        let bundle_id = bundle_id.to_string();
        // fire-and-forget: telemetry never changes the reported outcome
        tokio::spawn(async move {
            alerts.bundle_completed(&bundle_id, status, profit).await;
        });
    }

    /// Run one planned bundle to a terminal state.
    pub async fn execute(&self, bundle_id: &str) -> Result<ExecutionOutcome> {
        let mut bundle = self
            .store
            .get(bundle_id)
            .ok_or_else(|| AgentError::ExecutionRejected(format!("unknown bundle '{}'", bundle_id)))?;

        if bundle.status != BundleStatus::Planned {
            return Err(AgentError::ExecutionRejected(format!(
                "bundle '{}' is {:?}, not planned",
                bundle_id, bundle.status
            )));
        }
        if bundle.legs.len() != 2 {
            return Err(AgentError::ExecutionRejected(format!(
                "bundle '{}' has {} legs, expected 2",
                bundle_id,
                bundle.legs.len()
            )));
        }

        let leg_a = bundle.legs[0].clone();
        let leg_b = bundle.legs[1].clone();

        // claim it just before sending leg A
        self.persist(&mut bundle, BundleStatus::Executing, None);
        info!("Executing bundle {}", bundle_id);

        let result_a = match self.place_leg(&leg_a).await {
            Ok(result) if result.status == OrderStatus::Rejected => {
                self.persist(
                    &mut bundle,
                    BundleStatus::Failed,
                    Some("Leg A rejected".to_string()),
                );
                self.notify(bundle_id, BundleStatus::Failed, None);
                return Ok(self.outcome(&bundle, vec![leg_outcome(&leg_a, Some(&result))]));
            }
            Ok(result) => result,
            Err(e) => {
                self.persist(
                    &mut bundle,
                    BundleStatus::Failed,
                    Some(format!("Leg A connector failure: {}", e)),
                );
                self.notify(bundle_id, BundleStatus::Failed, None);
                return Ok(self.outcome(&bundle, vec![leg_outcome(&leg_a, None)]));
            }
        };

        // leg A is live; leg B decides success or unwind
        match self.place_leg(&leg_b).await {
            Ok(result_b) if result_b.status != OrderStatus::Rejected => {
                self.record_fill(&leg_a, &result_a, "bundle");
                self.record_fill(&leg_b, &result_b, "bundle");
                self.persist(&mut bundle, BundleStatus::Success, None);
                let profit = Some(bundle.expected_profit);
                self.notify(bundle_id, BundleStatus::Success, profit);
                Ok(self.outcome(
                    &bundle,
                    vec![
                        leg_outcome(&leg_a, Some(&result_a)),
                        leg_outcome(&leg_b, Some(&result_b)),
                    ],
                ))
            }
            other => {
                let reason = match &other {
                    Ok(_) => "Leg B rejected".to_string(),
                    Err(e) => format!("Leg B connector failure: {}", e),
                };
                warn!("{} on bundle {}; unwinding leg A", reason, bundle_id);
                self.record_fill(&leg_a, &result_a, "bundle");
                self.unwind(&mut bundle, &leg_a, &result_a, reason).await
            }
        }
    }

    /// Best-effort neutralization of a filled leg A: buy the
    /// complementary outcome at 1 - entry, clamped into valid ticks.
    async fn unwind(
        &self,
        bundle: &mut ExecutionBundle,
        leg_a: &SizedLeg,
        result_a: &OrderResult,
        reason: String,
    ) -> Result<ExecutionOutcome> {
        let size = if result_a.filled_size > Decimal::ZERO {
            result_a.filled_size
        } else {
            leg_a.shares
        };
        let unwind_leg = SizedLeg {
            platform: leg_a.platform.clone(),
            market_id: leg_a.market_id.clone(),
            outcome: leg_a.outcome.flip(),
            side: leg_a.side,
            price: (Decimal::ONE - leg_a.price).clamp(MIN_UNWIND_PRICE, MAX_UNWIND_PRICE),
            shares: size,
            estimated_cost: Decimal::ZERO,
        };

        match self.place_leg(&unwind_leg).await {
            Ok(result) if result.status != OrderStatus::Rejected => {
                self.record_fill(&unwind_leg, &result, "unwind");
                self.persist(bundle, BundleStatus::PartialUnwound, Some(reason));
                self.notify(&bundle.bundle_id, BundleStatus::PartialUnwound, None);
                Ok(self.outcome(
                    bundle,
                    vec![
                        leg_outcome(leg_a, Some(result_a)),
                        leg_outcome(&unwind_leg, Some(&result)),
                    ],
                ))
            }
            other => {
                let unwind_failure = match other {
                    Ok(_) => "unwind rejected".to_string(),
                    Err(e) => format!("unwind connector failure: {}", e),
                };
                self.persist(
                    bundle,
                    BundleStatus::Failed,
                    Some(format!("{}; {}", reason, unwind_failure)),
                );
                self.notify(&bundle.bundle_id, BundleStatus::Failed, None);
                Ok(self.outcome(bundle, vec![leg_outcome(leg_a, Some(result_a))]))
            }
        }
    }

    fn outcome(&self, bundle: &ExecutionBundle, legs: Vec<LegOutcome>) -> ExecutionOutcome {
        ExecutionOutcome {
            bundle_id: bundle.bundle_id.clone(),
            status: bundle.status,
            legs,
            reported_profit: if bundle.status == BundleStatus::Success {
                Some(bundle.expected_profit)
            } else {
                None
            },
        }
    }
}

fn leg_outcome(leg: &SizedLeg, result: Option<&OrderResult>) -> LegOutcome {
    match result {
        Some(result) => LegOutcome {
            platform: leg.platform.clone(),
            market_id: leg.market_id.clone(),
            outcome: leg.outcome,
            order_id: Some(result.order_id.clone()),
            status: format!("{:?}", result.status).to_lowercase(),
            filled_size: result.filled_size,
            filled_price: result.filled_price,
        },
        None => LegOutcome {
            platform: leg.platform.clone(),
            market_id: leg.market_id.clone(),
            outcome: leg.outcome,
            order_id: None,
            status: "error".to_string(),
            filled_size: Decimal::ZERO,
            filled_price: Decimal::ZERO,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::InMemoryBundleStore;
    use crate::paper::PaperConnector;
    use crate::types::Side;

    fn sized_leg(platform: &str, market_id: &str, outcome: Outcome, price: Decimal) -> SizedLeg {
        SizedLeg {
            platform: platform.to_string(),
            market_id: market_id.to_string(),
            outcome,
            side: Side::Buy,
            price,
            shares: dec!(10),
            estimated_cost: price * dec!(10),
        }
    }

    fn planned_bundle(legs: Vec<SizedLeg>) -> ExecutionBundle {
        ExecutionBundle {
            bundle_id: "b-1".to_string(),
            legs,
            share_count: dec!(10),
            unit_cost: dec!(0.92),
            expected_profit: dec!(0.80),
            expected_profit_percent: dec!(8.7),
            slippage_bps: 40,
            fee_bps: 20,
            status: BundleStatus::Planned,
            failure_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    struct Fixture {
        alpha: Arc<PaperConnector>,
        beta: Arc<PaperConnector>,
        store: Arc<InMemoryBundleStore>,
        ledger: Arc<PositionLedger>,
        orchestrator: ExecutionOrchestrator,
    }

    fn cross_fixture() -> Fixture {
        let alpha = Arc::new(PaperConnector::new("alpha"));
        let beta = Arc::new(PaperConnector::new("beta"));
        let store = Arc::new(InMemoryBundleStore::new(10));
        let ledger = Arc::new(PositionLedger::in_memory());
        let orchestrator = ExecutionOrchestrator::new(
            vec![
                alpha.clone() as Arc<dyn MarketConnector>,
                beta.clone() as Arc<dyn MarketConnector>,
            ],
            store.clone(),
            ledger.clone(),
            Arc::new(AlertClient::new(None)),
            5,
            "agent-1",
        );
        store.put(planned_bundle(vec![
            sized_leg("alpha", "m-a", Outcome::Yes, dec!(0.40)),
            sized_leg("beta", "m-b", Outcome::No, dec!(0.52)),
        ]));
        Fixture {
            alpha,
            beta,
            store,
            ledger,
            orchestrator,
        }
    }

    #[tokio::test]
    async fn both_legs_fill_is_success() {
        let fx = cross_fixture();
        let outcome = fx.orchestrator.execute("b-1").await.unwrap();

        assert_eq!(outcome.status, BundleStatus::Success);
        assert_eq!(outcome.reported_profit, Some(dec!(0.80)));
        assert_eq!(outcome.legs.len(), 2);
        assert_eq!(fx.ledger.fills().len(), 2);
        assert_eq!(
            fx.store.get("b-1").unwrap().status,
            BundleStatus::Success
        );
    }

    #[tokio::test]
    async fn leg_a_rejection_fails_without_touching_leg_b() {
        let fx = cross_fixture();
        fx.alpha.reject_orders("m-a", Outcome::Yes);

        let outcome = fx.orchestrator.execute("b-1").await.unwrap();
        assert_eq!(outcome.status, BundleStatus::Failed);
        assert!(outcome.reported_profit.is_none());
        assert!(fx.beta.placed_orders().is_empty());
        assert!(fx.ledger.fills().is_empty());
        let stored = fx.store.get("b-1").unwrap();
        assert_eq!(stored.failure_reason.as_deref(), Some("Leg A rejected"));
    }

    #[tokio::test]
    async fn leg_b_rejection_unwinds_leg_a() {
        let fx = cross_fixture();
        fx.beta.reject_orders("m-b", Outcome::No);

        let outcome = fx.orchestrator.execute("b-1").await.unwrap();
        assert_eq!(outcome.status, BundleStatus::PartialUnwound);

        // leg A entry and its unwind are both journaled
        let fills = fx.ledger.fills();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].source, "bundle");
        assert_eq!(fills[1].source, "unwind");
        assert_eq!(fills[1].outcome, Outcome::No);
        assert_eq!(fills[1].filled_price, dec!(0.60));

        // the unwind order flipped the outcome at 1 - entry
        let unwind_order = &fx.alpha.placed_orders()[1];
        assert_eq!(unwind_order.outcome, Outcome::No);
        assert_eq!(unwind_order.price, dec!(0.60));
    }

    #[tokio::test]
    async fn leg_b_transport_failure_also_unwinds() {
        let fx = cross_fixture();
        fx.beta.fail_orders("m-b", Outcome::No);

        let outcome = fx.orchestrator.execute("b-1").await.unwrap();
        assert_eq!(outcome.status, BundleStatus::PartialUnwound);
        let stored = fx.store.get("b-1").unwrap();
        assert!(stored
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("connector failure"));
    }

    #[tokio::test]
    async fn failed_unwind_is_terminal_failure() {
        let fx = cross_fixture();
        fx.beta.reject_orders("m-b", Outcome::No);
        fx.alpha.reject_orders("m-a", Outcome::No);

        let outcome = fx.orchestrator.execute("b-1").await.unwrap();
        assert_eq!(outcome.status, BundleStatus::Failed);
        let stored = fx.store.get("b-1").unwrap();
        assert!(stored.failure_reason.as_deref().unwrap().contains("unwind"));
        // leg A's real fill is still on the books
        assert_eq!(fx.ledger.fills().len(), 1);
    }

    #[tokio::test]
    async fn unwind_price_is_clamped_into_valid_ticks() {
        let fx = cross_fixture();
        fx.store.put(planned_bundle(vec![
            sized_leg("alpha", "m-a", Outcome::Yes, dec!(0.995)),
            sized_leg("beta", "m-b", Outcome::No, dec!(0.52)),
        ]));
        fx.beta.reject_orders("m-b", Outcome::No);

        fx.orchestrator.execute("b-1").await.unwrap();
        let unwind_order = &fx.alpha.placed_orders()[1];
        assert_eq!(unwind_order.price, dec!(0.01));
    }

    #[tokio::test]
    async fn terminal_bundles_cannot_be_re_executed() {
        let fx = cross_fixture();
        fx.orchestrator.execute("b-1").await.unwrap();
        let err = fx.orchestrator.execute("b-1").await.unwrap_err();
        assert_eq!(err.code(), "EXECUTION_REJECTED");
    }

    #[tokio::test]
    async fn unknown_bundle_is_rejected() {
        let fx = cross_fixture();
        let err = fx.orchestrator.execute("nope").await.unwrap_err();
        assert_eq!(err.code(), "EXECUTION_REJECTED");
    }
}
