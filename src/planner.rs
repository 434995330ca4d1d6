//! Delta-neutral bundle planner.
//!
//! Sizes one opportunity into a risk-bounded two-leg bundle. Pure apart
//! from the store write: same opportunity and assumptions, same bundle.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::bundle::BundleStore;
use crate::error::{AgentError, Result};
use crate::types::{ArbitrageOpportunity, BundleStatus, ExecutionBundle, SizedLeg};

const BPS_DENOMINATOR: Decimal = dec!(10000);

/// Economic assumptions the plan is sized under
#[derive(Debug, Clone)]
pub struct PlanAssumptions {
    pub capital: Decimal,
    pub slippage_bps: u32,
    pub fee_bps: u32,
    pub min_net_edge_bps: u32,
}

pub struct BundlePlanner {
    store: Arc<dyn BundleStore>,
}

impl BundlePlanner {
    pub fn new(store: Arc<dyn BundleStore>) -> Self {
        Self { store }
    }

    /// Size a bundle from one opportunity, or reject with a readable reason.
    pub fn plan(
        &self,
        opportunity: &ArbitrageOpportunity,
        assumptions: &PlanAssumptions,
    ) -> Result<ExecutionBundle> {
        let unit_cost = opportunity.total_cost;
        if unit_cost <= Decimal::ZERO {
            return Err(AgentError::Validation(
                "opportunity has a non-positive unit cost".to_string(),
            ));
        }

        let share_count = (assumptions.capital / unit_cost).floor();
        if share_count < Decimal::ONE {
            return Err(AgentError::InsufficientFunds(format!(
                "capital {} cannot cover one unit at cost {}",
                assumptions.capital, unit_cost
            )));
        }

        let slippage_cost = unit_cost * Decimal::from(assumptions.slippage_bps) / BPS_DENOMINATOR;
        let fee_cost = unit_cost * Decimal::from(assumptions.fee_bps) / BPS_DENOMINATOR;
        let net_profit_per_unit = opportunity.profit - slippage_cost - fee_cost;

        if net_profit_per_unit <= Decimal::ZERO {
            return Err(AgentError::ExecutionRejected(format!(
                "edge of {} per unit is eaten by {} slippage and {} fees",
                opportunity.profit, slippage_cost, fee_cost
            )));
        }

        let net_edge_bps = net_profit_per_unit / unit_cost * BPS_DENOMINATOR;
        if net_edge_bps < Decimal::from(assumptions.min_net_edge_bps) {
            return Err(AgentError::ExecutionRejected(format!(
                "net edge {:.1} bps is below the {} bps minimum",
                net_edge_bps, assumptions.min_net_edge_bps
            )));
        }

        let legs: Vec<SizedLeg> = opportunity
            .legs
            .iter()
            .map(|leg| SizedLeg {
                platform: leg.platform.clone(),
                market_id: leg.market_id.clone(),
                outcome: leg.outcome,
                side: leg.side,
                price: leg.price,
                shares: share_count,
                estimated_cost: leg.price * share_count,
            })
            .collect();

        let now = Utc::now();
        let bundle = ExecutionBundle {
            bundle_id: Uuid::new_v4().to_string(),
            legs,
            share_count,
            unit_cost,
            expected_profit: net_profit_per_unit * share_count,
            expected_profit_percent: net_edge_bps / dec!(100),
            slippage_bps: assumptions.slippage_bps,
            fee_bps: assumptions.fee_bps,
            status: BundleStatus::Planned,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };

        info!(
            "Planned bundle {}: {} shares, expected profit {} ({} bps net edge)",
            bundle.bundle_id, share_count, bundle.expected_profit, net_edge_bps
        );
        self.store.put(bundle.clone());
        Ok(bundle)
    }
}
