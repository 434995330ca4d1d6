use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

/// Binary market outcome
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    /// The complementary outcome, used when unwinding a leg.
    pub fn flip(self) -> Self {
        match self {
            Outcome::Yes => Outcome::No,
            Outcome::No => Outcome::Yes,
        }
    }
}

/// A single venue quote. Ephemeral - never persisted.
#[derive(Debug, Clone)]
pub struct Quote {
    pub platform: String,
    pub market_id: String,
    pub outcome: Outcome,
    pub price: Decimal,
    pub liquidity: Option<Decimal>,
    pub fetched_at: DateTime<Utc>,
}

/// How confident we are that the edge survives execution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityKind {
    IntraPlatform,
    CrossPlatform,
}

/// One side of an arbitrage trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityLeg {
    pub platform: String,
    pub market_id: String,
    pub outcome: Outcome,
    pub side: Side,
    pub price: Decimal,
}

/// A detected mispricing. Recomputed fresh each scan; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub kind: OpportunityKind,
    pub legs: Vec<OpportunityLeg>,
    /// Combined cost of buying every leg for one unit of payout
    pub total_cost: Decimal,
    /// Each matched share pays exactly $1 at resolution
    pub guaranteed_payout: Decimal,
    pub profit: Decimal,
    pub profit_percent: Decimal,
    pub confidence: Confidence,
}

/// A leg sized by the planner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizedLeg {
    pub platform: String,
    pub market_id: String,
    pub outcome: Outcome,
    pub side: Side,
    pub price: Decimal,
    pub shares: Decimal,
    pub estimated_cost: Decimal,
}

/// Bundle lifecycle. Transitions are monotonic; the last three are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BundleStatus {
    Planned,
    Executing,
    Success,
    Failed,
    PartialUnwound,
}

impl BundleStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BundleStatus::Success | BundleStatus::Failed | BundleStatus::PartialUnwound
        )
    }
}

/// A sized, risk-bounded two-leg hedge ready for execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionBundle {
    pub bundle_id: String,
    pub legs: Vec<SizedLeg>,
    pub share_count: Decimal,
    /// Combined per-unit cost across legs
    pub unit_cost: Decimal,
    pub expected_profit: Decimal,
    pub expected_profit_percent: Decimal,
    pub slippage_bps: u32,
    pub fee_bps: u32,
    pub status: BundleStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionBundle {
    /// Total estimated outlay across all legs
    pub fn estimated_cost(&self) -> Decimal {
        self.legs.iter().map(|l| l.estimated_cost).sum()
    }
}

/// Immutable record of an actual fill. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeFillRecord {
    pub order_id: String,
    pub platform: String,
    pub market_id: String,
    pub outcome: Outcome,
    pub side: Side,
    pub filled_size: Decimal,
    pub filled_price: Decimal,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    /// What produced the fill: "bundle" or "unwind"
    pub source: String,
    pub agent_id: String,
}

/// Aggregated holding, derived from fills on read - never persisted separately
#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub platform: String,
    pub market_id: String,
    pub outcome: Outcome,
    pub shares: Decimal,
    pub cost_basis: Decimal,
    pub avg_entry_price: Decimal,
}

/// Position overlaid with a live price
#[derive(Debug, Clone, Serialize)]
pub struct PositionView {
    #[serde(flatten)]
    pub position: Position,
    pub current_price: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
}

/// Identity derived from a verified request signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub agent_id: String,
    pub key_id: String,
}
