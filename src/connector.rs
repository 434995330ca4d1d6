//! Venue connector contract.
//!
//! Each exchange ships its own connector (HTTP client plus on-chain order
//! signing) behind this trait. The core only pulls quotes and places
//! orders through it; custody of signing keys stays on the connector side.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::error::ConnectorError;
use crate::types::{Outcome, Side};

/// Listing filter passed to `get_markets`
#[derive(Debug, Clone, Default)]
pub struct MarketFilter {
    pub active_only: bool,
    pub limit: Option<usize>,
}

/// A tradeable binary market as the venue reports it
#[derive(Debug, Clone)]
pub struct Market {
    pub market_id: String,
    pub title: String,
    pub resolution_date: Option<DateTime<Utc>>,
    pub active: bool,
}

/// Mid prices for both outcomes, used for cross-venue comparison
#[derive(Debug, Clone, Copy)]
pub struct MarketPrice {
    pub yes: Option<Decimal>,
    pub no: Option<Decimal>,
}

/// Best bid/ask on the YES book. The NO ask is synthesized as
/// 1 - yes_bid when the venue has no native NO book.
#[derive(Debug, Clone, Copy)]
pub struct BookTop {
    pub yes_bid: Option<Decimal>,
    pub yes_ask: Option<Decimal>,
    pub liquidity: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub market_id: String,
    pub outcome: Outcome,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Filled,
    Partial,
    Pending,
    Submitted,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct OrderResult {
    pub order_id: String,
    pub status: OrderStatus,
    pub filled_size: Decimal,
    pub filled_price: Decimal,
    pub cost: Decimal,
    pub timestamp: DateTime<Utc>,
    pub tx_hash: Option<String>,
}

/// On-venue position as reported by `get_positions`
#[derive(Debug, Clone)]
pub struct ConnectorPosition {
    pub market_id: String,
    pub outcome: Outcome,
    pub size: Decimal,
    pub avg_price: Decimal,
}

#[async_trait]
pub trait MarketConnector: Send + Sync {
    /// Venue identifier, lowercase (e.g. "polymarket")
    fn platform(&self) -> &str;

    async fn get_markets(&self, filter: &MarketFilter) -> Result<Vec<Market>, ConnectorError>;

    async fn get_market_price(&self, market_id: &str) -> Result<MarketPrice, ConnectorError>;

    async fn get_book_top(&self, market_id: &str) -> Result<BookTop, ConnectorError>;

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderResult, ConnectorError>;

    /// Venues without a positions API return `ConnectorError::Unsupported`.
    async fn get_positions(&self, wallet: &str)
        -> Result<Vec<ConnectorPosition>, ConnectorError>;
}

/// Bound an outbound connector call. A timeout is a failure scoped to
/// that one call, never to the whole scan or bundle.
pub async fn with_timeout<T, F>(secs: u64, fut: F) -> Result<T, ConnectorError>
where
    F: Future<Output = Result<T, ConnectorError>>,
{
    match tokio::time::timeout(Duration::from_secs(secs), fut).await {
        Ok(result) => result,
        Err(_) => Err(ConnectorError::Timeout(secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timeout_maps_to_connector_error() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, ConnectorError>(1)
        };
        let result = with_timeout(0, slow).await;
        assert!(matches!(result, Err(ConnectorError::Timeout(_))));
    }

    #[tokio::test]
    async fn fast_call_passes_through() {
        let result = with_timeout(5, async { Ok::<_, ConnectorError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
