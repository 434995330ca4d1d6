//! Paper connector: an in-memory venue for dry-run mode and tests.
//!
//! Orders fill instantly at their limit price. Failure behavior is
//! scriptable per market/outcome so execution paths can be exercised
//! without a live venue.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::connector::{
    BookTop, ConnectorPosition, Market, MarketConnector, MarketFilter, MarketPrice, OrderRequest,
    OrderResult, OrderStatus,
};
use crate::error::ConnectorError;
use crate::types::Outcome;

pub struct PaperConnector {
    platform: String,
    markets: Mutex<Vec<Market>>,
    books: Mutex<HashMap<String, BookTop>>,
    prices: Mutex<HashMap<String, MarketPrice>>,
    /// (market_id, outcome) pairs whose orders the venue rejects
    reject: Mutex<HashSet<(String, Outcome)>>,
    /// (market_id, outcome) pairs whose orders fail in transport
    fail: Mutex<HashSet<(String, Outcome)>>,
    unavailable: Mutex<bool>,
    placed: Mutex<Vec<OrderRequest>>,
}

impl PaperConnector {
    pub fn new(platform: &str) -> Self {
        Self {
            platform: platform.to_lowercase(),
            markets: Mutex::new(Vec::new()),
            books: Mutex::new(HashMap::new()),
            prices: Mutex::new(HashMap::new()),
            reject: Mutex::new(HashSet::new()),
            fail: Mutex::new(HashSet::new()),
            unavailable: Mutex::new(false),
            placed: Mutex::new(Vec::new()),
        }
    }

    pub fn add_market(&self, market: Market) {
        self.markets.lock().push(market);
    }

    pub fn set_book(&self, market_id: &str, book: BookTop) {
        self.books.lock().insert(market_id.to_string(), book);
    }

    pub fn set_price(&self, market_id: &str, price: MarketPrice) {
        self.prices.lock().insert(market_id.to_string(), price);
    }

    /// Make the venue reject orders for one market outcome.
    pub fn reject_orders(&self, market_id: &str, outcome: Outcome) {
        self.reject.lock().insert((market_id.to_string(), outcome));
    }

    /// Make order placement fail in transport for one market outcome.
    pub fn fail_orders(&self, market_id: &str, outcome: Outcome) {
        self.fail.lock().insert((market_id.to_string(), outcome));
    }

    pub fn set_unavailable(&self, down: bool) {
        *self.unavailable.lock() = down;
    }

    /// Orders the venue has seen, in placement order.
    pub fn placed_orders(&self) -> Vec<OrderRequest> {
        self.placed.lock().clone()
    }

    fn check_up(&self) -> Result<(), ConnectorError> {
        if *self.unavailable.lock() {
            return Err(ConnectorError::Unavailable(format!(
                "{} paper venue offline",
                self.platform
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MarketConnector for PaperConnector {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn get_markets(&self, filter: &MarketFilter) -> Result<Vec<Market>, ConnectorError> {
        self.check_up()?;
        let mut markets: Vec<Market> = self
            .markets
            .lock()
            .iter()
            .filter(|m| !filter.active_only || m.active)
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            markets.truncate(limit);
        }
        Ok(markets)
    }

    async fn get_market_price(&self, market_id: &str) -> Result<MarketPrice, ConnectorError> {
        self.check_up()?;
        self.prices
            .lock()
            .get(market_id)
            .copied()
            .ok_or_else(|| ConnectorError::BadResponse(format!("unknown market {}", market_id)))
    }

    async fn get_book_top(&self, market_id: &str) -> Result<BookTop, ConnectorError> {
        self.check_up()?;
        self.books
            .lock()
            .get(market_id)
            .copied()
            .ok_or_else(|| ConnectorError::BadResponse(format!("unknown market {}", market_id)))
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderResult, ConnectorError> {
        self.check_up()?;
        let key = (order.market_id.clone(), order.outcome);
        if self.fail.lock().contains(&key) {
            return Err(ConnectorError::Unavailable("order endpoint down".to_string()));
        }
        self.placed.lock().push(order.clone());
        if self.reject.lock().contains(&key) {
            return Ok(OrderResult {
                order_id: Uuid::new_v4().to_string(),
                status: OrderStatus::Rejected,
                filled_size: Decimal::ZERO,
                filled_price: Decimal::ZERO,
                cost: Decimal::ZERO,
                timestamp: Utc::now(),
                tx_hash: None,
            });
        }
        Ok(OrderResult {
            order_id: Uuid::new_v4().to_string(),
            status: OrderStatus::Filled,
            filled_size: order.size,
            filled_price: order.price,
            cost: order.price * order.size,
            timestamp: Utc::now(),
            tx_hash: None,
        })
    }

    async fn get_positions(
        &self,
        _wallet: &str,
    ) -> Result<Vec<ConnectorPosition>, ConnectorError> {
        Err(ConnectorError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use rust_decimal_macros::dec;

    fn order(market_id: &str, outcome: Outcome) -> OrderRequest {
        OrderRequest {
            market_id: market_id.to_string(),
            outcome,
            side: Side::Buy,
            price: dec!(0.45),
            size: dec!(10),
        }
    }

    #[tokio::test]
    async fn fills_at_limit_price() {
        let venue = PaperConnector::new("paper");
        let result = venue.place_order(&order("m1", Outcome::Yes)).await.unwrap();
        assert_eq!(result.status, OrderStatus::Filled);
        assert_eq!(result.filled_size, dec!(10));
        assert_eq!(result.cost, dec!(4.50));
    }

    #[tokio::test]
    async fn scripted_rejection_and_failure() {
        let venue = PaperConnector::new("paper");
        venue.reject_orders("m1", Outcome::No);
        venue.fail_orders("m2", Outcome::Yes);

        let rejected = venue.place_order(&order("m1", Outcome::No)).await.unwrap();
        assert_eq!(rejected.status, OrderStatus::Rejected);
        assert!(venue.place_order(&order("m2", Outcome::Yes)).await.is_err());
        // transport failures never reach the book
        assert_eq!(venue.placed_orders().len(), 1);
    }
}
