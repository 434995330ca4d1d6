//! Arbitrage scanner.
//!
//! Two detectors over the connector set: intra-platform (a venue's own
//! YES/NO pair sums below $1) and cross-platform (the same real-world
//! event priced apart on two venues, matched by content hash). Scanning
//! is best-effort: per-market and per-venue failures degrade coverage,
//! never correctness, and every gap is reported instead of swallowed.

use futures_util::future::join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::connector::{with_timeout, Market, MarketConnector, MarketFilter};
use crate::error::{AgentError, ConnectorError, Result};
use crate::retry::{retry_async, CircuitBreaker};
use crate::types::{
    ArbitrageOpportunity, Confidence, OpportunityKind, OpportunityLeg, Outcome, Side,
};

/// Report an intra-platform pair only when YES ask + NO ask < this
const INTRA_SUM_THRESHOLD: Decimal = dec!(0.995);
/// Minimum cross-venue YES divergence worth quoting
const CROSS_SPREAD_THRESHOLD: Decimal = dec!(0.015);

const BREAKER_THRESHOLD: u32 = 3;
const BREAKER_RESET: Duration = Duration::from_secs(60);

/// A market or venue the scan could not cover, and why
#[derive(Debug, Clone)]
pub struct SkippedItem {
    pub platform: String,
    pub market_id: Option<String>,
    pub reason: String,
}

/// What the scan actually looked at
#[derive(Debug, Clone, Default)]
pub struct ScanCoverage {
    pub markets_scanned: usize,
    pub connectors_reachable: usize,
    pub skipped: Vec<SkippedItem>,
}

impl ScanCoverage {
    fn merge(mut self, other: ScanCoverage) -> ScanCoverage {
        self.markets_scanned += other.markets_scanned;
        self.connectors_reachable += other.connectors_reachable;
        self.skipped.extend(other.skipped);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ScanReport {
    pub opportunities: Vec<ArbitrageOpportunity>,
    pub coverage: ScanCoverage,
}

/// Canonical fingerprint matching the same event across venues with
/// different ids: normalized title words plus the resolution date
/// truncated to the day.
pub fn canonical_market_hash(title: &str, resolution_date: Option<chrono::DateTime<chrono::Utc>>) -> String {
    let normalized: Vec<String> = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    let date = resolution_date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "open".to_string());
    let mut hasher = Sha256::new();
    hasher.update(normalized.join("-").as_bytes());
    hasher.update(b"|");
    hasher.update(date.as_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 16)
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    let mut out = String::with_capacity(len);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
        if out.len() >= len {
            break;
        }
    }
    out.truncate(len);
    out
}

fn confidence_for(profit: Decimal) -> Confidence {
    if profit > dec!(0.03) {
        Confidence::High
    } else if profit > dec!(0.01) {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

pub struct ArbScanner {
    connectors: Vec<Arc<dyn MarketConnector>>,
    breakers: HashMap<String, Arc<CircuitBreaker>>,
    timeout_secs: u64,
    market_limit: usize,
}

impl ArbScanner {
    pub fn new(config: &Config, connectors: Vec<Arc<dyn MarketConnector>>) -> Self {
        let breakers = connectors
            .iter()
            .map(|c| {
                (
                    c.platform().to_string(),
                    Arc::new(CircuitBreaker::new(BREAKER_THRESHOLD, BREAKER_RESET)),
                )
            })
            .collect();
        Self {
            connectors,
            breakers,
            timeout_secs: config.connector_timeout_secs,
            market_limit: config.scan_market_limit,
        }
    }

    fn breaker(&self, platform: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .get(platform)
            .cloned()
            .unwrap_or_else(|| Arc::new(CircuitBreaker::new(BREAKER_THRESHOLD, BREAKER_RESET)))
    }

    /// List a venue's active markets, bounded to the scan batch size.
    async fn list_markets(
        &self,
        connector: &Arc<dyn MarketConnector>,
    ) -> std::result::Result<Vec<Market>, String> {
        let breaker = self.breaker(connector.platform());
        if breaker.is_open() {
            return Err("circuit breaker open".to_string());
        }
        let filter = MarketFilter {
            active_only: true,
            limit: Some(self.market_limit),
        };
        let timeout = self.timeout_secs;
        let result = retry_async("list markets", 2, || {
            with_timeout(timeout, connector.get_markets(&filter))
        })
        .await;
        match result {
            Ok(mut markets) => {
                breaker.record_success();
                markets.truncate(self.market_limit);
                Ok(markets)
            }
            Err(e) => {
                breaker.record_failure();
                Err(e.to_string())
            }
        }
    }

    /// Mispricings inside a single venue's YES/NO pair.
    pub async fn scan_intra_platform(&self) -> ScanReport {
        let per_connector = self.connectors.iter().map(|connector| async move {
            let platform = connector.platform().to_string();
            let mut opportunities = Vec::new();
            let mut coverage = ScanCoverage::default();

            let markets = match self.list_markets(connector).await {
                Ok(markets) => {
                    coverage.connectors_reachable = 1;
                    markets
                }
                Err(reason) => {
                    warn!("Skipping {} intra scan: {}", platform, reason);
                    coverage.skipped.push(SkippedItem {
                        platform: platform.clone(),
                        market_id: None,
                        reason,
                    });
                    return (opportunities, coverage);
                }
            };

            let books = join_all(markets.iter().map(|market| async move {
                let book = with_timeout(self.timeout_secs, connector.get_book_top(&market.market_id)).await;
                (market.market_id.clone(), book)
            }))
            .await;

            for (market_id, book) in books {
                coverage.markets_scanned += 1;
                let book = match book {
                    Ok(book) => book,
                    Err(e) => {
                        coverage.skipped.push(SkippedItem {
                            platform: platform.clone(),
                            market_id: Some(market_id),
                            reason: e.to_string(),
                        });
                        continue;
                    }
                };
                let (yes_bid, yes_ask) = match (book.yes_bid, book.yes_ask) {
                    (Some(bid), Some(ask)) => (bid, ask),
                    _ => {
                        coverage.skipped.push(SkippedItem {
                            platform: platform.clone(),
                            market_id: Some(market_id),
                            reason: "no quotable book".to_string(),
                        });
                        continue;
                    }
                };

                // NO ask synthesized from the YES bid
                let no_ask = Decimal::ONE - yes_bid;
                let sum = yes_ask + no_ask;
                if sum >= INTRA_SUM_THRESHOLD {
                    continue;
                }
                let profit = Decimal::ONE - sum;
                let profit_percent = profit / sum * dec!(100);
                debug!(
                    "{} {}: YES {} + NO {} = {} (profit {})",
                    platform, market_id, yes_ask, no_ask, sum, profit
                );
                opportunities.push(ArbitrageOpportunity {
                    kind: OpportunityKind::IntraPlatform,
                    legs: vec![
                        OpportunityLeg {
                            platform: platform.clone(),
                            market_id: market_id.clone(),
                            outcome: Outcome::Yes,
                            side: Side::Buy,
                            price: yes_ask,
                        },
                        OpportunityLeg {
                            platform: platform.clone(),
                            market_id: market_id.clone(),
                            outcome: Outcome::No,
                            side: Side::Buy,
                            price: no_ask,
                        },
                    ],
                    total_cost: sum,
                    guaranteed_payout: Decimal::ONE,
                    profit,
                    profit_percent,
                    confidence: confidence_for(profit),
                });
            }

            (opportunities, coverage)
        });

        let mut opportunities = Vec::new();
        let mut coverage = ScanCoverage::default();
        for (opps, cov) in join_all(per_connector).await {
            opportunities.extend(opps);
            coverage = coverage.merge(cov);
        }
        ScanReport {
            opportunities,
            coverage,
        }
    }

    /// The same event priced apart on two venues.
    pub async fn scan_cross_platform(&self) -> ScanReport {
        let mut pairs = Vec::new();
        for i in 0..self.connectors.len() {
            for j in (i + 1)..self.connectors.len() {
                pairs.push((self.connectors[i].clone(), self.connectors[j].clone()));
            }
        }

        let per_pair = pairs.iter().map(|(a, b)| self.scan_pair(a, b));

        let mut opportunities = Vec::new();
        let mut coverage = ScanCoverage::default();
        for (opps, cov) in join_all(per_pair).await {
            opportunities.extend(opps);
            // reachability is counted by the intra pass; avoid double counting
            coverage.markets_scanned += cov.markets_scanned;
            coverage.skipped.extend(cov.skipped);
        }
        ScanReport {
            opportunities,
            coverage,
        }
    }

    async fn scan_pair(
        &self,
        a: &Arc<dyn MarketConnector>,
        b: &Arc<dyn MarketConnector>,
    ) -> (Vec<ArbitrageOpportunity>, ScanCoverage) {
        let mut opportunities = Vec::new();
        let mut coverage = ScanCoverage::default();

        let (markets_a, markets_b) =
            match tokio::join!(self.list_markets(a), self.list_markets(b)) {
                (Ok(ma), Ok(mb)) => (ma, mb),
                (Err(reason), _) | (_, Err(reason)) => {
                    coverage.skipped.push(SkippedItem {
                        platform: format!("{}+{}", a.platform(), b.platform()),
                        market_id: None,
                        reason,
                    });
                    return (opportunities, coverage);
                }
            };

        let by_hash: HashMap<String, &Market> = markets_b
            .iter()
            .map(|m| (canonical_market_hash(&m.title, m.resolution_date), m))
            .collect();

        let matched: Vec<(&Market, &Market)> = markets_a
            .iter()
            .filter_map(|ma| {
                by_hash
                    .get(&canonical_market_hash(&ma.title, ma.resolution_date))
                    .map(|mb| (ma, *mb))
            })
            .collect();

        let priced = join_all(matched.iter().map(|(ma, mb)| async move {
            let prices = tokio::join!(
                with_timeout(self.timeout_secs, a.get_market_price(&ma.market_id)),
                with_timeout(self.timeout_secs, b.get_market_price(&mb.market_id)),
            );
            (ma, mb, prices)
        }))
        .await;

        for (ma, mb, (price_a, price_b)) in priced {
            coverage.markets_scanned += 1;
            let (price_a, price_b) = match (price_a, price_b) {
                (Ok(pa), Ok(pb)) => (pa, pb),
                (Err(e), _) | (_, Err(e)) => {
                    coverage.skipped.push(SkippedItem {
                        platform: format!("{}+{}", a.platform(), b.platform()),
                        market_id: Some(ma.market_id.clone()),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let (yes_a, yes_b) = match (price_a.yes, price_b.yes) {
                (Some(ya), Some(yb)) => (ya, yb),
                _ => {
                    coverage.skipped.push(SkippedItem {
                        platform: format!("{}+{}", a.platform(), b.platform()),
                        market_id: Some(ma.market_id.clone()),
                        reason: "mid price unquotable on one side".to_string(),
                    });
                    continue;
                }
            };

            let spread = (yes_a - yes_b).abs();
            if spread <= CROSS_SPREAD_THRESHOLD {
                continue;
            }

            // Buy YES where it is cheap, NO on the other venue.
            let (cheap, cheap_market, cheap_yes, other, other_market, other_price) =
                if yes_a < yes_b {
                    (a, *ma, yes_a, b, *mb, price_b)
                } else {
                    (b, *mb, yes_b, a, *ma, price_a)
                };
            let other_no = match other_price.no {
                Some(no) => no,
                None => Decimal::ONE - other_price.yes.unwrap_or(Decimal::ONE),
            };
            let total = cheap_yes + other_no;
            if total >= Decimal::ONE {
                continue;
            }
            let profit = Decimal::ONE - total;
            let profit_percent = profit / total * dec!(100);
            opportunities.push(ArbitrageOpportunity {
                kind: OpportunityKind::CrossPlatform,
                legs: vec![
                    OpportunityLeg {
                        platform: cheap.platform().to_string(),
                        market_id: cheap_market.market_id.clone(),
                        outcome: Outcome::Yes,
                        side: Side::Buy,
                        price: cheap_yes,
                    },
                    OpportunityLeg {
                        platform: other.platform().to_string(),
                        market_id: other_market.market_id.clone(),
                        outcome: Outcome::No,
                        side: Side::Buy,
                        price: other_no,
                    },
                ],
                total_cost: total,
                guaranteed_payout: Decimal::ONE,
                profit,
                profit_percent,
                confidence: confidence_for(profit),
            });
        }

        (opportunities, coverage)
    }

    /// Run both detectors concurrently, rank by profit percent.
    ///
    /// Fails only when no connector at all is reachable; anything less is
    /// degraded coverage and shows up in the report.
    pub async fn scan_all(&self) -> Result<ScanReport> {
        let (intra, cross) = tokio::join!(self.scan_intra_platform(), self.scan_cross_platform());

        if !self.connectors.is_empty() && intra.coverage.connectors_reachable == 0 {
            return Err(AgentError::Connector(ConnectorError::Unavailable(
                "no connector reachable".to_string(),
            )));
        }

        let mut opportunities = intra.opportunities;
        opportunities.extend(cross.opportunities);
        opportunities.sort_by(|x, y| {
            y.profit_percent
                .cmp(&x.profit_percent)
        });

        Ok(ScanReport {
            opportunities,
            coverage: intra.coverage.merge(cross.coverage),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{BookTop, MarketPrice};
    use crate::paper::PaperConnector;
    use chrono::{TimeZone, Utc};

    fn test_config() -> Config {
        Config::for_tests()
    }

    fn market(id: &str, title: &str) -> Market {
        Market {
            market_id: id.to_string(),
            title: title.to_string(),
            resolution_date: Some(Utc.with_ymd_and_hms(2026, 11, 3, 12, 0, 0).unwrap()),
            active: true,
        }
    }

    #[test]
    fn hash_matches_across_venues() {
        let date = Some(Utc.with_ymd_and_hms(2026, 11, 3, 9, 30, 0).unwrap());
        let late = Some(Utc.with_ymd_and_hms(2026, 11, 3, 23, 0, 0).unwrap());
        // different casing, punctuation and intraday time still match
        assert_eq!(
            canonical_market_hash("Will BTC close above $100k?", date),
            canonical_market_hash("will btc close above 100k", late),
        );
        assert_ne!(
            canonical_market_hash("Will BTC close above $100k?", date),
            canonical_market_hash("Will ETH close above $100k?", date),
        );
    }

    #[tokio::test]
    async fn intra_reports_profit_below_threshold() {
        let venue = Arc::new(PaperConnector::new("alpha"));
        venue.add_market(market("m1", "BTC above 100k"));
        venue.set_book(
            "m1",
            BookTop {
                yes_bid: Some(dec!(0.52)),
                yes_ask: Some(dec!(0.48)),
                liquidity: Some(dec!(1000)),
            },
        );
        let scanner = ArbScanner::new(&test_config(), vec![venue as Arc<dyn MarketConnector>]);

        let report = scanner.scan_intra_platform().await;
        assert_eq!(report.opportunities.len(), 1);
        let opp = &report.opportunities[0];
        // NO ask = 1 - 0.52 = 0.48; sum = 0.96
        assert_eq!(opp.total_cost, dec!(0.96));
        assert_eq!(opp.profit, dec!(0.04));
        assert_eq!(opp.profit_percent, dec!(0.04) / dec!(0.96) * dec!(100));
        assert_eq!(opp.confidence, Confidence::High);
        assert_eq!(report.coverage.markets_scanned, 1);
    }

    #[tokio::test]
    async fn intra_silent_above_threshold() {
        let venue = Arc::new(PaperConnector::new("alpha"));
        venue.add_market(market("m1", "BTC above 100k"));
        venue.set_book(
            "m1",
            BookTop {
                yes_bid: Some(dec!(0.50)),
                yes_ask: Some(dec!(0.51)),
                liquidity: None,
            },
        );
        let scanner = ArbScanner::new(&test_config(), vec![venue as Arc<dyn MarketConnector>]);

        let report = scanner.scan_intra_platform().await;
        assert!(report.opportunities.is_empty());
        assert_eq!(report.coverage.markets_scanned, 1);
    }

    #[tokio::test]
    async fn cross_platform_detects_divergence() {
        let alpha = Arc::new(PaperConnector::new("alpha"));
        let beta = Arc::new(PaperConnector::new("beta"));
        alpha.add_market(market("a-1", "Will BTC close above $100k?"));
        beta.add_market(market("b-9", "will btc close above 100k"));
        alpha.set_price(
            "a-1",
            MarketPrice {
                yes: Some(dec!(0.40)),
                no: Some(dec!(0.60)),
            },
        );
        beta.set_price(
            "b-9",
            MarketPrice {
                yes: Some(dec!(0.48)),
                no: Some(dec!(0.52)),
            },
        );
        let scanner = ArbScanner::new(
            &test_config(),
            vec![alpha as Arc<dyn MarketConnector>, beta as Arc<dyn MarketConnector>],
        );

        let report = scanner.scan_cross_platform().await;
        assert_eq!(report.opportunities.len(), 1);
        let opp = &report.opportunities[0];
        assert_eq!(opp.kind, OpportunityKind::CrossPlatform);
        // buy YES on alpha at 0.40, NO on beta at 0.52
        assert_eq!(opp.legs[0].platform, "alpha");
        assert_eq!(opp.legs[0].price, dec!(0.40));
        assert_eq!(opp.legs[1].platform, "beta");
        assert_eq!(opp.legs[1].price, dec!(0.52));
        assert_eq!(opp.profit, dec!(0.08));
    }

    #[tokio::test]
    async fn unreachable_venue_degrades_coverage() {
        let up = Arc::new(PaperConnector::new("alpha"));
        up.add_market(market("m1", "BTC above 100k"));
        up.set_book(
            "m1",
            BookTop {
                yes_bid: Some(dec!(0.52)),
                yes_ask: Some(dec!(0.48)),
                liquidity: None,
            },
        );
        let down = Arc::new(PaperConnector::new("beta"));
        down.set_unavailable(true);

        let scanner = ArbScanner::new(
            &test_config(),
            vec![up as Arc<dyn MarketConnector>, down as Arc<dyn MarketConnector>],
        );
        let report = scanner.scan_all().await.unwrap();
        assert_eq!(report.opportunities.len(), 1);
        assert!(report
            .coverage
            .skipped
            .iter()
            .any(|s| s.platform.contains("beta")));
    }

    #[tokio::test]
    async fn all_venues_down_is_total_failure() {
        let a = Arc::new(PaperConnector::new("alpha"));
        a.set_unavailable(true);
        let b = Arc::new(PaperConnector::new("beta"));
        b.set_unavailable(true);

        let scanner = ArbScanner::new(
            &test_config(),
            vec![a as Arc<dyn MarketConnector>, b as Arc<dyn MarketConnector>],
        );
        let err = scanner.scan_all().await.unwrap_err();
        assert_eq!(err.code(), "CONNECTOR_UNAVAILABLE");
    }
}
