//! Position ledger.
//!
//! Fills are the source of truth: an append-only JSONL log, one record
//! per line, never mutated or deleted. Positions are an aggregation
//! recomputed from fills on read. A corrupt line costs that one record,
//! not the file.

use anyhow::Result;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::types::{Outcome, Position, PositionView, Side, TradeFillRecord};

const FILLS_FILE: &str = "fills.jsonl";

/// platform + market + outcome
pub type PositionKey = (String, String, Outcome);

pub struct PositionLedger {
    path: Option<PathBuf>,
    fills: Mutex<Vec<TradeFillRecord>>,
}

impl PositionLedger {
    /// Open the ledger under `dir`, replaying any existing fill log.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        let path = dir.as_ref().join(FILLS_FILE);
        let fills = if path.exists() {
            let content = fs::read_to_string(&path)?;
            let mut loaded = Vec::new();
            for (lineno, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<TradeFillRecord>(line) {
                    Ok(fill) => loaded.push(fill),
                    Err(e) => {
                        warn!("Skipping unreadable fill record on line {}: {}", lineno + 1, e)
                    }
                }
            }
            loaded
        } else {
            Vec::new()
        };
        Ok(Self {
            path: Some(path),
            fills: Mutex::new(fills),
        })
    }

    /// Memory-only ledger for tests and throwaway dry runs.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            fills: Mutex::new(Vec::new()),
        }
    }

    /// Append one fill. The log is the journal: the line is written
    /// before the in-memory view picks the record up.
    pub fn append(&self, fill: TradeFillRecord) -> Result<()> {
        if let Some(path) = &self.path {
            let json = serde_json::to_string(&fill)?;
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "{}", json)?;
        }
        self.fills.lock().push(fill);
        Ok(())
    }

    pub fn fills(&self) -> Vec<TradeFillRecord> {
        self.fills.lock().clone()
    }

    /// Aggregate open positions from the fill history.
    ///
    /// Buys add shares and cost basis. Sells remove at most the current
    /// share count and reduce the basis proportionally at the running
    /// average - inventory never goes negative. Flat positions drop out.
    pub fn positions(&self) -> Vec<Position> {
        let fills = self.fills.lock();
        let mut book: BTreeMap<PositionKey, (Decimal, Decimal)> = BTreeMap::new();

        for fill in fills.iter() {
            if fill.filled_size <= Decimal::ZERO {
                continue;
            }
            let key = (
                fill.platform.clone(),
                fill.market_id.clone(),
                fill.outcome,
            );
            let (shares, basis) = book.entry(key).or_insert((Decimal::ZERO, Decimal::ZERO));
            match fill.side {
                Side::Buy => {
                    *shares += fill.filled_size;
                    *basis += fill.filled_price * fill.filled_size;
                }
                Side::Sell => {
                    let sold = fill.filled_size.min(*shares);
                    if *shares > Decimal::ZERO {
                        *basis -= sold * (*basis / *shares);
                    }
                    *shares -= sold;
                    if *shares == Decimal::ZERO {
                        *basis = Decimal::ZERO;
                    }
                }
            }
        }

        book.into_iter()
            .filter(|(_, (shares, _))| *shares > Decimal::ZERO)
            .map(|((platform, market_id, outcome), (shares, basis))| Position {
                platform,
                market_id,
                outcome,
                shares,
                cost_basis: basis,
                avg_entry_price: basis / shares,
            })
            .collect()
    }

    /// Overlay live prices onto the aggregated positions. The fill log
    /// itself is untouched.
    pub fn mark(&self, prices: &BTreeMap<PositionKey, Decimal>) -> Vec<PositionView> {
        self.positions()
            .into_iter()
            .map(|position| {
                let key = (
                    position.platform.clone(),
                    position.market_id.clone(),
                    position.outcome,
                );
                let current_price = prices.get(&key).copied();
                let unrealized_pnl = current_price
                    .map(|price| (price - position.avg_entry_price) * position.shares);
                PositionView {
                    position,
                    current_price,
                    unrealized_pnl,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn fill(side: Side, size: Decimal, price: Decimal) -> TradeFillRecord {
        TradeFillRecord {
            order_id: "o-1".to_string(),
            platform: "alpha".to_string(),
            market_id: "m1".to_string(),
            outcome: Outcome::Yes,
            side,
            filled_size: size,
            filled_price: price,
            status: "filled".to_string(),
            timestamp: Utc::now(),
            source: "bundle".to_string(),
            agent_id: "agent-1".to_string(),
        }
    }

    #[test]
    fn partial_sell_keeps_average_entry() {
        let ledger = PositionLedger::in_memory();
        ledger.append(fill(Side::Buy, dec!(10), dec!(0.40))).unwrap();
        ledger.append(fill(Side::Sell, dec!(4), dec!(0.55))).unwrap();

        let positions = ledger.positions();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].shares, dec!(6));
        assert_eq!(positions[0].avg_entry_price, dec!(0.40));
        assert_eq!(positions[0].cost_basis, dec!(2.40));
    }

    #[test]
    fn over_sell_clamps_to_zero_and_drops_out() {
        let ledger = PositionLedger::in_memory();
        ledger.append(fill(Side::Buy, dec!(10), dec!(0.40))).unwrap();
        ledger.append(fill(Side::Sell, dec!(25), dec!(0.55))).unwrap();

        assert!(ledger.positions().is_empty());
        // the log itself keeps both records
        assert_eq!(ledger.fills().len(), 2);
    }

    #[test]
    fn mark_overlays_prices_without_touching_fills() {
        let ledger = PositionLedger::in_memory();
        ledger.append(fill(Side::Buy, dec!(10), dec!(0.40))).unwrap();

        let mut prices = BTreeMap::new();
        prices.insert(
            ("alpha".to_string(), "m1".to_string(), Outcome::Yes),
            dec!(0.47),
        );
        let views = ledger.mark(&prices);
        assert_eq!(views[0].unrealized_pnl, Some(dec!(0.70)));
        assert_eq!(ledger.fills().len(), 1);

        // unknown market: no price, no P&L, position still listed
        let views = ledger.mark(&BTreeMap::new());
        assert!(views[0].unrealized_pnl.is_none());
    }

    #[test]
    fn reload_replays_the_log_and_skips_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ledger = PositionLedger::open(dir.path()).unwrap();
            ledger.append(fill(Side::Buy, dec!(10), dec!(0.40))).unwrap();
            ledger.append(fill(Side::Buy, dec!(5), dec!(0.50))).unwrap();
        }
        // corrupt one record in place
        let path = dir.path().join(FILLS_FILE);
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("{not json\n");
        fs::write(&path, content).unwrap();

        let reloaded = PositionLedger::open(dir.path()).unwrap();
        assert_eq!(reloaded.fills().len(), 2);
        let positions = reloaded.positions();
        assert_eq!(positions[0].shares, dec!(15));
    }
}
