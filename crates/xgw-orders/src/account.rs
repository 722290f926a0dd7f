//! Account book: positions and cash as last reported by the server.

use dashmap::DashMap;
use std::collections::HashSet;
use tracing::debug;
use xgw_core::{CashSnapshot, PositionSnapshot};

/// Positions keyed by instrument, cash keyed by currency.
///
/// Populated only by reconciliation sweeps; the server is authoritative.
#[derive(Debug, Default)]
pub struct AccountBook {
    positions: DashMap<String, PositionSnapshot>,
    cash: DashMap<String, CashSnapshot>,
}

impl AccountBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace positions with `incoming`: upsert first, then remove those
    /// the server no longer reports. Returns the number of removals.
    pub fn sync_positions(&self, incoming: &[PositionSnapshot]) -> usize {
        let mut seen = HashSet::with_capacity(incoming.len());
        for pos in incoming {
            seen.insert(pos.instrument.clone());
            self.positions.insert(pos.instrument.clone(), pos.clone());
        }

        let before = self.positions.len();
        self.positions.retain(|instrument, _| seen.contains(instrument));
        let removed = before - self.positions.len();
        if removed > 0 {
            debug!(removed, "Removed closed positions");
        }
        removed
    }

    /// Same policy as [`AccountBook::sync_positions`], for cash balances.
    pub fn sync_cash(&self, incoming: &[CashSnapshot]) -> usize {
        let mut seen = HashSet::with_capacity(incoming.len());
        for c in incoming {
            seen.insert(c.currency.clone());
            self.cash.insert(c.currency.clone(), c.clone());
        }

        let before = self.cash.len();
        self.cash.retain(|currency, _| seen.contains(currency));
        before - self.cash.len()
    }

    pub fn position(&self, instrument: &str) -> Option<PositionSnapshot> {
        self.positions.get(instrument).map(|p| p.clone())
    }

    /// All positions, sorted by instrument.
    pub fn positions(&self) -> Vec<PositionSnapshot> {
        let mut out: Vec<_> = self.positions.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        out
    }

    /// All cash balances, sorted by currency.
    pub fn cash(&self) -> Vec<CashSnapshot> {
        let mut out: Vec<_> = self.cash.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.currency.cmp(&b.currency));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use xgw_core::{OrderSide, Price, Quantity};

    fn pos(instrument: &str, qty: rust_decimal::Decimal) -> PositionSnapshot {
        PositionSnapshot {
            instrument: instrument.to_string(),
            side: OrderSide::Buy,
            qty: Quantity::new(qty),
            avg_price: Price::new(dec!(10)),
        }
    }

    #[test]
    fn test_sync_positions_upsert_then_remove() {
        let book = AccountBook::new();
        assert_eq!(book.sync_positions(&[pos("A", dec!(1)), pos("B", dec!(2))]), 0);
        assert_eq!(book.positions().len(), 2);

        let removed = book.sync_positions(&[pos("B", dec!(5)), pos("C", dec!(1))]);
        assert_eq!(removed, 1);
        let all = book.positions();
        let names: Vec<_> = all.iter().map(|p| p.instrument.as_str()).collect();
        assert_eq!(names, vec!["B", "C"]);
        assert_eq!(book.position("B").unwrap().qty, Quantity::new(dec!(5)));
        assert!(book.position("A").is_none());
    }

    #[test]
    fn test_sync_cash_empty_clears() {
        let book = AccountBook::new();
        book.sync_cash(&[CashSnapshot {
            currency: "CNY".to_string(),
            balance: dec!(1000),
            available: dec!(800),
        }]);
        assert_eq!(book.cash().len(), 1);
        assert_eq!(book.sync_cash(&[]), 1);
        assert!(book.cash().is_empty());
    }
}
