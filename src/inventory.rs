//! In-memory cash and per-token position ledger (C6). Mutated only by the
//! single execution worker; no locking is required under that ownership
//! discipline.

use crate::exchange::ExchangeClient;
use crate::types::{OrderResult, Position, Side};
use std::collections::HashMap;

pub struct Inventory {
    pub balance: f64,
    pub positions: HashMap<String, Position>,
}

impl Inventory {
    pub fn new(starting_balance: f64) -> Self {
        Inventory { balance: starting_balance, positions: HashMap::new() }
    }

    /// Applies a fill to cash and position state. Side effects limited to
    /// this structure.
    pub fn update_on_fill(&mut self, result: &OrderResult) {
        if !result.success || result.fill_size <= 0.0 {
            return;
        }
        let signal = &result.signal;
        match signal.side {
            Side::Buy => {
                self.balance -= result.fill_price * result.fill_size + result.fee;
                self.positions
                    .entry(signal.token_id.clone())
                    .and_modify(|p| {
                        let new_size = p.size + result.fill_size;
                        p.avg_entry_price =
                            (p.avg_entry_price * p.size + result.fill_price * result.fill_size) / new_size;
                        p.size = new_size;
                    })
                    .or_insert_with(|| Position {
                        condition_id: signal.condition_id.clone(),
                        token_id: signal.token_id.clone(),
                        outcome: String::new(),
                        size: result.fill_size,
                        avg_entry_price: result.fill_price,
                        strategy: signal.strategy,
                        opened_at: chrono::Utc::now(),
                    });
            }
            Side::Sell => {
                self.balance += result.fill_price * result.fill_size - result.fee;
                let mut remove = false;
                if let Some(p) = self.positions.get_mut(&signal.token_id) {
                    p.size -= result.fill_size;
                    if p.size <= 0.0 {
                        remove = true;
                    }
                }
                if remove {
                    self.positions.remove(&signal.token_id);
                }
            }
        }
    }

    pub fn get_total_exposure(&self) -> f64 {
        self.positions.values().map(|p| p.exposure()).sum()
    }

    pub fn get_market_exposure(&self, condition_id: &str) -> f64 {
        self.positions.values().filter(|p| p.condition_id == condition_id).map(|p| p.exposure()).sum()
    }

    pub fn get_open_position_count(&self) -> usize {
        self.positions.len()
    }

    /// Overwrites balance and positions from authoritative exchange sources.
    /// Used at startup and optionally periodically; occurs between pipeline
    /// steps so no concurrent mutation races it.
    pub async fn refresh_from_api(
        &mut self,
        exchange: &dyn ExchangeClient,
        address: &str,
    ) -> anyhow::Result<()> {
        self.balance = exchange.get_balance().await?;
        let positions = exchange.get_positions(address).await?;
        self.positions.clear();
        for p in positions {
            self.positions.insert(p.token_id.clone(), p);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderType, Signal, StrategyTag};

    fn buy_result(token: &str, price: f64, size: f64) -> OrderResult {
        OrderResult {
            signal: Signal {
                strategy: StrategyTag::Liquidity,
                token_id: token.into(),
                condition_id: "cond1".into(),
                side: Side::Buy,
                price,
                size,
                order_type: OrderType::Gtc,
                edge: None,
                confidence: None,
                reason: "test".into(),
                market_question: "q".into(),
                outcome_side: None,
            },
            success: true,
            order_id: Some("o1".into()),
            fill_price: price,
            fill_size: size,
            fee: 0.0,
            error: None,
            is_dry_run: true,
            is_resting: false,
        }
    }

    #[test]
    fn buy_creates_position_with_weighted_average() {
        let mut inv = Inventory::new(1000.0);
        inv.update_on_fill(&buy_result("tok1", 0.5, 10.0));
        inv.update_on_fill(&buy_result("tok1", 0.6, 10.0));
        let pos = inv.positions.get("tok1").unwrap();
        assert_eq!(pos.size, 20.0);
        assert!((pos.avg_entry_price - 0.55).abs() < 1e-9);
        assert!((inv.balance - (1000.0 - 5.0 - 6.0)).abs() < 1e-9);
    }

    #[test]
    fn sell_to_zero_removes_position() {
        let mut inv = Inventory::new(1000.0);
        inv.update_on_fill(&buy_result("tok1", 0.5, 10.0));
        let mut sell = buy_result("tok1", 0.5, 10.0);
        sell.signal.side = Side::Sell;
        inv.update_on_fill(&sell);
        assert!(!inv.positions.contains_key("tok1"));
    }

    #[test]
    fn exposure_sums_by_market() {
        let mut inv = Inventory::new(1000.0);
        inv.update_on_fill(&buy_result("tok1", 0.5, 10.0));
        assert_eq!(inv.get_market_exposure("cond1"), 5.0);
        assert_eq!(inv.get_total_exposure(), 5.0);
        assert_eq!(inv.get_open_position_count(), 1);
    }
}
