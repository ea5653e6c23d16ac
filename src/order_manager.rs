//! Order Manager (C8): the single execution pipeline. Signal → risk → jitter
//! → execute → inventory → log → publish.

use crate::clock::jitter;
use crate::dry_run::execute_dry_run;
use crate::error::classify_exchange_error;
use crate::event_bus::{EventBus, EventType};
use crate::exchange::{ExchangeClient, OrderStatus};
use crate::inventory::Inventory;
use crate::persistence::SqlitePersistence;
use crate::risk::RiskGate;
use crate::types::{OrderResult, OrderType, Signal};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const MAX_BATCH: usize = 15;

pub struct OrderManager {
    risk_gate: RiskGate,
    exchange: Arc<dyn ExchangeClient>,
    db: SqlitePersistence,
    bus: EventBus,
    dry_run: bool,
    size_jitter_pct: f64,
}

impl OrderManager {
    pub fn new(
        risk_gate: RiskGate,
        exchange: Arc<dyn ExchangeClient>,
        db: SqlitePersistence,
        bus: EventBus,
        dry_run: bool,
        size_jitter_pct: f64,
    ) -> Self {
        OrderManager { risk_gate, exchange, db, bus, dry_run, size_jitter_pct }
    }

    /// Executes a single signal through the full pipeline. Returns `None`
    /// when the risk gate rejects the signal outright (no `OrderResult` is
    /// produced for a reject, matching the spec's "propagated as a failed
    /// OrderResult" wording only for execution-level failures).
    pub async fn execute_signal(&self, signal: Signal, inventory: &mut Inventory) -> Option<OrderResult> {
        let verdict = self.risk_gate.check_signal(&signal, inventory);
        if !verdict.allowed {
            info!(reason = ?verdict.reason, strategy = ?signal.strategy, "order_manager.risk_rejected");
            return None;
        }
        let mut signal = verdict.adjusted_signal.unwrap();
        signal.size = jitter(signal.size, self.size_jitter_pct);
        if signal.size <= 0.0 {
            return None;
        }

        let result = self.execute(signal).await;

        inventory.update_on_fill(&result);
        if let Err(e) = self.db.record_trade(&result) {
            error!(%e, "order_manager.persist_trade_failed");
        }
        if !result.is_resting {
            let volume = result.fill_price * result.fill_size;
            if let Err(e) = self.db.update_daily_volume(result.signal.strategy, volume, 0.0) {
                error!(%e, "order_manager.persist_volume_failed");
            }
        }

        self.bus.publish(
            EventType::TradeExecuted,
            json!({
                "strategy": result.signal.strategy.as_str(),
                "market": result.signal.market_question,
                "side": result.signal.side.as_str(),
                "price": result.fill_price,
                "size": result.fill_size,
                "is_resting": result.is_resting,
                "success": result.success,
                "balance": inventory.balance,
                "positions_value": inventory.get_total_exposure(),
            }),
        );

        Some(result)
    }

    async fn execute(&self, signal: Signal) -> OrderResult {
        if self.dry_run {
            return execute_dry_run(signal);
        }

        let placed = self
            .exchange
            .create_and_post_limit_order(
                &signal.token_id,
                signal.price,
                signal.size,
                signal.side,
                signal.order_type,
            )
            .await;

        match placed {
            Ok(p) => {
                let is_resting = p.status == OrderStatus::Live && signal.order_type == OrderType::Gtc;
                OrderResult {
                    success: true,
                    order_id: Some(p.id),
                    fill_price: if is_resting { 0.0 } else { p.fill_price },
                    fill_size: if is_resting { 0.0 } else { p.fill_size },
                    fee: p.fee,
                    error: None,
                    is_dry_run: false,
                    is_resting,
                    signal,
                }
            }
            Err(e) => {
                let kind = classify_exchange_error(&e);
                warn!(error = %kind, strategy = ?signal.strategy, "order_manager.execute_failed");
                OrderResult {
                    success: false,
                    order_id: None,
                    fill_price: 0.0,
                    fill_size: 0.0,
                    fee: 0.0,
                    error: Some(e.to_string()),
                    is_dry_run: false,
                    is_resting: false,
                    signal,
                }
            }
        }
    }

    /// Executes at most `MAX_BATCH` signals serially, preserving order.
    pub async fn execute_batch(&self, signals: Vec<Signal>, inventory: &mut Inventory) -> Vec<OrderResult> {
        let mut results = Vec::new();
        for signal in signals.into_iter().take(MAX_BATCH) {
            if let Some(r) = self.execute_signal(signal, inventory).await {
                results.push(r);
            }
        }
        results
    }

    pub async fn cancel_order(&self, order_id: &str) -> anyhow::Result<()> {
        self.exchange.cancel_order(order_id).await
    }

    pub async fn cancel_all_orders(&self) -> anyhow::Result<u32> {
        self.exchange.cancel_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::exchange::PaperExchangeClient;
    use crate::risk::DrawdownLatch;
    use crate::types::{Side, StrategyTag};

    fn test_config() -> Config {
        let mut cfg = Config::from_env().unwrap();
        cfg.dry_run = true;
        cfg.max_trade_size_usd = 1000.0;
        cfg.daily_volume_cap_usd = 1000.0;
        cfg.max_portfolio_exposure_usd = 1000.0;
        cfg.max_per_market_usd = 1000.0;
        cfg.size_jitter_pct = 0.0;
        cfg
    }

    fn make_manager() -> (OrderManager, Inventory) {
        let cfg = test_config();
        let db = SqlitePersistence::open_in_memory().unwrap();
        let (bus, _rx) = EventBus::new();
        let (latch, _wrx) = DrawdownLatch::new();
        let gate = RiskGate::new(cfg.clone(), latch, db.clone(), bus.clone());
        let exchange: Arc<dyn ExchangeClient> = Arc::new(PaperExchangeClient::new(cfg.starting_balance_usd));
        let manager = OrderManager::new(gate, exchange, db, bus, true, 0.0);
        (manager, Inventory::new(cfg.starting_balance_usd))
    }

    fn signal() -> Signal {
        Signal {
            strategy: StrategyTag::Arbitrage,
            token_id: "tok1".into(),
            condition_id: "cond1".into(),
            side: Side::Buy,
            price: 0.5,
            size: 10.0,
            order_type: OrderType::Fok,
            edge: Some(0.03),
            confidence: None,
            reason: "test".into(),
            market_question: "q".into(),
            outcome_side: None,
        }
    }

    #[tokio::test]
    async fn dry_run_signal_updates_inventory() {
        let (manager, mut inv) = make_manager();
        let starting = inv.balance;
        let result = manager.execute_signal(signal(), &mut inv).await.unwrap();
        assert!(result.success);
        assert!(result.is_dry_run);
        assert_eq!(inv.balance, starting - 5.0);
    }

    #[tokio::test]
    async fn batch_caps_at_max_batch() {
        let (manager, mut inv) = make_manager();
        let signals: Vec<Signal> = (0..20).map(|_| signal()).collect();
        let results = manager.execute_batch(signals, &mut inv).await;
        assert_eq!(results.len(), MAX_BATCH);
    }
}
