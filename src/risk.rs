//! Risk Gate (C7): ordered checks, drawdown kill switch, cap-based
//! downsizing. `check_signal` never throws — it returns a [`Verdict`].

use crate::config::Config;
use crate::event_bus::{EventBus, EventType};
use crate::inventory::Inventory;
use crate::persistence::SqlitePersistence;
use crate::types::{Side, Signal};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Verdict {
    pub allowed: bool,
    pub adjusted_signal: Option<Signal>,
    pub reason: Option<String>,
}

impl Verdict {
    fn reject(reason: impl Into<String>) -> Self {
        Verdict { allowed: false, adjusted_signal: None, reason: Some(reason.into()) }
    }

    fn allow(signal: Signal) -> Self {
        Verdict { allowed: true, adjusted_signal: Some(signal), reason: None }
    }
}

/// Global kill-switch state: an atomic flag plus a watch channel so
/// strategies observe the halt promptly without polling.
pub struct DrawdownLatch {
    latched: AtomicBool,
    tx: watch::Sender<bool>,
}

impl DrawdownLatch {
    pub fn new() -> (Arc<Self>, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Arc::new(DrawdownLatch { latched: AtomicBool::new(false), tx }), rx)
    }

    pub fn is_latched(&self) -> bool {
        self.latched.load(Ordering::SeqCst)
    }

    pub fn latch(&self) {
        if !self.latched.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(true);
        }
    }

    /// Clears the latch, used only by the LP selector's stuck-position
    /// recovery path once every filled position has closed.
    pub fn clear(&self) {
        self.latched.store(false, Ordering::SeqCst);
        let _ = self.tx.send(false);
    }
}

pub struct RiskGate {
    config: Config,
    drawdown: Arc<DrawdownLatch>,
    db: SqlitePersistence,
    bus: EventBus,
}

impl RiskGate {
    pub fn new(config: Config, drawdown: Arc<DrawdownLatch>, db: SqlitePersistence, bus: EventBus) -> Self {
        RiskGate { config, drawdown, db, bus }
    }

    pub fn check_signal(&self, signal: &Signal, inventory: &Inventory) -> Verdict {
        // 1. Drawdown kill switch.
        if self.drawdown.is_latched() {
            return Verdict::reject("DRAWDOWN HALT");
        }
        let portfolio = inventory.balance + inventory.get_total_exposure();
        let drawdown_so_far = self.config.starting_balance_usd - portfolio;
        if portfolio <= self.config.starting_balance_usd - self.config.max_drawdown_usd {
            self.drawdown.latch();
            metrics::counter!("betterbot_drawdown_halts_total", 1);
            self.bus.publish(EventType::DrawdownHalt, json!({ "portfolio": portfolio }));
            return Verdict::reject("DRAWDOWN HALT");
        }
        if drawdown_so_far >= 0.80 * self.config.max_drawdown_usd {
            self.bus.publish(EventType::DrawdownWarning, json!({ "portfolio": portfolio }));
        }

        let mut signal = signal.clone();

        // 2. Per-trade size cap.
        if signal.notional() > self.config.max_trade_size_usd {
            signal = signal.with_size(self.config.max_trade_size_usd / signal.price);
        }

        // 3. Daily volume cap.
        let today_volume = self.db.get_daily_volume(None).unwrap_or(0.0);
        let remaining = self.config.daily_volume_cap_usd - today_volume;
        if remaining <= 0.0 {
            return Verdict::reject("daily volume cap reached");
        }
        if signal.notional() > remaining {
            signal = signal.with_size(remaining / signal.price);
        }

        // 4. Open-position count cap.
        if inventory.get_open_position_count() >= self.config.max_open_positions {
            return Verdict::reject("max open positions reached");
        }

        // 5. Per-market exposure (BUY only).
        if signal.side == Side::Buy {
            let market_exposure = inventory.get_market_exposure(&signal.condition_id);
            let remaining_market = self.config.max_per_market_usd - market_exposure;
            if signal.notional() > remaining_market {
                if remaining_market <= 0.0 {
                    return Verdict::reject("per-market exposure cap reached");
                }
                signal = signal.with_size(remaining_market / signal.price);
            }
        }

        // 6. Portfolio exposure.
        let portfolio_exposure = inventory.get_total_exposure();
        let remaining_portfolio = self.config.max_portfolio_exposure_usd - portfolio_exposure;
        if signal.notional() > remaining_portfolio {
            if remaining_portfolio <= 0.0 {
                return Verdict::reject("portfolio exposure cap reached");
            }
            signal = signal.with_size(remaining_portfolio / signal.price);
        }

        if signal.size <= 0.0 {
            warn!(strategy = ?signal.strategy, "risk_gate.downsized_to_zero");
            return Verdict::reject("downsized to zero");
        }

        Verdict::allow(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderType, StrategyTag};

    fn gate_with(config: Config) -> (RiskGate, Arc<DrawdownLatch>) {
        let (latch, _rx) = DrawdownLatch::new();
        let db = SqlitePersistence::open_in_memory().unwrap();
        let (bus, _rx2) = EventBus::new();
        (RiskGate::new(config, latch.clone(), db, bus), latch)
    }

    fn base_config() -> Config {
        Config {
            dry_run: true,
            starting_balance_usd: 500.0,
            max_drawdown_usd: 250.0,
            max_trade_size_usd: 25.0,
            daily_volume_cap_usd: 500.0,
            max_open_positions: 20,
            max_per_market_usd: 100.0,
            max_portfolio_exposure_usd: 800.0,
            arb_min_profit_cents: 0.5,
            arb_scan_interval_sec: 20.0,
            lp_order_size_usd: 10.0,
            lp_refresh_interval_sec: 60.0,
            lp_max_markets: 5,
            lp_min_daily_reward: 20.0,
            lp_min_estimated_reward: 0.5,
            lp_min_best_bid: 0.05,
            lp_stop_loss_pct: 0.05,
            lp_flip_order_size_usd: 25.0,
            lp_flip_scan_interval_sec: 45.0,
            lp_flip_poll_interval_sec: 15.0,
            lp_flip_max_resting_sec: 300.0,
            lp_flip_stop_loss_pct: 0.05,
            copy_traders: vec![],
            copy_scale_factor: 0.1,
            copy_poll_interval_sec: 30.0,
            copy_min_trade_usd: 5.0,
            copy_max_delay_sec: 10.0,
            synth_edge_threshold: 0.05,
            synth_assets: vec![],
            synth_poll_interval_sec: 60.0,
            synth_kelly_fraction: 0.25,
            timing_jitter_pct: 0.15,
            size_jitter_pct: 0.1,
            db_path: ":memory:".into(),
            log_level: "info".into(),
            tick_size: 0.01,
        }
    }

    fn buy_signal(price: f64, size: f64) -> Signal {
        Signal {
            strategy: StrategyTag::Liquidity,
            token_id: "tok1".into(),
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
        }
    }

    #[test]
    fn oversized_trade_is_downsized_to_cap() {
        let (gate, _latch) = gate_with(base_config());
        let inv = Inventory::new(500.0);
        let signal = buy_signal(0.5, 1000.0); // notional 500 >> 25 cap
        let verdict = gate.check_signal(&signal, &inv);
        assert!(verdict.allowed);
        let adjusted = verdict.adjusted_signal.unwrap();
        assert!(adjusted.notional() <= 25.0 + 1e-9);
    }

    #[test]
    fn drawdown_halt_rejects_and_latches() {
        let (gate, latch) = gate_with(base_config());
        let mut inv = Inventory::new(230.0);
        inv.positions.insert(
            "seed".into(),
            crate::types::Position {
                condition_id: "seed".into(),
                token_id: "seed".into(),
                outcome: "yes".into(),
                size: 1.0,
                avg_entry_price: 15.0,
                strategy: StrategyTag::Liquidity,
                opened_at: chrono::Utc::now(),
            },
        );
        // portfolio = 230 + 15 = 245 <= 500 - 250 = 250
        let signal = buy_signal(0.5, 1.0);
        let verdict = gate.check_signal(&signal, &inv);
        assert!(!verdict.allowed);
        assert_eq!(verdict.reason.as_deref(), Some("DRAWDOWN HALT"));
        assert!(latch.is_latched());

        let verdict2 = gate.check_signal(&signal, &inv);
        assert!(!verdict2.allowed);
    }

    #[test]
    fn per_market_exposure_downsizes_buy_not_sell() {
        let (gate, _latch) = gate_with(base_config());
        let mut inv = Inventory::new(500.0);
        inv.positions.insert(
            "tok1".into(),
            crate::types::Position {
                condition_id: "cond1".into(),
                token_id: "tok1".into(),
                outcome: "yes".into(),
                size: 180.0,
                avg_entry_price: 0.5, // exposure 90, remaining 10 of 100 cap
                strategy: StrategyTag::Liquidity,
                opened_at: chrono::Utc::now(),
            },
        );
        let signal = buy_signal(0.5, 40.0); // notional 20 > remaining 10
        let verdict = gate.check_signal(&signal, &inv);
        assert!(verdict.allowed);
        assert!(verdict.adjusted_signal.unwrap().notional() <= 10.0 + 1e-9);
    }
}
