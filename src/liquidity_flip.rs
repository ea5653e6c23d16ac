//! LP Flip State Machine (C12): buy one side, wait for fill, then buy the
//! opposite side (same shares, behind its best bid) to form a pair that
//! redeems at $1 on resolution, capturing the spread plus accrued rewards.

use crate::config::Config;
use crate::event_bus::{EventBus, EventType};
use crate::exchange::{AssetType, ExchangeClient};
use crate::math::{reward_score, round_to_tick};
use crate::persistence::SqlitePersistence;
use crate::types::{FlipCycle, FlipStatus, Market, OrderType, Side, StrategyTag};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlipPhase {
    Idle,
    RestingEntry,
    RestingExit,
}

pub struct LiquidityFlip {
    exchange: Arc<dyn ExchangeClient>,
    db: SqlitePersistence,
    bus: EventBus,
    config: Config,
    phase: Mutex<FlipPhase>,
    cycle: Mutex<Option<FlipCycle>>,
}

impl LiquidityFlip {
    pub fn new(exchange: Arc<dyn ExchangeClient>, db: SqlitePersistence, bus: EventBus, config: Config) -> Self {
        LiquidityFlip { exchange, db, bus, config, phase: Mutex::new(FlipPhase::Idle), cycle: Mutex::new(None) }
    }

    /// The state-machine loop, run as its own supervised task rather than
    /// through the generic scan/signal pipeline: each phase drives its own
    /// exchange interaction directly, matching the source's dedicated `run()`
    /// override. On any error, resets to IDLE with a 60s cooldown.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let phase = *self.phase.lock().await;
            let result = match phase {
                FlipPhase::Idle => self.do_idle().await,
                FlipPhase::RestingEntry => self.do_resting_entry().await,
                FlipPhase::RestingExit => self.do_resting_exit().await,
            };
            if let Err(e) = result {
                warn!(%e, "lp_flip.strategy_error");
                self.bus.publish(EventType::StrategyError, json!({"strategy": "lp_flip", "error": e.to_string()}));
                *self.phase.lock().await = FlipPhase::Idle;
                *self.cycle.lock().await = None;
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            tokio::select! {
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(Duration::from_millis(1)) => {}
            }
        }
        self.on_shutdown().await;
    }

    async fn on_shutdown(&self) {
        if let Some(cycle) = self.cycle.lock().await.as_ref() {
            let _ = self.exchange.cancel_order(&cycle.entry_order_id).await;
        }
    }

    async fn do_idle(&self) -> anyhow::Result<()> {
        let interval = crate::clock::jitter_duration(self.config.lp_flip_scan_interval_sec, self.config.timing_jitter_pct);
        tokio::time::sleep(interval).await;

        let ranked = self.rank_markets().await?;
        self.bus.publish(EventType::MarketScanned, json!({"strategy": "lp_flip", "count": ranked.len()}));

        for market in &ranked {
            if let Some(cycle) = self.try_entry(market).await? {
                let db_id = self.db.insert_flip_cycle(&cycle).unwrap_or(0);
                let mut cycle = cycle;
                cycle.db_id = Some(db_id);

                info!(market = %market.question, side = %cycle.entry_side, price = cycle.entry_price, "lp_flip.entry_placed");
                self.bus.publish(
                    EventType::TradeExecuted,
                    json!({"strategy": "lp_flip", "market": market.question, "side": "BUY", "price": cycle.entry_price, "size": cycle.entry_shares, "is_resting": true, "success": true}),
                );

                *self.cycle.lock().await = Some(cycle);
                *self.phase.lock().await = FlipPhase::RestingEntry;
                return Ok(());
            }
        }
        info!(tried = ranked.len(), "lp_flip.no_viable_entry");
        Ok(())
    }

    async fn rank_markets(&self) -> anyhow::Result<Vec<Market>> {
        let raw = self.exchange.get_reward_markets().await?;
        let mut markets: Vec<Market> = raw
            .into_iter()
            .map(Market::from)
            .filter(|m| {
                if !m.active || m.max_incentive_spread <= 0.0 || m.tokens.len() < 2 {
                    return false;
                }
                if m.daily_reward_usd < self.config.lp_min_daily_reward {
                    return false;
                }
                if let Some(days) = m.days_until_end() {
                    if days < 3.0 {
                        return false;
                    }
                }
                true
            })
            .collect();
        markets.sort_by(|a, b| b.daily_reward_usd.partial_cmp(&a.daily_reward_usd).unwrap());
        Ok(markets)
    }

    async fn try_entry(&self, market: &Market) -> anyhow::Result<Option<FlipCycle>> {
        for side in ["yes", "no"] {
            let token = match market.token(side) {
                Some(t) => t,
                None => continue,
            };
            if let Some(cycle) = self.try_entry_side(market, side, &token.token_id).await? {
                return Ok(Some(cycle));
            }
        }
        Ok(None)
    }

    async fn try_entry_side(&self, market: &Market, side: &str, token_id: &str) -> anyhow::Result<Option<FlipCycle>> {
        let book = self.exchange.get_order_book(token_id).await?;
        let mid = match book.midpoint() {
            Some(m) => m,
            None => return Ok(None),
        };
        if !(0.10..=0.90).contains(&mid) {
            return Ok(None);
        }
        let best_bid = match book.best_bid() {
            Some(b) => b,
            None => return Ok(None),
        };
        if best_bid < self.config.lp_min_best_bid {
            return Ok(None);
        }

        let mut price = if book.bids.len() >= 2 {
            book.bids[1].price
        } else {
            round_to_tick(best_bid - self.config.tick_size, self.config.tick_size)
        };
        if price <= 0.01 || price >= 0.99 {
            return Ok(None);
        }

        let mut spread_from_mid = (mid - price).abs();
        if spread_from_mid > market.max_incentive_spread {
            price = round_to_tick(mid - market.max_incentive_spread + self.config.tick_size, self.config.tick_size);
            if price <= 0.01 {
                return Ok(None);
            }
            spread_from_mid = (mid - price).abs();
        }

        let size_shares = self.config.lp_flip_order_size_usd / price;

        let total_q: f64 = book
            .bids
            .iter()
            .filter(|lvl| (mid - lvl.price).abs() <= market.max_incentive_spread)
            .map(|lvl| reward_score(market.max_incentive_spread, (mid - lvl.price).abs(), lvl.size))
            .sum();
        let our_q = reward_score(market.max_incentive_spread, spread_from_mid, size_shares);
        let pool_share = if total_q + our_q > 0.0 { our_q / (total_q + our_q) } else { 0.0 };
        let estimated_daily = market.daily_reward_usd * pool_share;
        if estimated_daily < self.config.lp_min_estimated_reward {
            return Ok(None);
        }

        let placed = self
            .exchange
            .create_and_post_limit_order(token_id, price, size_shares, Side::Buy, OrderType::Gtc)
            .await?;

        Ok(Some(FlipCycle {
            db_id: None,
            condition_id: market.condition_id.clone(),
            market_question: market.question.clone(),
            entry_side: side.to_string(),
            entry_token_id: token_id.to_string(),
            entry_price: price,
            entry_shares: size_shares,
            entry_order_id: placed.id,
            entry_placed_at: Instant::now(),
            exit_side: None,
            exit_token_id: None,
            exit_price: None,
            exit_shares: None,
            exit_order_id: None,
            status: FlipStatus::Open,
        }))
    }

    async fn do_resting_entry(&self) -> anyhow::Result<()> {
        let interval = crate::clock::jitter_duration(self.config.lp_flip_poll_interval_sec, self.config.timing_jitter_pct);
        tokio::time::sleep(interval).await;

        let cycle = match self.cycle.lock().await.clone() {
            Some(c) => c,
            None => {
                *self.phase.lock().await = FlipPhase::Idle;
                return Ok(());
            }
        };

        if cycle.entry_placed_at.elapsed().as_secs_f64() > self.config.lp_flip_max_resting_sec {
            info!(market = %cycle.market_question, "lp_flip.entry_stale");
            let _ = self.exchange.cancel_order(&cycle.entry_order_id).await;
            if let Some(id) = cycle.db_id {
                let _ = self.db.update_flip_status(id, "cancelled");
            }
            *self.phase.lock().await = FlipPhase::Idle;
            *self.cycle.lock().await = None;
            return Ok(());
        }

        if !self.is_order_filled(&cycle.entry_order_id).await? {
            return Ok(());
        }

        info!(market = %cycle.market_question, side = %cycle.entry_side, "lp_flip.entry_filled");
        if let Some(id) = cycle.db_id {
            let _ = self.db.mark_flip_entry_filled(id);
        }
        let volume = cycle.entry_price * cycle.entry_shares;
        let _ = self.db.update_daily_volume(StrategyTag::LpFlip, volume, 0.0);
        self.bus.publish(
            EventType::TradeExecuted,
            json!({"strategy": "lp_flip", "market": cycle.market_question, "side": "BUY", "price": cycle.entry_price, "size": cycle.entry_shares, "is_resting": false, "success": true}),
        );

        match self.place_exit_order(&cycle).await {
            Ok(updated) => {
                *self.cycle.lock().await = Some(updated);
                *self.phase.lock().await = FlipPhase::RestingExit;
            }
            Err(e) => {
                warn!(%e, "lp_flip.exit_place_failed");
                self.emergency_exit(&cycle).await?;
                if let Some(id) = cycle.db_id {
                    let _ = self.db.update_flip_status(id, "error");
                }
                *self.phase.lock().await = FlipPhase::Idle;
                *self.cycle.lock().await = None;
            }
        }
        Ok(())
    }

    async fn place_exit_order(&self, cycle: &FlipCycle) -> anyhow::Result<FlipCycle> {
        let reward_markets = self.exchange.get_reward_markets().await?;
        let opposite_outcome = if cycle.entry_side == "yes" { "No" } else { "Yes" };
        let opposite_token_id = reward_markets
            .iter()
            .find(|m| m.condition_id == cycle.condition_id)
            .and_then(|m| m.tokens.iter().find(|t| t.outcome == opposite_outcome))
            .map(|t| t.token_id.clone());

        let opposite_token_id = match opposite_token_id {
            Some(t) => t,
            None => anyhow::bail!("opposite token not found for {}", cycle.condition_id),
        };

        let book = self.exchange.get_order_book(&opposite_token_id).await?;
        let best_bid = book.best_bid().ok_or_else(|| anyhow::anyhow!("no bids for opposite side"))?;
        let price = if book.bids.len() >= 2 {
            book.bids[1].price
        } else {
            round_to_tick(best_bid - self.config.tick_size, self.config.tick_size)
        };
        if price <= 0.01 || price >= 0.99 {
            anyhow::bail!("exit price out of band");
        }

        let exit_side = if cycle.entry_side == "yes" { "no" } else { "yes" };
        let placed = self
            .exchange
            .create_and_post_limit_order(&opposite_token_id, price, cycle.entry_shares, Side::Buy, OrderType::Gtc)
            .await?;

        if let Some(id) = cycle.db_id {
            let _ = self.db.update_flip_exit(id, exit_side, &opposite_token_id, price, cycle.entry_shares, &placed.id);
        }
        self.bus.publish(
            EventType::TradeExecuted,
            json!({"strategy": "lp_flip", "market": cycle.market_question, "side": "BUY", "price": price, "size": cycle.entry_shares, "is_resting": true, "success": true}),
        );

        let mut updated = cycle.clone();
        updated.exit_side = Some(exit_side.to_string());
        updated.exit_token_id = Some(opposite_token_id);
        updated.exit_price = Some(price);
        updated.exit_shares = Some(cycle.entry_shares);
        updated.exit_order_id = Some(placed.id);
        Ok(updated)
    }

    async fn do_resting_exit(&self) -> anyhow::Result<()> {
        let interval = crate::clock::jitter_duration(self.config.lp_flip_poll_interval_sec, self.config.timing_jitter_pct);
        tokio::time::sleep(interval).await;

        let cycle = match self.cycle.lock().await.clone() {
            Some(c) => c,
            None => {
                *self.phase.lock().await = FlipPhase::Idle;
                return Ok(());
            }
        };

        let current_price = self.exchange.get_price(&cycle.entry_token_id, Side::Sell).await.unwrap_or(0.0);
        if current_price > 0.0 && cycle.entry_price > 0.0 {
            let loss_pct = (cycle.entry_price - current_price) / cycle.entry_price;
            if loss_pct >= self.config.lp_flip_stop_loss_pct {
                warn!(market = %cycle.market_question, loss_pct, "lp_flip.stop_loss_triggered");
                if let Some(exit_id) = &cycle.exit_order_id {
                    let _ = self.exchange.cancel_order(exit_id).await;
                }
                self.emergency_exit(&cycle).await?;
                let profit = (current_price - cycle.entry_price) * cycle.entry_shares;
                self.complete_cycle(&cycle, profit, FlipStatus::StopLoss).await;
                return Ok(());
            }
        }

        let exit_order_id = match &cycle.exit_order_id {
            Some(id) => id.clone(),
            None => {
                *self.phase.lock().await = FlipPhase::Idle;
                *self.cycle.lock().await = None;
                return Ok(());
            }
        };

        if !self.is_order_filled(&exit_order_id).await? {
            return Ok(());
        }

        info!(market = %cycle.market_question, "lp_flip.exit_filled");
        let entry_cost = cycle.entry_price * cycle.entry_shares;
        let exit_price = cycle.exit_price.unwrap_or(0.0);
        let exit_shares = cycle.exit_shares.unwrap_or(0.0);
        let exit_cost = exit_price * exit_shares;
        let redeemable = cycle.entry_shares.min(exit_shares);
        let profit = redeemable - entry_cost - exit_cost;

        let volume = exit_price * exit_shares;
        let _ = self.db.update_daily_volume(StrategyTag::LpFlip, volume, profit);

        self.complete_cycle(&cycle, profit, FlipStatus::Completed).await;
        Ok(())
    }

    async fn complete_cycle(&self, cycle: &FlipCycle, profit: f64, status: FlipStatus) {
        if let Some(id) = cycle.db_id {
            let _ = self.db.complete_flip_cycle(id, profit, status.as_str());
        }
        info!(market = %cycle.market_question, profit, status = status.as_str(), "lp_flip.cycle_complete");
        *self.phase.lock().await = FlipPhase::Idle;
        *self.cycle.lock().await = None;
    }

    async fn is_order_filled(&self, order_id: &str) -> anyhow::Result<bool> {
        if order_id.is_empty() {
            return Ok(false);
        }
        let open = self.exchange.get_open_orders().await?;
        Ok(!open.iter().any(|o| o.id == order_id))
    }

    /// Approves the conditional token allowance and sells at an aggressive
    /// discount for immediate fill — correctness over execution price.
    async fn emergency_exit(&self, cycle: &FlipCycle) -> anyhow::Result<()> {
        self.exchange.update_balance_allowance(AssetType::Conditional, &cycle.entry_token_id).await?;
        let balance_units = self.exchange.get_balance_allowance(AssetType::Conditional, &cycle.entry_token_id).await?;
        let actual_balance = (balance_units as f64) / 1_000_000.0;
        let sell_shares = cycle.entry_shares.min(actual_balance);
        if sell_shares < 1.0 {
            return Ok(());
        }
        let current = self.exchange.get_price(&cycle.entry_token_id, Side::Sell).await.unwrap_or(cycle.entry_price);
        let sell_price = round_to_tick(current * 0.5, self.config.tick_size).max(0.01);
        self.exchange
            .create_and_post_limit_order(&cycle.entry_token_id, sell_price, sell_shares, Side::Sell, OrderType::Gtc)
            .await?;
        info!(token = %cycle.entry_token_id, shares = sell_shares, price = sell_price, "lp_flip.emergency_sold");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::PaperExchangeClient;
    use crate::types::{BookLevel, OrderBook, RewardMarket, TokenInfo};

    fn config() -> Config {
        let mut cfg = Config::from_env().unwrap();
        cfg.lp_flip_order_size_usd = 25.0;
        cfg.lp_flip_stop_loss_pct = 0.05;
        cfg.lp_min_best_bid = 0.05;
        cfg.lp_min_daily_reward = 20.0;
        cfg.lp_min_estimated_reward = 0.0;
        cfg
    }

    fn flip() -> (Arc<PaperExchangeClient>, LiquidityFlip) {
        let client = Arc::new(PaperExchangeClient::new(1000.0));
        let db = SqlitePersistence::open_in_memory().unwrap();
        let (bus, _rx) = EventBus::new();
        let flip = LiquidityFlip::new(client.clone(), db, bus, config());
        (client, flip)
    }

    #[tokio::test]
    async fn entry_side_selected_from_reward_market() {
        let (client, flip) = flip();
        client.seed_reward_markets(vec![RewardMarket {
            condition_id: "cond1".into(),
            question: "q".into(),
            tokens: vec![
                TokenInfo { token_id: "yes".into(), outcome: "Yes".into(), price: 0.5 },
                TokenInfo { token_id: "no".into(), outcome: "No".into(), price: 0.5 },
            ],
            active: true,
            daily_reward_usd: 50.0,
            rewards_max_spread: 0.05,
            rewards_min_size: 10.0,
            end_date: None,
        }]);
        client.seed_book(
            "yes",
            OrderBook {
                token_id: "yes".into(),
                bids: vec![BookLevel { price: 0.5, size: 100.0 }, BookLevel { price: 0.49, size: 50.0 }],
                asks: vec![BookLevel { price: 0.52, size: 100.0 }],
            },
        );

        let markets = flip.rank_markets().await.unwrap();
        assert_eq!(markets.len(), 1);
        let cycle = flip.try_entry(&markets[0]).await.unwrap().unwrap();
        assert_eq!(cycle.entry_side, "yes");
        assert_eq!(cycle.entry_price, 0.49);
    }

    #[tokio::test]
    async fn completed_cycle_profit_matches_spec_example() {
        let (_client, flip) = flip();
        let cycle = FlipCycle {
            db_id: None,
            condition_id: "cond1".into(),
            market_question: "q".into(),
            entry_side: "yes".into(),
            entry_token_id: "yes".into(),
            entry_price: 0.48,
            entry_shares: 50.0,
            entry_order_id: "o1".into(),
            entry_placed_at: Instant::now(),
            exit_side: Some("no".into()),
            exit_token_id: Some("no".into()),
            exit_price: Some(0.46),
            exit_shares: Some(50.0),
            exit_order_id: Some("o2".into()),
            status: FlipStatus::Open,
        };
        let entry_cost = cycle.entry_price * cycle.entry_shares;
        let exit_cost = cycle.exit_price.unwrap() * cycle.exit_shares.unwrap();
        let redeemable = cycle.entry_shares.min(cycle.exit_shares.unwrap());
        let profit = redeemable - entry_cost - exit_cost;
        assert!((profit - 3.0).abs() < 1e-9);
        let _ = &flip;
    }
}
