//! LP Selector + Smart-Refresh (C11) — the densest subsystem. Earns
//! liquidity-provider rewards by keeping one resting bid per selected market
//! within the reward-eligible spread band, switching sides after a fill,
//! and bounding downside on filled inventory.

use crate::config::Config;
use crate::event_bus::{EventBus, EventType};
use crate::exchange::ExchangeClient;
use crate::inventory::Inventory;
use crate::math::{reward_score, round_to_tick};
use crate::risk::DrawdownLatch;
use crate::strategy::Strategy;
use crate::types::{Market, OrderType, Side, Signal, StrategyTag};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

const FILL_COOLDOWN: Duration = Duration::from_secs(30 * 60);
const MONITOR_INTERVAL: Duration = Duration::from_secs(30);
const TAKE_PROFIT_PCT: f64 = 0.50;

#[derive(Debug, Clone)]
struct LiveOrder {
    order_id: String,
    price: f64,
    token_id: String,
    side: String,
    shares: f64,
}

#[derive(Debug, Clone)]
struct FilledPosition {
    token_id: String,
    condition_id: String,
    fill_price: f64,
    shares: f64,
}

struct LpState {
    market_sides: HashMap<String, String>,
    live_orders: HashMap<String, LiveOrder>,
    filled_positions: HashMap<String, FilledPosition>,
    cooldowns: HashMap<String, Instant>,
    mid_history: HashMap<String, Vec<f64>>,
    halted: bool,
    seeded_legacy: bool,
}

pub struct LpSelector {
    exchange: Arc<dyn ExchangeClient>,
    bus: EventBus,
    drawdown: Arc<DrawdownLatch>,
    config: Config,
    state: Mutex<LpState>,
    scan_interval: Duration,
}

impl LpSelector {
    pub fn new(exchange: Arc<dyn ExchangeClient>, bus: EventBus, drawdown: Arc<DrawdownLatch>, config: Config) -> Self {
        let scan_interval = crate::clock::jitter_duration(config.lp_refresh_interval_sec, config.timing_jitter_pct);
        LpSelector {
            exchange,
            bus,
            drawdown,
            config,
            state: Mutex::new(LpState {
                market_sides: HashMap::new(),
                live_orders: HashMap::new(),
                filled_positions: HashMap::new(),
                cooldowns: HashMap::new(),
                mid_history: HashMap::new(),
                halted: false,
                seeded_legacy: false,
            }),
            scan_interval,
        }
    }

    fn passes_filters(&self, m: &Market, cooldowns: &HashMap<String, Instant>) -> bool {
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
        if let Some(until) = cooldowns.get(&m.condition_id) {
            if until.elapsed() < FILL_COOLDOWN {
                return false;
            }
        }
        true
    }

    async fn rank_markets(&self) -> anyhow::Result<Vec<Market>> {
        let raw = self.exchange.get_reward_markets().await?;
        let state = self.state.lock().await;
        let mut markets: Vec<Market> =
            raw.into_iter().map(Market::from).filter(|m| self.passes_filters(m, &state.cooldowns)).collect();
        drop(state);
        markets.sort_by(|a, b| b.daily_reward_usd.partial_cmp(&a.daily_reward_usd).unwrap());
        Ok(markets)
    }

    /// Implements the 8-step `quote_or_keep` procedure. Returns `Some(Signal)`
    /// for a new/replacement quote, or `None` if keeping the existing order
    /// or skipping the market.
    async fn quote_or_keep(&self, market: &Market) -> anyhow::Result<Option<Signal>> {
        let state = self.state.lock().await;
        let side = state.market_sides.get(&market.condition_id).cloned().unwrap_or_else(|| "yes".to_string());
        drop(state);

        for candidate_side in [side.clone(), if side == "yes" { "no".into() } else { "yes".into() }] {
            if let Some(signal) = self.try_quote_side(market, &candidate_side).await? {
                return Ok(Some(signal));
            }
            // only fall back to the other side once, per the two-sided-required rule
            if candidate_side != side {
                break;
            }
        }
        Ok(None)
    }

    async fn try_quote_side(&self, market: &Market, side: &str) -> anyhow::Result<Option<Signal>> {
        let token = match market.token(side) {
            Some(t) => t,
            None => return Ok(None),
        };
        let book = self.exchange.get_order_book(&token.token_id).await?;
        let mid = match book.midpoint() {
            Some(m) => m,
            None => return Ok(None),
        };

        {
            let mut state = self.state.lock().await;
            let history = state.mid_history.entry(market.condition_id.clone()).or_default();
            history.push(mid);
            if history.len() > 10 {
                history.remove(0);
            }
            if let (Some(lo), Some(hi)) =
                (history.iter().cloned().reduce(f64::min), history.iter().cloned().reduce(f64::max))
            {
                if hi - lo > 0.05 {
                    warn!(market = %market.question, "liquidity.volatility_warning");
                }
            }
        }

        // Two-sided-required zone: skip (not allow) below 0.10 / above 0.90.
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

        // Smart refresh — anti-manipulation rule.
        {
            let state = self.state.lock().await;
            if let Some(existing) = state.live_orders.get(&market.condition_id) {
                if existing.side == side && (mid - existing.price).abs() <= market.max_incentive_spread {
                    return Ok(None); // keep
                }
            }
        }

        let mut price = if book.bids.len() >= 2 { book.bids[1].price } else { round_to_tick(best_bid - self.config.tick_size, self.config.tick_size) };
        if price <= 0.01 || price >= 0.99 {
            return Ok(None);
        }

        if (mid - price).abs() > market.max_incentive_spread {
            price = round_to_tick(mid - market.max_incentive_spread + self.config.tick_size, self.config.tick_size);
            if price <= 0.01 {
                return Ok(None);
            }
        }
        let spread_from_mid = (mid - price).abs();

        let size_usd = self.config.lp_order_size_usd;
        let min_shares_floor = market.min_incentive_size / (1.0 - self.config.size_jitter_pct).max(1e-6);
        let shares = (size_usd / price).max(min_shares_floor);
        if shares * price > self.config.max_per_market_usd {
            return Ok(None);
        }

        let total_q: f64 = book
            .bids
            .iter()
            .filter(|lvl| (mid - lvl.price).abs() <= market.max_incentive_spread)
            .map(|lvl| reward_score(market.max_incentive_spread, (mid - lvl.price).abs(), lvl.size))
            .sum();
        let our_q = reward_score(market.max_incentive_spread, spread_from_mid, shares);
        let pool_share = if total_q + our_q > 0.0 { our_q / (total_q + our_q) } else { 0.0 };
        let estimated_daily = market.daily_reward_usd * pool_share;
        if estimated_daily < self.config.lp_min_estimated_reward {
            return Ok(None);
        }

        Ok(Some(Signal {
            strategy: StrategyTag::Liquidity,
            token_id: token.token_id.clone(),
            condition_id: market.condition_id.clone(),
            side: Side::Buy,
            price,
            size: shares,
            order_type: OrderType::Gtc,
            edge: None,
            confidence: None,
            reason: "lp reward quote".into(),
            market_question: market.question.clone(),
            outcome_side: Some(side.to_string()),
        }))
    }

    /// Registers a placed quote so the smart-refresh rule and fill detector
    /// can track it. Call after the order manager reports success, with the
    /// outcome side (`"yes"`/`"no"`) the quote was placed on.
    pub async fn record_live_order(&self, signal: &Signal, side: &str, order_id: String) {
        let mut state = self.state.lock().await;
        state.market_sides.insert(signal.condition_id.clone(), side.to_string());
        state.live_orders.insert(
            signal.condition_id.clone(),
            LiveOrder {
                order_id,
                price: signal.price,
                token_id: signal.token_id.clone(),
                side: side.to_string(),
                shares: signal.size,
            },
        );
    }

    /// Seeds `filled_positions` from existing inventory on first run so
    /// pre-existing holdings are subject to stop-loss.
    pub async fn seed_legacy_positions(&self, inventory: &Inventory) {
        let mut state = self.state.lock().await;
        if state.seeded_legacy {
            return;
        }
        for p in inventory.positions.values() {
            state.filled_positions.insert(
                p.condition_id.clone(),
                FilledPosition {
                    token_id: p.token_id.clone(),
                    condition_id: p.condition_id.clone(),
                    fill_price: p.avg_entry_price,
                    shares: p.size,
                },
            );
        }
        state.seeded_legacy = true;
    }

    /// The parallel monitor loop: fill detection plus stop-loss/take-profit
    /// exit checks. Runs on a fixed 30-second cadence independent of scan.
    pub async fn run_monitor(self: Arc<Self>) {
        loop {
            tokio::time::sleep(MONITOR_INTERVAL).await;
            if let Err(e) = self.monitor_tick().await {
                warn!(%e, "liquidity.monitor_tick_failed");
            }
        }
    }

    async fn monitor_tick(&self) -> anyhow::Result<()> {
        self.detect_fills().await?;
        self.check_exits().await?;

        let still_stuck = { !self.state.lock().await.filled_positions.is_empty() };
        let was_halted = { self.state.lock().await.halted };
        if was_halted && !still_stuck {
            self.state.lock().await.halted = false;
            self.drawdown.clear();
            info!("liquidity.halt_recovered");
        }
        Ok(())
    }

    async fn detect_fills(&self) -> anyhow::Result<()> {
        let open_orders = self.exchange.get_open_orders().await?;
        let open_ids: std::collections::HashSet<&str> = open_orders.iter().map(|o| o.id.as_str()).collect();

        let filled_cids: Vec<String> = {
            let state = self.state.lock().await;
            state
                .live_orders
                .iter()
                .filter(|(_, o)| !open_ids.contains(o.order_id.as_str()))
                .map(|(cid, _)| cid.clone())
                .collect()
        };

        for cid in filled_cids {
            let order = {
                let mut state = self.state.lock().await;
                state.live_orders.remove(&cid)
            };
            let order = match order {
                Some(o) => o,
                None => continue,
            };

            {
                let mut state = self.state.lock().await;
                state.filled_positions.insert(
                    cid.clone(),
                    FilledPosition {
                        token_id: order.token_id.clone(),
                        condition_id: cid.clone(),
                        fill_price: order.price,
                        shares: order.shares,

                    },
                );
                let flipped = if order.side == "yes" { "no" } else { "yes" };
                state.market_sides.insert(cid.clone(), flipped.to_string());
                state.cooldowns.insert(cid.clone(), Instant::now());
            }

            self.bus.publish(
                EventType::TradeExecuted,
                json!({"strategy": "liquidity", "condition_id": cid, "is_resting": false, "success": true}),
            );
            info!(condition_id = %cid, "liquidity.fill_detected");
        }
        Ok(())
    }

    async fn check_exits(&self) -> anyhow::Result<()> {
        let positions: Vec<FilledPosition> = {
            let state = self.state.lock().await;
            state.filled_positions.values().cloned().collect()
        };

        for pos in positions {
            let current = match self.exchange.get_price(&pos.token_id, Side::Sell).await {
                Ok(p) => p,
                Err(_) => continue,
            };
            if pos.fill_price <= 0.0 {
                continue;
            }
            let change_pct = (current - pos.fill_price) / pos.fill_price;

            let should_exit = change_pct <= -self.config.lp_stop_loss_pct || change_pct >= TAKE_PROFIT_PCT;
            if !should_exit {
                continue;
            }

            match self.exit_sell(&pos).await {
                Ok(()) => {
                    self.state.lock().await.filled_positions.remove(&pos.condition_id);
                    info!(condition_id = %pos.condition_id, change_pct, "liquidity.exit_complete");
                }
                Err(e) => {
                    warn!(%e, condition_id = %pos.condition_id, "liquidity.auto_close_failed");
                    let mut state = self.state.lock().await;
                    state.halted = true;
                    drop(state);
                    self.drawdown.latch();
                    let _ = self.exchange.cancel_all().await;
                    self.bus.publish(
                        EventType::DrawdownHalt,
                        json!({"reason": "lp_auto_close_failed", "condition_id": pos.condition_id}),
                    );
                }
            }
        }
        Ok(())
    }

    /// Exit sell algorithm: approve allowance, query actual balance, FOK-step
    /// the price down by one tick on rejection until success or price < 0.01.
    async fn exit_sell(&self, pos: &FilledPosition) -> anyhow::Result<()> {
        use crate::exchange::AssetType;

        self.exchange.update_balance_allowance(AssetType::Conditional, &pos.token_id).await?;
        let balance_units = self.exchange.get_balance_allowance(AssetType::Conditional, &pos.token_id).await?;
        let actual_balance = (balance_units as f64) / 1_000_000.0;
        let sell_shares = pos.shares.min(actual_balance);
        if sell_shares < 1.0 {
            return Ok(());
        }

        let book = self.exchange.get_order_book(&pos.token_id).await?;
        let mut price = book.best_bid().map(|b| round_to_tick(b, self.config.tick_size)).unwrap_or_else(|| round_to_tick(pos.fill_price, self.config.tick_size));

        loop {
            if price < 0.01 {
                anyhow::bail!("exit sell exhausted price steps");
            }
            let result = self
                .exchange
                .create_and_post_limit_order(&pos.token_id, price, sell_shares, Side::Sell, OrderType::Fok)
                .await;
            match result {
                Ok(_) => return Ok(()),
                Err(_) => {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    price = round_to_tick(price - self.config.tick_size, self.config.tick_size);
                }
            }
        }
    }

    /// Cancels resting orders in markets that dropped out of the ranked
    /// target set (no longer reward-eligible, inactive, or filtered out).
    async fn cancel_stale_orders(&self, ranked: &[Market]) {
        let target_cids: std::collections::HashSet<&str> = ranked.iter().map(|m| m.condition_id.as_str()).collect();
        let stale: Vec<(String, String)> = {
            let state = self.state.lock().await;
            state
                .live_orders
                .iter()
                .filter(|(cid, _)| !target_cids.contains(cid.as_str()))
                .map(|(cid, o)| (cid.clone(), o.order_id.clone()))
                .collect()
        };
        for (cid, order_id) in stale {
            match self.exchange.cancel_order(&order_id).await {
                Ok(()) => {
                    self.state.lock().await.live_orders.remove(&cid);
                    info!(condition_id = %cid, "liquidity.cancelled_stale_order");
                }
                Err(e) => warn!(%e, condition_id = %cid, "liquidity.cancel_stale_failed"),
            }
        }
    }
}

#[async_trait]
impl Strategy for LpSelector {
    fn name(&self) -> &'static str {
        "liquidity"
    }

    fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    async fn scan(&self) -> anyhow::Result<Vec<Signal>> {
        if self.state.lock().await.halted {
            return Ok(vec![]);
        }
        let ranked = self.rank_markets().await?;
        self.bus.publish(EventType::MarketScanned, json!({"strategy": "liquidity", "count": ranked.len()}));

        self.cancel_stale_orders(&ranked).await;

        let mut signals = Vec::new();
        let mut active_slots = self.state.lock().await.live_orders.len();
        for market in ranked {
            if active_slots >= self.config.lp_max_markets {
                break;
            }
            if let Some(signal) = self.quote_or_keep(&market).await? {
                signals.push(signal);
                // quotes emitted this tick aren't in `live_orders` yet — the order
                // manager reports them back via `record_live_order` only once the
                // execution worker confirms the fill, which happens out of band
                // after `scan()` returns. Count them locally so the quota is
                // enforced within a single scan, not just across ticks.
                active_slots += 1;
            } else {
                active_slots = self.state.lock().await.live_orders.len();
            }
        }
        Ok(signals)
    }
}
