//! Core domain types shared across the engine: signals, orders, books, markets,
//! positions, flip cycles and the dashboard projection.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Good-till-cancel, resting order.
    Gtc,
    /// Fill-or-kill, immediate or cancel.
    Fok,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum StrategyTag {
    Arbitrage,
    Liquidity,
    LpFlip,
    Copy,
    SynthEdge,
}

impl StrategyTag {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyTag::Arbitrage => "arbitrage",
            StrategyTag::Liquidity => "liquidity",
            StrategyTag::LpFlip => "lp_flip",
            StrategyTag::Copy => "copy",
            StrategyTag::SynthEdge => "synth_edge",
        }
    }
}

/// A proposed order. Immutable once created; the risk gate may return an
/// adjusted copy with a smaller size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub strategy: StrategyTag,
    pub token_id: String,
    pub condition_id: String,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub order_type: OrderType,
    pub edge: Option<f64>,
    pub confidence: Option<f64>,
    pub reason: String,
    pub market_question: String,
    /// Outcome ("yes"/"no") this signal quotes, when the strategy tracks one
    /// (currently only the LP Selector). `None` for strategies that don't.
    pub outcome_side: Option<String>,
}

impl Signal {
    pub fn notional(&self) -> f64 {
        self.price * self.size
    }

    pub fn with_size(&self, size: f64) -> Signal {
        Signal {
            size,
            ..self.clone()
        }
    }
}

/// Outcome of executing a [`Signal`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub signal: Signal,
    pub success: bool,
    pub order_id: Option<String>,
    pub fill_price: f64,
    pub fill_size: f64,
    pub fee: f64,
    pub error: Option<String>,
    pub is_dry_run: bool,
    pub is_resting: bool,
}

impl OrderResult {
    /// `success ⇒ order_id ≠ ∅`
    pub fn is_valid(&self) -> bool {
        !self.success || self.order_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// Order-book snapshot. Bids sorted strictly descending by price, asks
/// strictly ascending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub token_id: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    pub fn midpoint(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((b + a) / 2.0),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    pub token_id: String,
    pub outcome: String,
    pub price: f64,
}

/// An exchange contract with two outcome tokens plus LP-incentive parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub condition_id: String,
    pub question: String,
    pub tokens: Vec<TokenInfo>,
    pub active: bool,
    pub min_incentive_size: f64,
    pub max_incentive_spread: f64,
    pub daily_reward_usd: f64,
    pub end_date: Option<String>,
}

impl Market {
    pub fn token(&self, outcome: &str) -> Option<&TokenInfo> {
        self.tokens.iter().find(|t| t.outcome.eq_ignore_ascii_case(outcome))
    }

    /// Days until resolution, if an end date is known and parseable.
    pub fn days_until_end(&self) -> Option<f64> {
        let end = self.end_date.as_ref()?;
        let end_dt = chrono::DateTime::parse_from_rfc3339(end).ok()?;
        let now = chrono::Utc::now();
        Some((end_dt.with_timezone(&chrono::Utc) - now).num_seconds() as f64 / 86_400.0)
    }
}

/// One outstanding holding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub condition_id: String,
    pub token_id: String,
    pub outcome: String,
    pub size: f64,
    pub avg_entry_price: f64,
    pub strategy: StrategyTag,
    pub opened_at: chrono::DateTime<chrono::Utc>,
}

impl Position {
    pub fn exposure(&self) -> f64 {
        self.size * self.avg_entry_price
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlipStatus {
    Open,
    Completed,
    Cancelled,
    Error,
    StopLoss,
}

impl FlipStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FlipStatus::Open => "open",
            FlipStatus::Completed => "completed",
            FlipStatus::Cancelled => "cancelled",
            FlipStatus::Error => "error",
            FlipStatus::StopLoss => "stop_loss",
        }
    }
}

/// One LP Flip state-machine instance.
#[derive(Debug, Clone)]
pub struct FlipCycle {
    pub db_id: Option<i64>,
    pub condition_id: String,
    pub market_question: String,
    pub entry_side: String,
    pub entry_token_id: String,
    pub entry_price: f64,
    pub entry_shares: f64,
    pub entry_order_id: String,
    pub entry_placed_at: std::time::Instant,
    pub exit_side: Option<String>,
    pub exit_token_id: Option<String>,
    pub exit_price: Option<f64>,
    pub exit_shares: Option<f64>,
    pub exit_order_id: Option<String>,
    pub status: FlipStatus,
}

/// An open order as reported by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrder {
    pub id: String,
    pub token_id: String,
    pub price: f64,
    pub size: f64,
    pub side: Side,
}

/// A reward-eligible market as returned by the exchange's reward-markets feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardMarket {
    pub condition_id: String,
    pub question: String,
    pub tokens: Vec<TokenInfo>,
    pub active: bool,
    pub daily_reward_usd: f64,
    pub rewards_max_spread: f64,
    pub rewards_min_size: f64,
    pub end_date: Option<String>,
}

impl From<RewardMarket> for Market {
    fn from(rm: RewardMarket) -> Self {
        Market {
            condition_id: rm.condition_id,
            question: rm.question,
            tokens: rm.tokens,
            active: rm.active,
            min_incentive_size: rm.rewards_min_size,
            max_incentive_spread: rm.rewards_max_spread,
            daily_reward_usd: rm.daily_reward_usd,
            end_date: rm.end_date,
        }
    }
}

/// Mutable projection read by the dashboard; written only by the event-apply
/// function in the strategy runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardState {
    pub cash_balance: f64,
    pub positions_value: f64,
    pub balance_history: Vec<f64>,
    pub strategy_counters: std::collections::HashMap<String, u64>,
    pub activity_log: Vec<String>,
    pub daily_volume: f64,
    pub drawdown_halted: bool,
    pub strategy_status: std::collections::HashMap<String, String>,
}
