//! Exchange client interface (C4). Wire protocol details are out of scope;
//! this module fixes only the operations the core consumes, plus a
//! deterministic paper-trading double used under `dry_run`.

use crate::types::{OpenOrder, OrderBook, OrderType, RewardMarket, Side};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub id: String,
    pub status: OrderStatus,
    pub fill_price: f64,
    pub fill_size: f64,
    pub fee: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Live,
    Matched,
    Unmatched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetType {
    Collateral,
    Conditional,
}

/// Operations the trading core depends on. A live implementation speaks the
/// exchange's HTTP/WebSocket wire protocol; that payload shape is explicitly
/// out of scope here.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn get_order_book(&self, token_id: &str) -> anyhow::Result<OrderBook>;
    async fn get_price(&self, token_id: &str, side: Side) -> anyhow::Result<f64>;
    async fn get_balance(&self) -> anyhow::Result<f64>;
    async fn get_open_orders(&self) -> anyhow::Result<Vec<OpenOrder>>;
    async fn cancel_order(&self, order_id: &str) -> anyhow::Result<()>;
    async fn cancel_all(&self) -> anyhow::Result<u32>;
    async fn create_and_post_limit_order(
        &self,
        token_id: &str,
        price: f64,
        size: f64,
        side: Side,
        order_type: OrderType,
    ) -> anyhow::Result<PlacedOrder>;
    /// Paginated, enriched reward-eligible markets.
    async fn get_reward_markets(&self) -> anyhow::Result<Vec<RewardMarket>>;
    /// Active market universe, independent of reward eligibility — used by
    /// the arbitrage scanner, which needs every two-outcome market rather
    /// than only the LP-reward subset.
    async fn get_active_markets(&self) -> anyhow::Result<Vec<RewardMarket>>;
    async fn get_positions(&self, address: &str) -> anyhow::Result<Vec<crate::types::Position>>;
    async fn update_balance_allowance(&self, asset_type: AssetType, token_id: &str) -> anyhow::Result<()>;
    async fn get_balance_allowance(&self, asset_type: AssetType, token_id: &str) -> anyhow::Result<u64>;
}

/// Deterministic paper-trading exchange used when `dry_run` is set: resting
/// GTC orders never fill until explicitly advanced in tests, but the dry-run
/// executor (C9) never calls through this client at all — it short-circuits
/// before touching the network. This double exists so strategies that poll
/// `get_open_orders`/`get_order_book` directly (LP selector, flip machine)
/// have something to observe in dry-run mode.
pub struct PaperExchangeClient {
    next_order_id: AtomicU64,
    books: Mutex<HashMap<String, OrderBook>>,
    open_orders: Mutex<Vec<OpenOrder>>,
    reward_markets: Mutex<Vec<RewardMarket>>,
    balance: Mutex<f64>,
}

impl PaperExchangeClient {
    pub fn new(starting_balance: f64) -> Self {
        PaperExchangeClient {
            next_order_id: AtomicU64::new(1),
            books: Mutex::new(HashMap::new()),
            open_orders: Mutex::new(Vec::new()),
            reward_markets: Mutex::new(Vec::new()),
            balance: Mutex::new(starting_balance),
        }
    }

    pub fn seed_book(&self, token_id: &str, book: OrderBook) {
        self.books.lock().unwrap().insert(token_id.to_string(), book);
    }

    pub fn seed_reward_markets(&self, markets: Vec<RewardMarket>) {
        *self.reward_markets.lock().unwrap() = markets;
    }

    /// Test/paper helper: remove an order from the open set, simulating a fill.
    pub fn simulate_fill(&self, order_id: &str) {
        self.open_orders.lock().unwrap().retain(|o| o.id != order_id);
    }
}

#[async_trait]
impl ExchangeClient for PaperExchangeClient {
    async fn get_order_book(&self, token_id: &str) -> anyhow::Result<OrderBook> {
        Ok(self.books.lock().unwrap().get(token_id).cloned().unwrap_or_else(|| OrderBook {
            token_id: token_id.to_string(),
            bids: vec![],
            asks: vec![],
        }))
    }

    async fn get_price(&self, token_id: &str, side: Side) -> anyhow::Result<f64> {
        let book = self.get_order_book(token_id).await?;
        Ok(match side {
            Side::Buy => book.best_ask().unwrap_or(0.0),
            Side::Sell => book.best_bid().unwrap_or(0.0),
        })
    }

    async fn get_balance(&self) -> anyhow::Result<f64> {
        Ok(*self.balance.lock().unwrap())
    }

    async fn get_open_orders(&self) -> anyhow::Result<Vec<OpenOrder>> {
        Ok(self.open_orders.lock().unwrap().clone())
    }

    async fn cancel_order(&self, order_id: &str) -> anyhow::Result<()> {
        self.open_orders.lock().unwrap().retain(|o| o.id != order_id);
        Ok(())
    }

    async fn cancel_all(&self) -> anyhow::Result<u32> {
        let mut orders = self.open_orders.lock().unwrap();
        let n = orders.len() as u32;
        orders.clear();
        Ok(n)
    }

    async fn create_and_post_limit_order(
        &self,
        token_id: &str,
        price: f64,
        size: f64,
        side: Side,
        order_type: OrderType,
    ) -> anyhow::Result<PlacedOrder> {
        let id = format!("paper-{}", self.next_order_id.fetch_add(1, Ordering::SeqCst));
        match order_type {
            OrderType::Fok => Ok(PlacedOrder {
                id,
                status: OrderStatus::Matched,
                fill_price: price,
                fill_size: size,
                fee: 0.0,
            }),
            OrderType::Gtc => {
                self.open_orders.lock().unwrap().push(OpenOrder {
                    id: id.clone(),
                    token_id: token_id.to_string(),
                    price,
                    size,
                    side,
                });
                Ok(PlacedOrder { id, status: OrderStatus::Live, fill_price: 0.0, fill_size: 0.0, fee: 0.0 })
            }
        }
    }

    async fn get_reward_markets(&self) -> anyhow::Result<Vec<RewardMarket>> {
        Ok(self.reward_markets.lock().unwrap().clone())
    }

    async fn get_active_markets(&self) -> anyhow::Result<Vec<RewardMarket>> {
        Ok(self.reward_markets.lock().unwrap().clone())
    }

    async fn get_positions(&self, _address: &str) -> anyhow::Result<Vec<crate::types::Position>> {
        Ok(vec![])
    }

    async fn update_balance_allowance(&self, _asset_type: AssetType, _token_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn get_balance_allowance(&self, _asset_type: AssetType, _token_id: &str) -> anyhow::Result<u64> {
        Ok(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BookLevel;

    #[tokio::test]
    async fn gtc_rests_fok_matches() {
        let client = PaperExchangeClient::new(1000.0);
        let gtc = client
            .create_and_post_limit_order("tok1", 0.5, 10.0, Side::Buy, OrderType::Gtc)
            .await
            .unwrap();
        assert_eq!(gtc.status, OrderStatus::Live);
        assert_eq!(client.get_open_orders().await.unwrap().len(), 1);

        let fok = client
            .create_and_post_limit_order("tok1", 0.5, 10.0, Side::Buy, OrderType::Fok)
            .await
            .unwrap();
        assert_eq!(fok.status, OrderStatus::Matched);
        assert_eq!(fok.fill_size, 10.0);
    }

    #[tokio::test]
    async fn seeded_book_roundtrips() {
        let client = PaperExchangeClient::new(1000.0);
        client.seed_book(
            "tok1",
            OrderBook {
                token_id: "tok1".into(),
                bids: vec![BookLevel { price: 0.52, size: 500.0 }],
                asks: vec![BookLevel { price: 0.54, size: 500.0 }],
            },
        );
        let book = client.get_order_book("tok1").await.unwrap();
        assert_eq!(book.midpoint(), Some(0.53));
    }
}
