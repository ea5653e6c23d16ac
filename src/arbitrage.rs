//! Arbitrage (C13): same-market YES+NO cost-sum scanner emitting paired FOK
//! orders. Each scan fetches both outcome books for every active market; if
//! the combined best-ask cost undercuts $1 by the configured margin, both
//! legs are bought atomically via FOK.

use crate::config::Config;
use crate::event_bus::{EventBus, EventType};
use crate::exchange::ExchangeClient;
use crate::strategy::Strategy;
use crate::types::{OrderType, Side, Signal, StrategyTag};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct ArbitrageStrategy {
    exchange: Arc<dyn ExchangeClient>,
    bus: EventBus,
    min_profit_cents: f64,
    max_trade_size_usd: f64,
    scan_interval: Duration,
}

impl ArbitrageStrategy {
    pub fn new(exchange: Arc<dyn ExchangeClient>, bus: EventBus, config: &Config) -> Self {
        ArbitrageStrategy {
            exchange,
            bus,
            min_profit_cents: config.arb_min_profit_cents,
            max_trade_size_usd: config.max_trade_size_usd,
            scan_interval: crate::clock::jitter_duration(config.arb_scan_interval_sec, config.timing_jitter_pct),
        }
    }
}

#[async_trait]
impl Strategy for ArbitrageStrategy {
    fn name(&self) -> &'static str {
        "arbitrage"
    }

    fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    async fn scan(&self) -> anyhow::Result<Vec<Signal>> {
        let markets = self.exchange.get_active_markets().await?;
        let mut signals = Vec::new();

        for market in markets {
            if !market.active || market.tokens.len() < 2 {
                continue;
            }
            let yes = match market.tokens.iter().find(|t| t.outcome.eq_ignore_ascii_case("yes")) {
                Some(t) => t,
                None => continue,
            };
            let no = match market.tokens.iter().find(|t| t.outcome.eq_ignore_ascii_case("no")) {
                Some(t) => t,
                None => continue,
            };

            let yes_book = self.exchange.get_order_book(&yes.token_id).await?;
            let no_book = self.exchange.get_order_book(&no.token_id).await?;
            let (yes_ask, no_ask) = match (yes_book.best_ask(), no_book.best_ask()) {
                (Some(a), Some(b)) => (a, b),
                _ => continue,
            };

            let cost_sum = yes_ask + no_ask;
            let min_profit_dollars = self.min_profit_cents / 100.0;
            if cost_sum > 1.0 - min_profit_dollars {
                continue;
            }

            let edge = 1.0 - cost_sum;
            debug!(market = %market.question, cost_sum, edge, "arbitrage.opportunity_found");

            let yes_size = self.max_trade_size_usd * (1.0 - no_ask);
            let no_size = self.max_trade_size_usd * (1.0 - yes_ask);

            signals.push(Signal {
                strategy: StrategyTag::Arbitrage,
                token_id: yes.token_id.clone(),
                condition_id: market.condition_id.clone(),
                side: Side::Buy,
                price: yes_ask,
                size: yes_size,
                order_type: OrderType::Fok,
                edge: Some(edge),
                confidence: None,
                reason: "yes+no cost sum below 1".into(),
                market_question: market.question.clone(),
                outcome_side: None,
            });
            signals.push(Signal {
                strategy: StrategyTag::Arbitrage,
                token_id: no.token_id.clone(),
                condition_id: market.condition_id.clone(),
                side: Side::Buy,
                price: no_ask,
                size: no_size,
                order_type: OrderType::Fok,
                edge: Some(edge),
                confidence: None,
                reason: "yes+no cost sum below 1".into(),
                market_question: market.question.clone(),
                outcome_side: None,
            });

            self.bus.publish(
                EventType::EdgeDetected,
                json!({"strategy": "arbitrage", "market": market.question, "edge": edge}),
            );
        }

        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::PaperExchangeClient;
    use crate::types::{BookLevel, OrderBook, RewardMarket, TokenInfo};

    fn config() -> Config {
        let mut cfg = Config::from_env().unwrap();
        cfg.arb_min_profit_cents = 0.5;
        cfg.max_trade_size_usd = 10.0;
        cfg
    }

    #[tokio::test]
    async fn emits_paired_fok_signals_when_profitable() {
        let client = Arc::new(PaperExchangeClient::new(1000.0));
        client.seed_reward_markets(vec![RewardMarket {
            condition_id: "cond1".into(),
            question: "q".into(),
            tokens: vec![
                TokenInfo { token_id: "yes".into(), outcome: "Yes".into(), price: 0.45 },
                TokenInfo { token_id: "no".into(), outcome: "No".into(), price: 0.52 },
            ],
            active: true,
            daily_reward_usd: 0.0,
            rewards_max_spread: 0.0,
            rewards_min_size: 0.0,
            end_date: None,
        }]);
        client.seed_book(
            "yes",
            OrderBook { token_id: "yes".into(), bids: vec![], asks: vec![BookLevel { price: 0.45, size: 100.0 }] },
        );
        client.seed_book(
            "no",
            OrderBook { token_id: "no".into(), bids: vec![], asks: vec![BookLevel { price: 0.52, size: 100.0 }] },
        );

        let (bus, _rx) = EventBus::new();
        let strategy = ArbitrageStrategy::new(client, bus, &config());
        let signals = strategy.scan().await.unwrap();
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].side, Side::Buy);
        assert!((signals[0].size - 10.0 * (1.0 - 0.52)).abs() < 1e-9);
        assert!((signals[1].size - 10.0 * (1.0 - 0.45)).abs() < 1e-9);
        assert!((signals[0].edge.unwrap() - 0.03).abs() < 1e-9);
    }

    #[tokio::test]
    async fn no_signal_when_not_profitable() {
        let client = Arc::new(PaperExchangeClient::new(1000.0));
        client.seed_reward_markets(vec![RewardMarket {
            condition_id: "cond1".into(),
            question: "q".into(),
            tokens: vec![
                TokenInfo { token_id: "yes".into(), outcome: "Yes".into(), price: 0.5 },
                TokenInfo { token_id: "no".into(), outcome: "No".into(), price: 0.5 },
            ],
            active: true,
            daily_reward_usd: 0.0,
            rewards_max_spread: 0.0,
            rewards_min_size: 0.0,
            end_date: None,
        }]);
        client.seed_book(
            "yes",
            OrderBook { token_id: "yes".into(), bids: vec![], asks: vec![BookLevel { price: 0.5, size: 100.0 }] },
        );
        client.seed_book(
            "no",
            OrderBook { token_id: "no".into(), bids: vec![], asks: vec![BookLevel { price: 0.5, size: 100.0 }] },
        );
        let (bus, _rx) = EventBus::new();
        let strategy = ArbitrageStrategy::new(client, bus, &config());
        assert!(strategy.scan().await.unwrap().is_empty());
    }
}
