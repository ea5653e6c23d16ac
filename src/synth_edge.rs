//! Forecast-Edge (C14b): for each configured asset, compares an external
//! forecast probability against the exchange's implied probability and
//! sizes a Kelly bet on the edge.

use crate::config::Config;
use crate::math::kelly_criterion;
use crate::persistence::SqlitePersistence;
use crate::strategy::Strategy;
use crate::types::{OrderType, Side, Signal, StrategyTag};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// External forecast source. Out of scope: any specific forecasting model;
/// this trait fixes only the shape the strategy consumes.
#[async_trait]
pub trait ForecastSource: Send + Sync {
    async fn forecast(&self, asset: &str) -> anyhow::Result<Option<Forecast>>;
}

/// A forecast source that never forecasts. Any concrete forecasting model is
/// out of scope; wiring this in place of a real source leaves the strategy
/// spawned (so configured assets surface in the dashboard) but inert until a
/// real `ForecastSource` is supplied.
pub struct NullForecastSource;

#[async_trait]
impl ForecastSource for NullForecastSource {
    async fn forecast(&self, _asset: &str) -> anyhow::Result<Option<Forecast>> {
        Ok(None)
    }
}

#[derive(Debug, Clone)]
pub struct Forecast {
    pub synth_prob_up: f64,
    pub poly_prob_up: f64,
    pub up_token: String,
    pub down_token: String,
    pub condition_id: String,
}

pub struct SynthEdge {
    source: std::sync::Arc<dyn ForecastSource>,
    db: SqlitePersistence,
    config: Config,
    scan_interval: Duration,
}

impl SynthEdge {
    pub fn new(source: std::sync::Arc<dyn ForecastSource>, db: SqlitePersistence, config: Config) -> Self {
        let scan_interval = crate::clock::jitter_duration(config.synth_poll_interval_sec, config.timing_jitter_pct);
        SynthEdge { source, db, config, scan_interval }
    }
}

#[async_trait]
impl Strategy for SynthEdge {
    fn name(&self) -> &'static str {
        "synth_edge"
    }

    fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    async fn scan(&self) -> anyhow::Result<Vec<Signal>> {
        let mut signals = Vec::new();
        for asset in &self.config.synth_assets {
            let forecast = match self.source.forecast(asset).await? {
                Some(f) => f,
                None => continue,
            };
            let edge = forecast.synth_prob_up - forecast.poly_prob_up;
            if edge.abs() < self.config.synth_edge_threshold {
                info!(asset, edge, "synth_edge.skip");
                let _ = self.db.record_synth_signal(asset, edge, false);
                continue;
            }

            let (token_id, price) = if edge > 0.0 {
                (forecast.up_token.clone(), forecast.poly_prob_up)
            } else {
                (forecast.down_token.clone(), 1.0 - forecast.poly_prob_up)
            };

            let k = kelly_criterion(edge.abs(), price, self.config.synth_kelly_fraction);
            let usd_size = (k * self.config.starting_balance_usd).min(self.config.max_trade_size_usd);
            if usd_size <= 0.0 || price <= 0.0 {
                let _ = self.db.record_synth_signal(asset, edge, false);
                continue;
            }

            let _ = self.db.record_synth_signal(asset, edge, true);
            signals.push(Signal {
                strategy: StrategyTag::SynthEdge,
                token_id,
                condition_id: forecast.condition_id.clone(),
                side: Side::Buy,
                price,
                size: usd_size / price,
                order_type: OrderType::Gtc,
                edge: Some(edge),
                confidence: None,
                reason: format!("synth edge on {asset}"),
                market_question: asset.clone(),
                outcome_side: None,
            });
        }
        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedForecast(Forecast);

    #[async_trait]
    impl ForecastSource for FixedForecast {
        async fn forecast(&self, _asset: &str) -> anyhow::Result<Option<Forecast>> {
            Ok(Some(self.0.clone()))
        }
    }

    fn config() -> Config {
        let mut cfg = Config::from_env().unwrap();
        cfg.synth_edge_threshold = 0.05;
        cfg.synth_assets = vec!["BTC".into()];
        cfg.synth_kelly_fraction = 0.25;
        cfg.starting_balance_usd = 1000.0;
        cfg.max_trade_size_usd = 1000.0;
        cfg
    }

    #[tokio::test]
    async fn below_threshold_is_skipped() {
        let source = std::sync::Arc::new(FixedForecast(Forecast {
            synth_prob_up: 0.52,
            poly_prob_up: 0.50,
            up_token: "up".into(),
            down_token: "down".into(),
            condition_id: "cond1".into(),
        }));
        let db = SqlitePersistence::open_in_memory().unwrap();
        let strategy = SynthEdge::new(source, db, config());
        assert!(strategy.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn above_threshold_emits_buy_on_up_token() {
        let source = std::sync::Arc::new(FixedForecast(Forecast {
            synth_prob_up: 0.65,
            poly_prob_up: 0.50,
            up_token: "up".into(),
            down_token: "down".into(),
            condition_id: "cond1".into(),
        }));
        let db = SqlitePersistence::open_in_memory().unwrap();
        let strategy = SynthEdge::new(source, db, config());
        let signals = strategy.scan().await.unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].token_id, "up");
        assert_eq!(signals[0].side, Side::Buy);
    }
}
