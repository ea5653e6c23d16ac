//! Engine Orchestrator (C15): wires components, boots strategies, performs
//! graceful shutdown.

use crate::arbitrage::ArbitrageStrategy;
use crate::config::Config;
use crate::copy_trading::CopyTrading;
use crate::event_bus::{EventBus, EventBusReceiver};
use crate::exchange::ExchangeClient;
use crate::inventory::Inventory;
use crate::liquidity::LpSelector;
use crate::liquidity_flip::LiquidityFlip;
use crate::order_manager::OrderManager;
use crate::persistence::SqlitePersistence;
use crate::risk::{DrawdownLatch, RiskGate};
use crate::strategy::{apply_event, Strategy, Supervisor};
use crate::synth_edge::{ForecastSource, NullForecastSource, SynthEdge};
use crate::types::{DashboardState, StrategyTag};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::info;

pub struct Engine {
    config: Config,
    exchange: Arc<dyn ExchangeClient>,
    db: SqlitePersistence,
    bus: EventBus,
    inventory: Arc<Mutex<Inventory>>,
    order_manager: Arc<OrderManager>,
    drawdown: Arc<DrawdownLatch>,
    supervisor: Supervisor,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
    signal_tx: mpsc::Sender<crate::types::Signal>,
    signal_rx: Mutex<Option<mpsc::Receiver<crate::types::Signal>>>,
    bus_rx: Mutex<Option<EventBusReceiver>>,
}

impl Engine {
    pub async fn bootstrap(config: Config, exchange: Arc<dyn ExchangeClient>) -> anyhow::Result<Self> {
        info!("engine.booting");
        let db = SqlitePersistence::open(&config.db_path)?;
        let (bus, bus_rx) = EventBus::new();

        let mut inventory = Inventory::new(config.starting_balance_usd);
        if !config.dry_run {
            if let Err(e) = inventory.refresh_from_api(exchange.as_ref(), "").await {
                tracing::warn!(%e, "engine.inventory_refresh_failed");
            }
        }
        let inventory = Arc::new(Mutex::new(inventory));

        let (drawdown, _drawdown_rx) = DrawdownLatch::new();
        let risk_gate = RiskGate::new(config.clone(), drawdown.clone(), db.clone(), bus.clone());
        let order_manager = Arc::new(OrderManager::new(
            risk_gate,
            exchange.clone(),
            db.clone(),
            bus.clone(),
            config.dry_run,
            config.size_jitter_pct,
        ));

        let (supervisor, shutdown_rx) = Supervisor::new();
        let (signal_tx, signal_rx) = mpsc::channel(256);

        info!("engine.boot_complete");
        Ok(Engine {
            config,
            exchange,
            db,
            bus,
            inventory,
            order_manager,
            drawdown,
            supervisor,
            shutdown_rx,
            signal_tx,
            signal_rx: Mutex::new(Some(signal_rx)),
            bus_rx: Mutex::new(Some(bus_rx)),
        })
    }

    /// Launches every enabled strategy task plus the single execution worker
    /// that drains the signal channel, owning inventory/dashboard/LP
    /// bookkeeping exclusively (SPEC_FULL.md §5's parallel worker model).
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let arbitrage = Arc::new(ArbitrageStrategy::new(self.exchange.clone(), self.bus.clone(), &self.config));
        self.spawn_strategy(arbitrage).await;

        let lp_selector =
            Arc::new(LpSelector::new(self.exchange.clone(), self.bus.clone(), self.drawdown.clone(), self.config.clone()));
        {
            let inv = self.inventory.lock().await;
            lp_selector.seed_legacy_positions(&inv).await;
        }
        self.spawn_strategy(lp_selector.clone()).await;
        tokio::spawn(lp_selector.clone().run_monitor());

        let flip = Arc::new(LiquidityFlip::new(
            self.exchange.clone(),
            self.db.clone(),
            self.bus.clone(),
            self.config.clone(),
        ));
        tokio::spawn(flip.run(self.shutdown_rx.clone()));

        if !self.config.copy_traders.is_empty() {
            let copy = Arc::new(CopyTrading::new(self.exchange.clone(), self.db.clone(), self.config.clone()));
            self.spawn_strategy(copy).await;
        }

        if !self.config.synth_assets.is_empty() {
            let synth_source: Arc<dyn ForecastSource> = Arc::new(NullForecastSource);
            let synth = Arc::new(SynthEdge::new(synth_source, self.db.clone(), self.config.clone()));
            self.spawn_strategy(synth).await;
        }

        self.spawn_execution_worker(lp_selector.clone()).await;
        self.spawn_dashboard_consumer().await;

        self.spawn_periodic_health_check();
        self.spawn_periodic_stats_refresh();
        self.spawn_periodic_profile_refresh();

        Ok(())
    }

    async fn spawn_strategy(&self, strategy: Arc<dyn Strategy>) {
        let (event_tx, _event_rx) = mpsc::channel(64);
        self.supervisor.spawn(strategy, self.signal_tx.clone(), event_tx).await;
    }

    /// Drains the signal channel; when a liquidity quote rests successfully,
    /// reports it back to the LP Selector so smart-refresh and fill detection
    /// can track it.
    async fn spawn_execution_worker(&self, lp_selector: Arc<LpSelector>) {
        let mut rx = self.signal_rx.lock().await.take().expect("execution worker spawned once");
        let order_manager = self.order_manager.clone();
        let inventory = self.inventory.clone();
        tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                let strategy = signal.strategy;
                let mut inv = inventory.lock().await;
                let result = order_manager.execute_signal(signal, &mut inv).await;
                drop(inv);
                if let Some(result) = result {
                    metrics::counter!("betterbot_trades_total", 1, "strategy" => strategy.as_str());
                    if !result.success {
                        metrics::counter!("betterbot_trade_failures_total", 1, "strategy" => strategy.as_str());
                    }
                    if strategy == StrategyTag::Liquidity && result.success {
                        if let (Some(order_id), Some(side)) =
                            (result.order_id.clone(), result.signal.outcome_side.clone())
                        {
                            lp_selector.record_live_order(&result.signal, &side, order_id).await;
                        }
                    }
                }
            }
        });
    }

    /// The C10 dashboard-projection consumer: owns a `DashboardState`, drains
    /// the event bus on a 1-second timed receive so it observes shutdown
    /// promptly, and folds each event in via `apply_event`.
    async fn spawn_dashboard_consumer(&self) {
        let mut rx = self.bus_rx.lock().await.take().expect("dashboard consumer spawned once");
        let shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut state = DashboardState::default();
            loop {
                if *shutdown.borrow() {
                    break;
                }
                if let Some(event) = rx.recv_timeout(std::time::Duration::from_secs(1)).await {
                    apply_event(&mut state, &event);
                }
            }
        });
    }

    fn spawn_periodic_health_check(&self) {
        let exchange = self.exchange.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
            loop {
                interval.tick().await;
                match exchange.get_balance().await {
                    Ok(balance) => info!(balance, "engine.health_check_ok"),
                    Err(e) => tracing::error!(%e, "engine.health_check_failed"),
                }
            }
        });
    }

    /// Refreshes in-memory balance/exposure gauges from the inventory on a
    /// fixed cadence, independent of trade-triggered updates.
    fn spawn_periodic_stats_refresh(&self) {
        let inventory = self.inventory.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                let inv = inventory.lock().await;
                metrics::gauge!("betterbot_balance_usd", inv.balance);
                metrics::gauge!("betterbot_exposure_usd", inv.get_total_exposure());
                metrics::gauge!("betterbot_open_positions", inv.get_open_position_count() as f64);
            }
        });
    }

    /// Refreshes the collateral allowance profile from the exchange so
    /// allowance-dependent strategies (LP exits, flip emergency exits)
    /// observe drift without waiting for a trade attempt to surface it.
    fn spawn_periodic_profile_refresh(&self) {
        let exchange = self.exchange.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(900));
            loop {
                interval.tick().await;
                if let Err(e) = exchange.update_balance_allowance(crate::exchange::AssetType::Collateral, "").await {
                    tracing::warn!(%e, "engine.profile_refresh_failed");
                }
            }
        });
    }

    /// Cancels all supervised tasks; if not in dry-run, cancels every live
    /// order; closes collaborators in reverse dependency order.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        info!("engine.shutting_down");
        self.supervisor.shutdown().await;
        if !self.config.dry_run {
            let cancelled = self.order_manager.cancel_all_orders().await?;
            info!(cancelled, "engine.cancelled_all_orders");
        }
        info!("engine.shutdown_complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::PaperExchangeClient;

    #[tokio::test]
    async fn bootstrap_and_shutdown_round_trip() {
        let mut config = Config::from_env().unwrap();
        config.dry_run = true;
        config.db_path = ":memory:".into();
        config.copy_traders = vec![];
        config.synth_assets = vec![];
        let exchange: Arc<dyn ExchangeClient> = Arc::new(PaperExchangeClient::new(config.starting_balance_usd));
        let engine = Arc::new(Engine::bootstrap(config, exchange).await.unwrap());
        engine.clone().run().await.unwrap();
        engine.shutdown().await.unwrap();
    }
}
