//! Strategy Runtime (C10): cooperative supervisor for long-lived strategy
//! loops, implemented as one Tokio task per strategy feeding a shared signal
//! channel, per the parallel worker model in SPEC_FULL.md §5.

use crate::event_bus::{Event, EventType};
use crate::types::{DashboardState, Signal};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// A long-lived strategy loop: produces signals on `scan()`, runs
/// `on_shutdown()` once when cancelled, and reports its own (possibly
/// jittered) sleep interval between scans.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn scan(&self) -> anyhow::Result<Vec<Signal>>;
    async fn on_shutdown(&self) {}
    fn scan_interval(&self) -> Duration;
}

/// Supervises one strategy task: `scan → send signals → sleep`, converting
/// any scan error into a logged STRATEGY_ERROR event rather than crashing
/// the task.
pub async fn run_strategy_loop(
    strategy: Arc<dyn Strategy>,
    signal_tx: mpsc::Sender<Signal>,
    event_tx: mpsc::Sender<Event>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = async {
                match strategy.scan().await {
                    Ok(signals) => {
                        for signal in signals {
                            if signal_tx.send(signal).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        error!(strategy = strategy.name(), %e, "strategy.scan_failed");
                        metrics::counter!("betterbot_strategy_errors_total", 1, "strategy" => strategy.name());
                        let _ = event_tx.try_send(Event {
                            kind: EventType::StrategyError,
                            payload: serde_json::json!({"strategy": strategy.name(), "error": e.to_string()}),
                        });
                    }
                }
                tokio::time::sleep(strategy.scan_interval()).await;
            } => {}
        }
    }
    strategy.on_shutdown().await;
}

pub struct Supervisor {
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl Supervisor {
    pub fn new() -> (Self, tokio::sync::watch::Receiver<bool>) {
        let (tx, rx) = tokio::sync::watch::channel(false);
        (Supervisor { handles: Mutex::new(Vec::new()), shutdown_tx: tx }, rx)
    }

    pub async fn spawn(
        &self,
        strategy: Arc<dyn Strategy>,
        signal_tx: mpsc::Sender<Signal>,
        event_tx: mpsc::Sender<Event>,
    ) {
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(run_strategy_loop(strategy, signal_tx, event_tx, shutdown_rx));
        self.handles.lock().await.push(handle);
    }

    /// Cancels all supervised tasks, awaits their completion (which runs
    /// each strategy's `on_shutdown` hook).
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(%e, "supervisor.task_join_failed");
            }
        }
    }
}

/// Applies a bus event to the dashboard projection. TRADE_EXECUTED updates
/// per-strategy counters and, for non-resting fills, the daily volume;
/// EDGE_DETECTED / MARKET_SCANNED bump counters; DRAWDOWN_HALT flips a flag;
/// STRATEGY_ERROR marks the strategy's status.
pub fn apply_event(state: &mut DashboardState, event: &Event) {
    match event.kind {
        EventType::TradeExecuted => {
            if let Some(strategy) = event.payload.get("strategy").and_then(|v| v.as_str()) {
                *state.strategy_counters.entry(strategy.to_string()).or_insert(0) += 1;
            }
            let resting = event.payload.get("is_resting").and_then(|v| v.as_bool()).unwrap_or(false);
            if !resting {
                if let Some(price) = event.payload.get("price").and_then(|v| v.as_f64()) {
                    if let Some(size) = event.payload.get("size").and_then(|v| v.as_f64()) {
                        state.daily_volume += price * size;
                    }
                }
            }
            if let Some(balance) = event.payload.get("balance").and_then(|v| v.as_f64()) {
                state.cash_balance = balance;
                state.balance_history.push(balance);
            }
            if let Some(pv) = event.payload.get("positions_value").and_then(|v| v.as_f64()) {
                state.positions_value = pv;
            }
            if let Some(market) = event.payload.get("market").and_then(|v| v.as_str()) {
                state.activity_log.push(format!("trade: {market}"));
                if state.activity_log.len() > 100 {
                    state.activity_log.remove(0);
                }
            }
        }
        EventType::EdgeDetected | EventType::MarketScanned => {
            if let Some(strategy) = event.payload.get("strategy").and_then(|v| v.as_str()) {
                *state.strategy_counters.entry(format!("{strategy}_scans")).or_insert(0) += 1;
            }
        }
        EventType::DrawdownHalt => {
            state.drawdown_halted = true;
        }
        EventType::DrawdownWarning => {}
        EventType::StrategyError => {
            if let Some(strategy) = event.payload.get("strategy").and_then(|v| v.as_str()) {
                state.strategy_status.insert(strategy.to_string(), "error".to_string());
            }
        }
        EventType::OrderResolved => {}
    }
}
