//! Dry-Run Executor (C9): pure function, never touches the network.

use crate::types::{OrderResult, Signal};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn execute_dry_run(signal: Signal) -> OrderResult {
    let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
    OrderResult {
        fill_price: signal.price,
        fill_size: signal.size,
        order_id: Some(format!("dryrun-{id}")),
        success: true,
        fee: 0.0,
        error: None,
        is_dry_run: true,
        is_resting: false,
        signal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderType, Side, StrategyTag};

    #[test]
    fn returns_requested_price_and_size() {
        let signal = Signal {
            strategy: StrategyTag::Arbitrage,
            token_id: "tok1".into(),
            condition_id: "cond1".into(),
            side: Side::Buy,
            price: 0.45,
            size: 4.8,
            order_type: OrderType::Fok,
            edge: Some(0.03),
            confidence: None,
            reason: "arb".into(),
            market_question: "q".into(),
            outcome_side: None,
        };
        let result = execute_dry_run(signal.clone());
        assert!(result.success);
        assert!(result.is_dry_run);
        assert_eq!(result.fill_price, signal.price);
        assert_eq!(result.fill_size, signal.size);
        assert!(result.order_id.is_some());
        assert!(result.is_valid());
    }

    #[test]
    fn ids_are_monotonic_and_unique() {
        let make = || Signal {
            strategy: StrategyTag::Arbitrage,
            token_id: "t".into(),
            condition_id: "c".into(),
            side: Side::Buy,
            price: 0.5,
            size: 1.0,
            order_type: OrderType::Fok,
            edge: None,
            confidence: None,
            reason: String::new(),
            market_question: String::new(),
            outcome_side: None,
        };
        let a = execute_dry_run(make()).order_id.unwrap();
        let b = execute_dry_run(make()).order_id.unwrap();
        assert_ne!(a, b);
    }
}
