//! Shared numeric helpers: tick rounding, Kelly sizing, reward (Q-score).

/// Rounds `x` to the nearest multiple of `tick`, then to 10 decimal places
/// to cancel floating-point residue. Idempotent.
pub fn round_to_tick(x: f64, tick: f64) -> f64 {
    if tick <= 0.0 {
        return x;
    }
    let snapped = (x / tick).round() * tick;
    (snapped * 1e10).round() / 1e10
}

pub fn clamp(x: f64, lo: f64, hi: f64) -> f64 {
    x.max(lo).min(hi)
}

/// Fractional-Kelly position size as a fraction of bankroll.
/// `b = 1/price - 1`, `p = price + edge`, `q = 1 - p`.
/// Returns 0 if `price` is not in (0,1), `edge <= 0`, or `p` is not in (0,1).
pub fn kelly_criterion(edge: f64, price: f64, fraction: f64) -> f64 {
    if !(price > 0.0 && price < 1.0) {
        return 0.0;
    }
    if edge <= 0.0 {
        return 0.0;
    }
    let p = price + edge;
    if !(p > 0.0 && p < 1.0) {
        return 0.0;
    }
    let q = 1.0 - p;
    let b = 1.0 / price - 1.0;
    let k = (b * p - q) / b * fraction;
    k.max(0.0)
}

/// Pool-share / Q-score: `((W - d)/W)^2 * s`. Zero if `max_spread <= 0`,
/// `actual_spread >= max_spread`, or `actual_spread < 0`.
pub fn reward_score(max_spread: f64, actual_spread: f64, size: f64) -> f64 {
    if max_spread <= 0.0 || actual_spread >= max_spread || actual_spread < 0.0 {
        return 0.0;
    }
    (((max_spread - actual_spread) / max_spread).powi(2)) * size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_to_tick_is_idempotent() {
        for x in [0.5234, 0.01, 0.999, 0.10001, 0.8777] {
            let once = round_to_tick(x, 0.01);
            let twice = round_to_tick(once, 0.01);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn kelly_zero_on_bad_inputs() {
        assert_eq!(kelly_criterion(0.0, 0.5, 0.25), 0.0);
        assert_eq!(kelly_criterion(-0.1, 0.5, 0.25), 0.0);
        assert_eq!(kelly_criterion(0.1, 0.0, 0.25), 0.0);
        assert_eq!(kelly_criterion(0.1, 1.0, 0.25), 0.0);
    }

    #[test]
    fn kelly_positive_on_favorable_edge() {
        let k = kelly_criterion(0.1, 0.5, 0.25);
        assert!(k > 0.0);
    }

    #[test]
    fn reward_score_zero_at_or_beyond_band() {
        assert_eq!(reward_score(0.03, 0.03, 100.0), 0.0);
        assert_eq!(reward_score(0.03, 0.04, 100.0), 0.0);
        assert_eq!(reward_score(0.0, 0.01, 100.0), 0.0);
        assert_eq!(reward_score(0.03, -0.01, 100.0), 0.0);
    }

    #[test]
    fn reward_score_positive_within_band() {
        let q = reward_score(0.03, 0.01, 100.0);
        assert!(q > 0.0);
    }
}
