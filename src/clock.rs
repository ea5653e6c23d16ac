//! Monotonic time and bounded uniform noise on sizes and intervals.
//!
//! Without jitter, independent strategy loops converge onto aligned scan
//! periods and identically-sized orders, a detectable signature. Strategy
//! periods are jittered once at construction; order sizes are jittered per
//! signal.

use rand::Rng;
use std::time::Duration;

/// `max(0, x * (1 + U(-pct, +pct)))`. Returns `x` unchanged when `pct <= 0`.
pub fn jitter(x: f64, pct: f64) -> f64 {
    if pct <= 0.0 {
        return x;
    }
    let noise = rand::thread_rng().gen_range(-pct..=pct);
    (x * (1.0 + noise)).max(0.0)
}

/// Jitter a duration expressed in seconds, returning a [`Duration`].
pub fn jitter_duration(seconds: f64, pct: f64) -> Duration {
    Duration::from_secs_f64(jitter(seconds, pct).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_pct_is_identity() {
        assert_eq!(jitter(10.0, 0.0), 10.0);
    }

    #[test]
    fn jitter_stays_in_band_and_nonnegative() {
        for _ in 0..1000 {
            let j = jitter(10.0, 0.2);
            assert!(j >= 0.0);
            assert!(j <= 10.0 * 1.2 + 1e-9);
            assert!(j >= 10.0 * 0.8 - 1e-9);
        }
    }

    #[test]
    fn jitter_never_negative_near_zero() {
        for _ in 0..1000 {
            assert!(jitter(1.0, 0.99) >= 0.0);
        }
    }
}
