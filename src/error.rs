//! Error taxonomy for call sites that must branch on error kind rather than
//! just propagate. Most of the crate uses `anyhow::Result` and `?`; this
//! enum exists only where the caller's next action depends on *which* kind
//! of failure occurred (retry vs halt vs log-and-skip).

use std::fmt;

#[derive(Debug)]
pub enum EngineError {
    /// Network/IO failure expected to be transient; safe to retry.
    TransientIo(String),
    /// The exchange rejected the order itself (bad price, insufficient
    /// balance, market closed) — retrying the same order is pointless.
    ExchangeReject(String),
    /// The risk gate declined the signal. Carried for logging only; the
    /// risk gate itself communicates via `Verdict`, not `Result`.
    RiskReject(String),
    /// The drawdown kill-switch is latched.
    Drawdown,
    /// Anything else — surfaced to the caller as fatal for that task.
    Fatal(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::TransientIo(msg) => write!(f, "transient io error: {msg}"),
            EngineError::ExchangeReject(msg) => write!(f, "exchange rejected order: {msg}"),
            EngineError::RiskReject(msg) => write!(f, "risk gate rejected signal: {msg}"),
            EngineError::Drawdown => write!(f, "drawdown kill-switch is latched"),
            EngineError::Fatal(msg) => write!(f, "fatal error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Classifies an exchange-call failure by message shape. The exchange
/// trait surfaces `anyhow::Error` uniformly (wire protocol specifics are
/// out of scope), so this is a best-effort heuristic, not a type-level
/// distinction — used only to pick a log level and retry behavior.
pub fn classify_exchange_error(err: &anyhow::Error) -> EngineError {
    let msg = err.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("timeout") || lower.contains("connection") {
        EngineError::TransientIo(msg)
    } else if lower.contains("reject") || lower.contains("insufficient") || lower.contains("closed") {
        EngineError::ExchangeReject(msg)
    } else {
        EngineError::Fatal(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_timeout_as_transient() {
        let err = anyhow::anyhow!("request timeout after 5s");
        assert!(matches!(classify_exchange_error(&err), EngineError::TransientIo(_)));
    }

    #[test]
    fn classifies_rejection_as_exchange_reject() {
        let err = anyhow::anyhow!("order rejected: insufficient balance");
        assert!(matches!(classify_exchange_error(&err), EngineError::ExchangeReject(_)));
    }

    #[test]
    fn falls_back_to_fatal() {
        let err = anyhow::anyhow!("unexpected panic in handler");
        assert!(matches!(classify_exchange_error(&err), EngineError::Fatal(_)));
    }
}
