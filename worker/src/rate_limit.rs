//! Token-budget admission control for LLM calls
//!
//! Process-local limiter protecting the provider: callers reserve an
//! estimated token amount before calling, wait a bounded time for budget,
//! and reconcile the estimate against observed consumption afterwards so
//! future estimates improve. Cross-process coordination is out of scope.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// How often a blocked waiter re-checks the budget
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// EWMA weight given to each new actual/estimated observation
const CORRECTION_ALPHA: f64 = 0.2;

struct LimiterState {
    /// Tokens currently available; capped at one minute of budget
    available: f64,
    last_refill: Instant,
    /// Multiplier applied to estimates; learned from actual usage
    correction: f64,
    /// (when, tokens) burns within the trailing minute
    recent_burns: VecDeque<(Instant, u64)>,
}

/// A snapshot of the limiter for status reporting
#[derive(Debug, Clone)]
pub struct LimiterStatus {
    pub available_tokens: u64,
    pub tokens_per_minute: u64,
    pub correction_factor: f64,
    pub tokens_last_minute: u64,
}

/// Token-budget limiter with wait-for-capacity and usage reconciliation
pub struct TokenBudgetLimiter {
    tokens_per_minute: f64,
    state: Mutex<LimiterState>,
}

impl TokenBudgetLimiter {
    /// Create a limiter with a full initial budget
    pub fn new(tokens_per_minute: u64) -> Self {
        Self {
            tokens_per_minute: tokens_per_minute as f64,
            state: Mutex::new(LimiterState {
                available: tokens_per_minute as f64,
                last_refill: Instant::now(),
                correction: 1.0,
                recent_burns: VecDeque::new(),
            }),
        }
    }

    /// Estimate tokens for a call: characters divided by four, with a 30%
    /// response buffer
    pub fn estimate_tokens(document_len: usize, prompt_len: usize) -> u64 {
        ((document_len + prompt_len) as f64 / 4.0 * 1.3).ceil() as u64
    }

    /// Block up to `timeout` for budget. Returns `false` if the corrected
    /// estimate was not granted in time; no tokens are consumed in that
    /// case.
    pub async fn wait_for_capacity(&self, estimated_tokens: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.state.lock().await;
                self.refill(&mut state);
                let corrected = estimated_tokens as f64 * state.correction;
                if state.available >= corrected {
                    state.available -= corrected;
                    debug!(
                        estimated_tokens,
                        corrected, "Token budget reserved"
                    );
                    return true;
                }
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(estimated_tokens, "Token budget not granted within timeout");
                return false;
            }
            sleep(WAIT_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Reconcile a reservation against observed consumption: refund (or
    /// charge) the difference and fold the observation into the correction
    /// factor.
    pub async fn report_actual_usage(&self, estimated_tokens: u64, actual_tokens: u64) {
        let mut state = self.state.lock().await;
        let reserved = estimated_tokens as f64 * state.correction;
        state.available = (state.available + reserved - actual_tokens as f64)
            .min(self.tokens_per_minute);

        if estimated_tokens > 0 {
            let ratio = actual_tokens as f64 / estimated_tokens as f64;
            state.correction = ((1.0 - CORRECTION_ALPHA) * state.correction
                + CORRECTION_ALPHA * ratio)
                .clamp(0.1, 10.0);
        }

        let now = Instant::now();
        state.recent_burns.push_back((now, actual_tokens));
        Self::prune_burns(&mut state.recent_burns, now);
    }

    /// Remaining budget and recent-burn metrics
    pub async fn status(&self) -> LimiterStatus {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        let now = Instant::now();
        Self::prune_burns(&mut state.recent_burns, now);
        LimiterStatus {
            available_tokens: state.available.max(0.0) as u64,
            tokens_per_minute: self.tokens_per_minute as u64,
            correction_factor: state.correction,
            tokens_last_minute: state.recent_burns.iter().map(|(_, t)| t).sum(),
        }
    }

    fn refill(&self, state: &mut LimiterState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        let refill = self.tokens_per_minute * elapsed.as_secs_f64() / 60.0;
        state.available = (state.available + refill).min(self.tokens_per_minute);
        state.last_refill = now;
    }

    fn prune_burns(burns: &mut VecDeque<(Instant, u64)>, now: Instant) {
        while let Some((when, _)) = burns.front() {
            if now.duration_since(*when) > Duration::from_secs(60) {
                burns.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_uses_chars_over_four_with_buffer() {
        // (400 + 0) / 4 * 1.3 = 130
        assert_eq!(TokenBudgetLimiter::estimate_tokens(400, 0), 130);
        // ceil is applied
        assert_eq!(TokenBudgetLimiter::estimate_tokens(1, 0), 1);
        assert_eq!(TokenBudgetLimiter::estimate_tokens(0, 0), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grant_within_budget_is_immediate() {
        let limiter = TokenBudgetLimiter::new(1_000);
        assert!(limiter.wait_for_capacity(500, Duration::from_millis(10)).await);
        let status = limiter.status().await;
        assert_eq!(status.available_tokens, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_starved_waiter_times_out_without_consuming() {
        let limiter = TokenBudgetLimiter::new(100);
        assert!(!limiter.wait_for_capacity(10_000, Duration::from_millis(200)).await);
        // Nothing was deducted for the refused reservation
        let status = limiter.status().await;
        assert_eq!(status.available_tokens, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_refills_over_time() {
        let limiter = TokenBudgetLimiter::new(6_000);
        assert!(limiter.wait_for_capacity(6_000, Duration::from_millis(10)).await);
        assert_eq!(limiter.status().await.available_tokens, 0);

        // 10 seconds refills a sixth of the per-minute budget
        tokio::time::advance(Duration::from_secs(10)).await;
        let status = limiter.status().await;
        assert!(status.available_tokens >= 990 && status.available_tokens <= 1_010);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_is_granted_once_refill_catches_up() {
        let limiter = TokenBudgetLimiter::new(6_000);
        assert!(limiter.wait_for_capacity(6_000, Duration::from_millis(10)).await);
        // 1000 tokens refill within ~10s; paused time advances through sleeps
        assert!(limiter.wait_for_capacity(1_000, Duration::from_secs(30)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconciliation_refunds_overestimates() {
        let limiter = TokenBudgetLimiter::new(1_000);
        assert!(limiter.wait_for_capacity(600, Duration::from_millis(10)).await);
        limiter.report_actual_usage(600, 100).await;

        let status = limiter.status().await;
        // 500 tokens refunded
        assert_eq!(status.available_tokens, 900);
        // Correction factor learned that estimates run high
        assert!(status.correction_factor < 1.0);
        assert_eq!(status.tokens_last_minute, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_correction_factor_inflates_underestimates() {
        let limiter = TokenBudgetLimiter::new(100_000);
        assert!(limiter.wait_for_capacity(100, Duration::from_millis(10)).await);
        limiter.report_actual_usage(100, 500).await;

        let status = limiter.status().await;
        // 0.8 * 1.0 + 0.2 * 5.0 = 1.8
        assert!((status.correction_factor - 1.8).abs() < 1e-9);
    }
}
