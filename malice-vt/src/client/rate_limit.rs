//! Client-side request quota
//!
//! The public API tier allows a fixed number of requests per rolling
//! window (4 per minute by default). [`RateLimiter`] keeps the timestamps of
//! granted requests and tells callers how long to back off before the next
//! one. When the service itself reports an exhausted quota (HTTP 204), the
//! limiter adds an extra penalty that grows by a fixed step per consecutive
//! signal, capped at a maximum.
//!
//! The limiter does no I/O. It is shared between resolutions as
//! [`SharedRateLimiter`]; [`wait_for_slot`] is the async helper that sleeps
//! without holding the lock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::RateLimitConfig;

/// Upper bound for any window or backoff the limiter schedules
pub const MAX_WAIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Limiter shared by every resolution in the process
pub type SharedRateLimiter = Arc<Mutex<RateLimiter>>;

/// Outcome of [`RateLimiter::reserve`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// A slot was taken, the request may be sent now
    Proceed,
    /// No slot is available; try again after this long
    Wait(Duration),
}

impl Reservation {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Reservation::Proceed)
    }
}

/// Rolling-window rate limiter with additive backoff
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    backoff_step: Duration,
    max_backoff: Duration,
    /// Timestamps of granted requests inside the current window
    granted: VecDeque<Instant>,
    /// Accumulated penalty from service-side exhaustion signals
    penalty: Duration,
    blocked_until: Option<Instant>,
}

impl RateLimiter {
    /// Create a limiter allowing `max_requests` per `window`
    pub fn new(max_requests: usize, window: Duration) -> Self {
        let window = window.min(MAX_WAIT);
        Self {
            max_requests: max_requests.max(1),
            window,
            backoff_step: window,
            max_backoff: window.saturating_mul(5).min(MAX_WAIT),
            granted: VecDeque::new(),
            penalty: Duration::ZERO,
            blocked_until: None,
        }
    }

    /// Set the additive backoff step and its ceiling
    pub fn with_backoff(mut self, step: Duration, max: Duration) -> Self {
        self.backoff_step = step.min(MAX_WAIT);
        self.max_backoff = max.max(step).min(MAX_WAIT);
        self
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.requests_per_window,
            Duration::from_secs(config.window_secs),
        )
        .with_backoff(
            Duration::from_secs(config.backoff_step_secs),
            Duration::from_secs(config.max_backoff_secs),
        )
    }

    /// Wrap the limiter for sharing between tasks
    pub fn shared(self) -> SharedRateLimiter {
        Arc::new(Mutex::new(self))
    }

    /// Try to take a slot now
    pub fn reserve(&mut self) -> Reservation {
        self.reserve_at(Instant::now())
    }

    /// Try to take a slot at `now`
    pub fn reserve_at(&mut self, now: Instant) -> Reservation {
        while let Some(oldest) = self.granted.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.granted.pop_front();
            } else {
                break;
            }
        }

        if let Some(until) = self.blocked_until {
            if until > now {
                return Reservation::Wait(until - now);
            }
            self.blocked_until = None;
        }

        if self.granted.len() >= self.max_requests
            && let Some(oldest) = self.granted.front()
        {
            let free_at = *oldest + self.window;
            return Reservation::Wait(free_at.saturating_duration_since(now));
        }

        self.granted.push_back(now);
        Reservation::Proceed
    }

    /// The service reported an exhausted quota
    pub fn record_exhausted(&mut self) {
        self.record_exhausted_at(Instant::now());
    }

    pub fn record_exhausted_at(&mut self, now: Instant) {
        self.penalty = self
            .penalty
            .saturating_add(self.backoff_step)
            .min(self.max_backoff);
        self.blocked_until = Some(now + self.penalty);
        tracing::warn!(
            "Request quota exhausted, backing off for {:?}",
            self.penalty
        );
    }

    /// A request went through; forget the accumulated penalty
    pub fn record_success(&mut self) {
        self.penalty = Duration::ZERO;
    }

    /// Current penalty applied after an exhaustion signal
    pub fn penalty(&self) -> Duration {
        self.penalty
    }
}

impl Default for RateLimiter {
    /// Public API tier: 4 requests per minute
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

/// Wait until the shared limiter grants a slot.
///
/// The lock is released while sleeping so other resolutions can reserve or
/// report exhaustion in the meantime.
pub async fn wait_for_slot(limiter: &Mutex<RateLimiter>) {
    loop {
        let reservation = limiter.lock().await.reserve();
        match reservation {
            Reservation::Proceed => return,
            Reservation::Wait(delay) => {
                tracing::debug!("Rate limiter: waiting {:?} for a free slot", delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_allows_quota_then_waits() {
        let mut limiter = RateLimiter::new(4, MINUTE);
        let start = Instant::now();

        for _ in 0..4 {
            assert!(limiter.reserve_at(start).is_proceed());
        }
        assert_eq!(limiter.reserve_at(start), Reservation::Wait(MINUTE));

        let later = start + Duration::from_secs(45);
        assert_eq!(
            limiter.reserve_at(later),
            Reservation::Wait(Duration::from_secs(15))
        );

        assert!(limiter.reserve_at(start + MINUTE).is_proceed());
    }

    #[test]
    fn test_never_exceeds_quota_in_rolling_window() {
        // Simulated clock with uneven request spacing
        let mut limiter = RateLimiter::new(4, MINUTE);
        let start = Instant::now();
        let mut granted: Vec<Duration> = Vec::new();
        let mut offset = Duration::ZERO;
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;

        for _ in 0..2_000 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            offset += Duration::from_millis(seed % 9_000);

            if limiter.reserve_at(start + offset).is_proceed() {
                granted.push(offset);
            }
        }

        assert!(granted.len() > 4);
        for (i, t) in granted.iter().enumerate() {
            let in_window = granted[i..]
                .iter()
                .take_while(|other| **other - *t < MINUTE)
                .count();
            assert!(in_window <= 4, "{in_window} requests within a minute of {t:?}");
        }
    }

    #[test]
    fn test_wait_duration_lets_next_request_through() {
        let mut limiter = RateLimiter::new(2, MINUTE);
        let start = Instant::now();
        assert!(limiter.reserve_at(start).is_proceed());
        assert!(limiter.reserve_at(start + Duration::from_secs(10)).is_proceed());

        let now = start + Duration::from_secs(20);
        let Reservation::Wait(delay) = limiter.reserve_at(now) else {
            panic!("expected to wait");
        };
        assert!(limiter.reserve_at(now + delay).is_proceed());
    }

    #[test]
    fn test_exhaustion_backoff_is_additive_and_bounded() {
        let step = Duration::from_secs(10);
        let mut limiter =
            RateLimiter::new(4, MINUTE).with_backoff(step, Duration::from_secs(25));
        let start = Instant::now();

        limiter.record_exhausted_at(start);
        assert_eq!(limiter.penalty(), step);
        assert_eq!(limiter.reserve_at(start), Reservation::Wait(step));

        limiter.record_exhausted_at(start);
        assert_eq!(limiter.penalty(), Duration::from_secs(20));

        limiter.record_exhausted_at(start);
        assert_eq!(limiter.penalty(), Duration::from_secs(25));

        limiter.record_exhausted_at(start);
        assert_eq!(limiter.penalty(), Duration::from_secs(25));

        assert!(
            limiter
                .reserve_at(start + Duration::from_secs(25))
                .is_proceed()
        );

        limiter.record_success();
        assert_eq!(limiter.penalty(), Duration::ZERO);
    }

    #[test]
    fn test_exhaustion_blocks_even_with_free_slots() {
        let mut limiter = RateLimiter::new(4, MINUTE).with_backoff(MINUTE, MINUTE * 2);
        let start = Instant::now();
        assert!(limiter.reserve_at(start).is_proceed());

        limiter.record_exhausted_at(start);
        assert!(!limiter.reserve_at(start + Duration::from_secs(1)).is_proceed());
    }

    #[test]
    fn test_default_is_public_tier() {
        let mut limiter = RateLimiter::default();
        let start = Instant::now();
        for _ in 0..4 {
            assert!(limiter.reserve_at(start).is_proceed());
        }
        assert!(!limiter.reserve_at(start).is_proceed());
    }

    #[test]
    fn test_huge_configured_durations_are_clamped() {
        let config = crate::config::Config::from_toml_str(
            "[rate_limit]\n\
             requests_per_window = 1\n\
             window_secs = 9223372036854775807\n\
             backoff_step_secs = 9223372036854775807\n\
             max_backoff_secs = 9223372036854775807",
        )
        .unwrap();
        let mut limiter = RateLimiter::from_config(&config.rate_limit);
        let start = Instant::now();

        assert!(limiter.reserve_at(start).is_proceed());
        assert_eq!(limiter.reserve_at(start), Reservation::Wait(MAX_WAIT));

        limiter.record_exhausted_at(start);
        limiter.record_exhausted_at(start);
        assert_eq!(limiter.penalty(), MAX_WAIT);
        assert_eq!(limiter.reserve_at(start), Reservation::Wait(MAX_WAIT));
    }

    #[tokio::test]
    async fn test_wait_for_slot_sleeps_through_backoff() {
        let limiter = RateLimiter::new(4, MINUTE)
            .with_backoff(Duration::from_millis(50), Duration::from_millis(50))
            .shared();
        let start = Instant::now();
        limiter.lock().await.record_exhausted();

        wait_for_slot(&limiter).await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
