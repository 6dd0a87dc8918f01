//! Request rate limiting.
//!
//! A token bucket with a burst of one: the first request goes out
//! immediately, every following request is spaced by `1/rate` seconds.
//! A rate of zero or less means unlimited. The limiter is shared across all
//! files of a run and is safe to use from concurrent callers.
//!
//! Changing the rate mid-run only affects tokens handed out afterwards; a
//! waiter that has already computed its delay keeps it.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::{Error, Result};

#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    /// Spacing between tokens; `None` is unlimited.
    interval: Option<Duration>,
    /// Earliest instant the next token becomes available.
    next: Instant,
}

/// A claimed token plus the delay until it becomes usable.
#[derive(Debug, Clone, Copy)]
pub struct Reservation {
    delay: Duration,
}

impl Reservation {
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl RateLimiter {
    /// Creates a limiter allowing `rate` requests per second; `rate ≤ 0` is
    /// unlimited.
    pub fn new(rate: f64) -> Self {
        Self {
            state: Mutex::new(State {
                interval: interval_for(rate),
                next: Instant::now(),
            }),
        }
    }

    /// Changes the rate. Applies to subsequent tokens only.
    pub fn set_rate(&self, rate: f64) {
        let mut state = self.state.lock().expect("rate limiter poisoned");
        state.interval = interval_for(rate);
    }

    /// Non-blocking probe: takes a token if one is available right now.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock().expect("rate limiter poisoned");
        let Some(interval) = state.interval else {
            return true;
        };
        let now = Instant::now();
        if state.next <= now {
            state.next = now + interval;
            true
        } else {
            false
        }
    }

    /// Claims the next token and reports how long until it is usable.
    pub fn reserve(&self) -> Reservation {
        let mut state = self.state.lock().expect("rate limiter poisoned");
        let Some(interval) = state.interval else {
            return Reservation {
                delay: Duration::ZERO,
            };
        };
        let now = Instant::now();
        let start = state.next.max(now);
        let delay = start - now;
        state.next = start + interval;
        Reservation { delay }
    }

    /// Blocks until a token is available or the run is cancelled.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
        let reservation = self.reserve();
        if reservation.delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(reservation.delay) => Ok(()),
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }
}

fn interval_for(rate: f64) -> Option<Duration> {
    if rate > 0.0 {
        Some(Duration::from_secs_f64(1.0 / rate))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_never_delays() {
        let limiter = RateLimiter::new(0.0);
        let cancel = CancellationToken::new();
        let start = Instant::now();
        for _ in 0..100 {
            limiter.wait(&cancel).await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(limiter.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_one_spacing() {
        let limiter = RateLimiter::new(10.0);
        let cancel = CancellationToken::new();

        let start = Instant::now();
        limiter.wait(&cancel).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.wait(&cancel).await.unwrap();
        limiter.wait(&cancel).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_allow_is_non_blocking() {
        let limiter = RateLimiter::new(1.0);
        assert!(limiter.allow());
        assert!(!limiter.allow());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_reports_delay() {
        let limiter = RateLimiter::new(2.0);
        assert_eq!(limiter.reserve().delay(), Duration::ZERO);
        assert_eq!(limiter.reserve().delay(), Duration::from_millis(500));
        assert_eq!(limiter.reserve().delay(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_rate_applies_to_subsequent_tokens() {
        let limiter = RateLimiter::new(10.0);
        let cancel = CancellationToken::new();

        limiter.wait(&cancel).await.unwrap();
        limiter.set_rate(2.0);

        // The token claimed under the old rate keeps its 100ms spacing; the
        // one after it is spaced by the new 500ms interval.
        let start = Instant::now();
        limiter.wait(&cancel).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(100));
        limiter.wait(&cancel).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_cancelled() {
        let limiter = RateLimiter::new(1.0);
        let cancel = CancellationToken::new();

        limiter.wait(&cancel).await.unwrap();
        cancel.cancel();
        let err = limiter.wait(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_to_unlimited() {
        let limiter = RateLimiter::new(1.0);
        let cancel = CancellationToken::new();
        limiter.wait(&cancel).await.unwrap();
        limiter.set_rate(0.0);
        let start = Instant::now();
        limiter.wait(&cancel).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
