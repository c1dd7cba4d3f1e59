//! Request/token rate limiting for the reasoning service
//!
//! Sliding 60 second window over requests and estimated tokens, plus a cap on
//! requests in flight. Callers wait for capacity; nothing is rejected.

use crate::config::RateLimitConfig;
use crate::reasoning::ReasoningError;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Window {
    /// Admission time and token estimate of each request in the window
    entries: VecDeque<(Instant, u64)>,
}

impl Window {
    fn prune(&mut self, now: Instant) {
        while let Some(&(at, _)) = self.entries.front() {
            if now.duration_since(at) >= WINDOW {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    fn tokens(&self) -> u64 {
        self.entries.iter().map(|(_, t)| t).sum()
    }
}

pub struct RateLimiter {
    requests_per_minute: usize,
    tokens_per_minute: u64,
    window: Mutex<Window>,
    in_flight: Semaphore,
}

/// Held for the duration of one request
pub struct RateLimitPermit<'a> {
    _permit: SemaphorePermit<'a>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            requests_per_minute: config.requests_per_minute.max(1) as usize,
            tokens_per_minute: config.tokens_per_minute.max(1),
            window: Mutex::new(Window::default()),
            in_flight: Semaphore::new(config.max_concurrent_requests.max(1)),
        }
    }

    /// Wait until a request estimated at `tokens` fits all budgets.
    ///
    /// A request larger than the whole token budget is admitted alone once the
    /// window is empty.
    pub async fn acquire(&self, tokens: u64) -> Result<RateLimitPermit<'_>, ReasoningError> {
        let permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| ReasoningError::RateLimiterClosed)?;

        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                window.prune(now);

                let fits_requests = window.entries.len() < self.requests_per_minute;
                let fits_tokens = window.entries.is_empty()
                    || window.tokens() + tokens <= self.tokens_per_minute;

                if fits_requests && fits_tokens {
                    window.entries.push_back((now, tokens));
                    return Ok(RateLimitPermit { _permit: permit });
                }

                // capacity frees up when the oldest entry leaves the window
                match window.entries.front() {
                    Some(&(oldest, _)) => (oldest + WINDOW).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };

            debug!(wait_ms = wait.as_millis() as u64, tokens, "Rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Requests admitted within the current window
    pub async fn requests_in_window(&self) -> usize {
        let mut window = self.window.lock().await;
        window.prune(Instant::now());
        window.entries.len()
    }
}
