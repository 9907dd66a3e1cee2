use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::time::Instant;

/// Steady-state request rate allowed against a single host.
const RATE_PER_SEC: f64 = 4.0;
/// Requests that may be issued back-to-back before pacing kicks in.
const BURST: f64 = 10.0;

/// One limiter per host, shared by every environment targeting that host for
/// the lifetime of the process.
static REGISTRY: Lazy<Mutex<HashMap<String, Arc<Limiter>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Get or create the limiter for a domain.
pub fn for_domain(domain: &str) -> Arc<Limiter> {
    let mut registry = REGISTRY.lock().expect("limiter registry poisoned");
    registry
        .entry(domain.to_string())
        .or_insert_with(|| Arc::new(Limiter::new(RATE_PER_SEC, BURST)))
        .clone()
}

struct BucketState {
    tokens: f64,
    refilled_at: Instant,
    /// Earliest instant any request may proceed, pushed forward when the
    /// server answers 429 with a Retry-After.
    not_before: Instant,
}

/// Token bucket limiter. `wait` suspends until a token is available; tokens
/// refill continuously at the configured rate up to the burst cap.
pub struct Limiter {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl Limiter {
    pub fn new(rate: f64, burst: f64) -> Limiter {
        let now = Instant::now();
        Limiter {
            rate,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                refilled_at: now,
                not_before: now,
            }),
        }
    }

    /// Block until a request token is available.
    pub async fn wait(&self) {
        loop {
            let delay = {
                let mut state = self.state.lock().expect("limiter poisoned");
                let now = Instant::now();

                let elapsed = now.saturating_duration_since(state.refilled_at);
                state.tokens = (state.tokens + elapsed.as_secs_f64() * self.rate).min(self.burst);
                state.refilled_at = now;

                if now < state.not_before {
                    state.not_before - now
                } else if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                } else {
                    Duration::from_secs_f64((1.0 - state.tokens) / self.rate)
                }
            };
            tokio::time::sleep(delay).await;
        }
    }

    /// Hold every caller back for the given duration, draining the bucket.
    pub fn pause_for(&self, duration: Duration) {
        let mut state = self.state.lock().expect("limiter poisoned");
        state.tokens = 0.0;
        state.not_before = Instant::now() + duration;
    }
}
