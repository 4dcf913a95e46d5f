//! `RpcProviderHealth`, §3 — per-(chain, url) health/latency/error counters.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// In-memory health record for a single RPC endpoint. Cheap to read from
/// many concurrent callers; the pool picks providers by scanning these.
pub struct ProviderHealth {
    pub url: String,
    healthy: AtomicBool,
    consecutive_errors: AtomicU32,
    response_time_ms: AtomicU64,
    unhealthy_since: Mutex<Option<Instant>>,
}

impl ProviderHealth {
    pub fn new(url: String) -> Self {
        Self {
            url,
            healthy: AtomicBool::new(true),
            consecutive_errors: AtomicU32::new(0),
            response_time_ms: AtomicU64::new(0),
            unhealthy_since: Mutex::new(None),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn response_time_ms(&self) -> u64 {
        self.response_time_ms.load(Ordering::Relaxed)
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::Relaxed)
    }

    /// True if the provider should be offered as a candidate: either it is
    /// healthy, or it has been unhealthy for at least `cooldown`.
    pub async fn is_candidate(&self, cooldown: Duration) -> bool {
        if self.is_healthy() {
            return true;
        }
        let since = self.unhealthy_since.lock().await;
        match *since {
            Some(t) => t.elapsed() >= cooldown,
            None => true,
        }
    }

    /// Record a successful call. Updates a simple exponential moving
    /// average of response time and clears the error streak.
    pub fn record_success(&self, elapsed: Duration) {
        let new_ms = elapsed.as_millis() as u64;
        let prev = self.response_time_ms.load(Ordering::Relaxed);
        let ema = if prev == 0 { new_ms } else { (prev * 3 + new_ms) / 4 };
        self.response_time_ms.store(ema, Ordering::Relaxed);
        self.consecutive_errors.store(0, Ordering::Relaxed);
        self.healthy.store(true, Ordering::Relaxed);
    }

    /// Record a failed call. Once `threshold` consecutive failures have
    /// accrued, marks the provider unhealthy and stamps `unhealthy_since`.
    pub async fn record_failure(&self, threshold: u32) {
        let count = self.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= threshold && self.healthy.swap(false, Ordering::Relaxed) {
            *self.unhealthy_since.lock().await = Some(Instant::now());
        }
    }

    /// Restore health after a successful probe (e.g. `eth_blockNumber`).
    pub async fn restore(&self) {
        self.healthy.store(true, Ordering::Relaxed);
        self.consecutive_errors.store(0, Ordering::Relaxed);
        *self.unhealthy_since.lock().await = None;
    }
}

impl std::fmt::Debug for ProviderHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHealth")
            .field("url", &self.url)
            .field("healthy", &self.is_healthy())
            .field("response_time_ms", &self.response_time_ms())
            .field("consecutive_errors", &self.consecutive_errors())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn becomes_unhealthy_after_threshold() {
        let h = ProviderHealth::new("http://a".into());
        h.record_failure(3).await;
        h.record_failure(3).await;
        assert!(h.is_healthy());
        h.record_failure(3).await;
        assert!(!h.is_healthy());
    }

    #[tokio::test]
    async fn success_clears_error_streak_and_restores_health() {
        let h = ProviderHealth::new("http://a".into());
        for _ in 0..3 {
            h.record_failure(3).await;
        }
        assert!(!h.is_healthy());
        h.record_success(Duration::from_millis(10));
        assert!(h.is_healthy());
        assert_eq!(h.consecutive_errors(), 0);
    }

    #[tokio::test]
    async fn candidate_after_cooldown_even_if_unhealthy() {
        let h = ProviderHealth::new("http://a".into());
        for _ in 0..3 {
            h.record_failure(3).await;
        }
        assert!(!h.is_candidate(Duration::from_secs(3600)).await);
        assert!(h.is_candidate(Duration::from_millis(0)).await);
    }
}
