//! Shared health state for the /health endpoint.
//! Updated by the quote feed and the settlement job.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Shared health metrics. Updated by background components, read by API.
#[derive(Default)]
pub struct HealthState {
    /// True when the last quote fetch succeeded.
    pub feed_ok: AtomicBool,
    /// Epoch ms of the last settlement run (0 = never).
    pub last_settlement_ms: AtomicI64,
    /// Picks settled since startup.
    pub picks_settled: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_feed_ok(&self, v: bool) {
        self.feed_ok.store(v, Ordering::Relaxed);
    }

    pub fn record_settlement(&self, at_ms: i64, settled: u64) {
        self.last_settlement_ms.store(at_ms, Ordering::Relaxed);
        self.picks_settled.fetch_add(settled, Ordering::Relaxed);
    }

    pub fn feed_ok(&self) -> bool {
        self.feed_ok.load(Ordering::Relaxed)
    }

    pub fn last_settlement_ms(&self) -> i64 {
        self.last_settlement_ms.load(Ordering::Relaxed)
    }

    pub fn picks_settled(&self) -> u64 {
        self.picks_settled.load(Ordering::Relaxed)
    }
}
