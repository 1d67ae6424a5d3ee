//! Round-trip times of the two outbound feeds: the quote source (sheet CSV
//! or chart API, one sample per `MarketData::fetch_live`) and the exchange
//! holiday list (one sample per refresh). Failed requests are sampled too,
//! so a slow timeout shows up in p99. Served on `/stats/latency`.

use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

/// Longest round trip kept, in microseconds. Anything slower is clamped.
const MAX_ROUND_TRIP_US: u64 = 120_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    Quotes,
    Holidays,
}

/// Percentiles for one feed, or both merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, serde::Deserialize)]
pub struct LatencySummary {
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub sample_count: u64,
}

impl LatencySummary {
    fn from_histogram(h: &Histogram<u64>) -> Self {
        if h.is_empty() {
            return Self::default();
        }
        let ms = |q: f64| Some(h.value_at_quantile(q) as f64 / 1000.0);
        Self {
            p50_ms: ms(0.5),
            p95_ms: ms(0.95),
            p99_ms: ms(0.99),
            sample_count: h.len(),
        }
    }
}

/// Written by the quote fetcher and the holiday refresher, read by the API.
pub struct FeedLatency {
    quotes: Mutex<Histogram<u64>>,
    holidays: Mutex<Histogram<u64>>,
}

fn round_trip_histogram() -> Histogram<u64> {
    Histogram::new_with_bounds(1, MAX_ROUND_TRIP_US, 3).expect("constant histogram bounds are valid")
}

impl FeedLatency {
    pub fn new() -> Self {
        Self {
            quotes: Mutex::new(round_trip_histogram()),
            holidays: Mutex::new(round_trip_histogram()),
        }
    }

    fn slot(&self, feed: Feed) -> &Mutex<Histogram<u64>> {
        match feed {
            Feed::Quotes => &self.quotes,
            Feed::Holidays => &self.holidays,
        }
    }

    pub fn record(&self, feed: Feed, round_trip: Duration) {
        let us = (round_trip.as_micros() as u64).clamp(1, MAX_ROUND_TRIP_US);
        if let Ok(mut h) = self.slot(feed).lock() {
            // In range after the clamp.
            let _ = h.record(us);
        }
    }

    pub fn summary(&self, feed: Feed) -> LatencySummary {
        self.slot(feed)
            .lock()
            .map(|h| LatencySummary::from_histogram(&h))
            .unwrap_or_default()
    }

    /// Both feeds merged into one distribution.
    pub fn overall(&self) -> LatencySummary {
        let mut merged = round_trip_histogram();
        for feed in [Feed::Quotes, Feed::Holidays] {
            if let Ok(h) = self.slot(feed).lock() {
                let _ = merged.add(&*h);
            }
        }
        LatencySummary::from_histogram(&merged)
    }
}

impl Default for FeedLatency {
    fn default() -> Self {
        Self::new()
    }
}
