use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use dashmap::DashMap;
use tracing::warn;

use crate::db::models::date_key;
use crate::state::LocalStore;
use crate::types::Quote;

fn local_key(symbol: &str, date: NaiveDate) -> String {
    format!("quote:{symbol}:{}", date_key(date))
}

struct Snapshot {
    date: NaiveDate,
    fetched_at: Instant,
    /// Symbols the fetch was asked for, found or not.
    requested: HashSet<String>,
    quotes: HashMap<String, Quote>,
}

/// Two layers of quote caching:
/// - a short-lived bulk snapshot so repeated picker loads reuse one fetch;
/// - per (symbol, date) entries, mirrored into the local store, used as the
///   fallback when a live fetch fails.
pub struct QuoteCache {
    by_day: DashMap<(String, NaiveDate), Quote>,
    snapshot: Mutex<Option<Snapshot>>,
    local: Arc<LocalStore>,
    ttl: Duration,
}

impl QuoteCache {
    pub fn new(local: Arc<LocalStore>, ttl: Duration) -> Self {
        Self {
            by_day: DashMap::new(),
            snapshot: Mutex::new(None),
            local,
            ttl,
        }
    }

    /// Quotes for `symbols` from the bulk snapshot, if it was fetched for
    /// `date` within the TTL and asked for every one of them.
    pub fn fresh_snapshot(&self, date: NaiveDate, symbols: &[&str]) -> Option<HashMap<String, Quote>> {
        let guard = self.snapshot.lock().ok()?;
        let snap = guard.as_ref()?;
        if snap.date != date || snap.fetched_at.elapsed() >= self.ttl {
            return None;
        }
        if !symbols.iter().all(|s| snap.requested.contains(*s) || snap.quotes.contains_key(*s)) {
            return None;
        }
        Some(
            symbols
                .iter()
                .filter_map(|s| snap.quotes.get(*s).map(|q| (s.to_string(), *q)))
                .collect(),
        )
    }

    /// Record a successful live fetch for `requested`.
    pub fn store(&self, date: NaiveDate, requested: &[&str], quotes: &HashMap<String, Quote>) {
        for (symbol, quote) in quotes {
            self.by_day.insert((symbol.clone(), date), *quote);
        }
        if let Err(e) = self
            .local
            .set_many(quotes.iter().map(|(s, q)| (local_key(s, date), *q)))
        {
            warn!("Failed to mirror {} quotes to local cache: {e}", quotes.len());
        }
        if let Ok(mut guard) = self.snapshot.lock() {
            *guard = Some(Snapshot {
                date,
                fetched_at: Instant::now(),
                requested: requested.iter().map(|s| s.to_string()).collect(),
                quotes: quotes.clone(),
            });
        }
    }

    /// Last known quote for a symbol on a date: memory first, then local store.
    pub fn get(&self, symbol: &str, date: NaiveDate) -> Option<Quote> {
        if let Some(q) = self.by_day.get(&(symbol.to_string(), date)) {
            return Some(*q);
        }
        let q: Quote = self.local.get(&local_key(symbol, date))?;
        self.by_day.insert((symbol.to_string(), date), q);
        Some(q)
    }

    /// Whatever is cached for `date` among `symbols`.
    pub fn cached_for(&self, date: NaiveDate, symbols: &[&str]) -> HashMap<String, Quote> {
        symbols
            .iter()
            .filter_map(|s| self.get(s, date).map(|q| (s.to_string(), q)))
            .collect()
    }

    /// Forget the bulk snapshot so the next read goes to the feed.
    pub fn invalidate_snapshot(&self) {
        if let Ok(mut guard) = self.snapshot.lock() {
            *guard = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn quotes() -> HashMap<String, Quote> {
        [("INFY".to_string(), Quote { price: 1520.0, change_percent: 1.2 })]
            .into_iter()
            .collect()
    }

    #[test]
    fn snapshot_is_per_date_and_expires() {
        let cache = QuoteCache::new(LocalStore::in_memory(), Duration::from_secs(60));
        cache.store(d("2025-03-13"), &["INFY"], &quotes());
        assert!(cache.fresh_snapshot(d("2025-03-13"), &["INFY"]).is_some());
        assert!(cache.fresh_snapshot(d("2025-03-14"), &["INFY"]).is_none());

        let expired = QuoteCache::new(LocalStore::in_memory(), Duration::ZERO);
        expired.store(d("2025-03-13"), &["INFY"], &quotes());
        assert!(expired.fresh_snapshot(d("2025-03-13"), &["INFY"]).is_none());
    }

    #[test]
    fn snapshot_only_serves_symbols_it_was_asked_for() {
        let cache = QuoteCache::new(LocalStore::in_memory(), Duration::from_secs(60));
        cache.store(d("2025-03-13"), &["INFY", "WIPRO"], &quotes());
        let hit = cache.fresh_snapshot(d("2025-03-13"), &["WIPRO", "INFY"]).unwrap();
        assert_eq!(hit.len(), 1);
        assert!(cache.fresh_snapshot(d("2025-03-13"), &["TCS"]).is_none());
    }

    #[test]
    fn falls_back_to_local_store_after_restart() {
        let local = LocalStore::in_memory();
        QuoteCache::new(Arc::clone(&local), Duration::from_secs(60)).store(d("2025-03-13"), &["INFY"], &quotes());

        let fresh = QuoteCache::new(local, Duration::from_secs(60));
        let q = fresh.get("INFY", d("2025-03-13")).unwrap();
        assert!((q.change_percent - 1.2).abs() < 1e-9);
        assert!(fresh.get("INFY", d("2025-03-14")).is_none());
    }

    #[test]
    fn cached_for_skips_unknown_symbols() {
        let cache = QuoteCache::new(LocalStore::in_memory(), Duration::from_secs(60));
        cache.store(d("2025-03-13"), &["INFY", "TCS"], &quotes());
        let got = cache.cached_for(d("2025-03-13"), &["INFY", "TCS"]);
        assert_eq!(got.len(), 1);
    }
}
