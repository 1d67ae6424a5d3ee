pub mod cache;
pub mod chart;
pub mod sheet;
pub mod symbols;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::api::health::HealthState;
use crate::api::latency::{Feed, FeedLatency};
use crate::config::{Config, QuoteSourceKind, QUOTE_SNAPSHOT_TTL_SECS};
use crate::error::{AppError, Result};
use crate::state::LocalStore;
use crate::types::Quote;

pub use cache::QuoteCache;
pub use symbols::{canonical_symbol, NIFTY_50_SYMBOLS};

/// Concurrent per-symbol requests against the chart API.
const CHART_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Serialize)]
pub struct QuoteSnapshot {
    pub quotes: HashMap<String, Quote>,
    /// True when the live feed failed and these came from cache.
    pub stale: bool,
}

/// Live quote feed plus its cache.
pub struct MarketData {
    client: reqwest::Client,
    source: QuoteSourceKind,
    sheet_url: String,
    chart_url: String,
    cache: QuoteCache,
    latency: Arc<FeedLatency>,
    health: Arc<HealthState>,
}

impl MarketData {
    pub fn new(
        cfg: &Config,
        local: Arc<LocalStore>,
        latency: Arc<FeedLatency>,
        health: Arc<HealthState>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            source: cfg.quote_source,
            sheet_url: cfg.quote_sheet_url.clone(),
            chart_url: cfg.quote_chart_url.clone(),
            cache: QuoteCache::new(local, Duration::from_secs(QUOTE_SNAPSHOT_TTL_SECS)),
            latency,
            health,
        })
    }

    pub fn cache(&self) -> &QuoteCache {
        &self.cache
    }

    /// Quotes for `symbols` on `date`. Never fails: a feed error degrades to
    /// whatever is cached, flagged `stale`.
    pub async fn snapshot(&self, date: NaiveDate, symbols: &[&str]) -> QuoteSnapshot {
        if let Some(quotes) = self.cache.fresh_snapshot(date, symbols) {
            return QuoteSnapshot { quotes, stale: false };
        }

        match self.fetch_live(symbols).await {
            Ok(quotes) => {
                self.cache.store(date, symbols, &quotes);
                let quotes = symbols
                    .iter()
                    .filter_map(|s| quotes.get(*s).map(|q| (s.to_string(), *q)))
                    .collect();
                QuoteSnapshot { quotes, stale: false }
            }
            Err(e) => {
                warn!("Quote feed unavailable, serving cached quotes: {e}");
                QuoteSnapshot {
                    quotes: self.cache.cached_for(date, symbols),
                    stale: true,
                }
            }
        }
    }

    /// Bypass the snapshot TTL and fetch from the feed now.
    pub async fn fetch_live(&self, symbols: &[&str]) -> Result<HashMap<String, Quote>> {
        let started = Instant::now();
        let result = match self.source {
            QuoteSourceKind::Sheet => self.fetch_sheet().await,
            QuoteSourceKind::Chart => self.fetch_chart(symbols).await,
        };
        self.latency.record(Feed::Quotes, started.elapsed());
        self.health.set_feed_ok(result.is_ok());

        let quotes = result?;
        info!(
            source = ?self.source,
            quotes = quotes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Quote feed fetched"
        );
        Ok(quotes)
    }

    async fn fetch_sheet(&self) -> Result<HashMap<String, Quote>> {
        let resp = self.client.get(&self.sheet_url).send().await?;
        if !resp.status().is_success() {
            return Err(AppError::Feed(format!("sheet feed returned {}", resp.status())));
        }
        let text = resp.text().await?;
        let quotes = sheet::parse_sheet_csv(&text);
        if quotes.is_empty() {
            return Err(AppError::Feed("sheet feed had no usable rows".to_string()));
        }
        Ok(quotes)
    }

    async fn fetch_chart(&self, symbols: &[&str]) -> Result<HashMap<String, Quote>> {
        let results: Vec<(String, Result<Quote>)> = stream::iter(symbols.iter().map(|s| s.to_string()).collect::<Vec<String>>())
            .map(|symbol: String| async move {
                let url = chart::chart_url(&self.chart_url, &symbol);
                let quote = async {
                    let v: serde_json::Value = self.client.get(&url).send().await?.json().await?;
                    chart::parse_chart_quote(&v)
                }
                .await;
                (symbol, quote)
            })
            .buffer_unordered(CHART_CONCURRENCY)
            .collect()
            .await;

        let mut quotes = HashMap::with_capacity(results.len());
        let mut failures = 0usize;
        for (symbol, quote) in results {
            match quote {
                Ok(q) => {
                    quotes.insert(symbol, q);
                }
                Err(e) => {
                    failures += 1;
                    debug!(%symbol, "Chart quote failed: {e}");
                }
            }
        }

        if quotes.is_empty() && !symbols.is_empty() {
            return Err(AppError::Feed(format!("all {failures} chart requests failed")));
        }
        if failures > 0 {
            warn!("Chart feed: {} of {} symbols failed", failures, symbols.len());
        }
        Ok(quotes)
    }
}
