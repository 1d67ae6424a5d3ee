use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use dashmap::DashSet;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::api::latency::{Feed, FeedLatency};
use crate::calendar::{GameClock, HolidayLookup};
use crate::config::{Config, HOLIDAY_REFRESH_INTERVAL_SECS};
use crate::db::models::{date_key, DATE_FMT};
use crate::error::{AppError, Result};
use crate::state::LocalStore;

const HOLIDAYS_KEY: &str = "holidays";
const LAST_FETCH_KEY: &str = "holidays_last_fetch";

/// Pull the `data[].date` strings out of a holiday list response.
/// Entries without a parsable date are skipped.
pub fn parse_holidays(v: &serde_json::Value) -> Result<Vec<NaiveDate>> {
    let data = v
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| AppError::Feed("holiday response has no data array".to_string()))?;

    Ok(data
        .iter()
        .filter_map(|h| h.get("date")?.as_str())
        .filter_map(|s| NaiveDate::parse_from_str(s.trim(), DATE_FMT).ok())
        .collect())
}

// ---------------------------------------------------------------------------
// HolidayCalendar
// ---------------------------------------------------------------------------

/// Exchange holiday list. Loaded from the local store at startup and
/// refreshed from the remote list at most once per day.
pub struct HolidayCalendar {
    client: reqwest::Client,
    url: String,
    dates: DashSet<NaiveDate>,
    local: Arc<LocalStore>,
    latency: Arc<FeedLatency>,
}

impl HolidayCalendar {
    pub fn new(cfg: &Config, local: Arc<LocalStore>, latency: Arc<FeedLatency>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let dates = DashSet::new();
        for d in local.get::<Vec<NaiveDate>>(HOLIDAYS_KEY).unwrap_or_default() {
            dates.insert(d);
        }
        debug!("Holiday cache loaded with {} dates", dates.len());

        Ok(Self {
            client,
            url: cfg.holiday_api_url.clone(),
            dates,
            local,
            latency,
        })
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    /// Date of the last successful fetch, if any.
    pub fn last_fetched(&self) -> Option<NaiveDate> {
        self.local.get(LAST_FETCH_KEY)
    }

    /// Fetch the list unless it was already fetched on `today`. A failed fetch
    /// leaves the cached list in place. Returns true if a fetch succeeded.
    pub async fn refresh_if_stale(&self, today: NaiveDate) -> bool {
        if self.last_fetched() == Some(today) {
            return false;
        }
        match self.fetch().await {
            Ok(list) => {
                self.replace(&list, today);
                info!(holidays = list.len(), "Holiday list updated for {}", date_key(today));
                true
            }
            Err(e) => {
                warn!("Holiday fetch failed, keeping {} cached dates: {e}", self.len());
                false
            }
        }
    }

    async fn fetch(&self) -> Result<Vec<NaiveDate>> {
        let started = Instant::now();
        let resp = self
            .client
            .get(&self.url)
            .header("Accept", "application/json")
            .send()
            .await;
        self.latency.record(Feed::Holidays, started.elapsed());

        let resp = resp?;
        if !resp.status().is_success() {
            return Err(AppError::Feed(format!("holiday list returned {}", resp.status())));
        }
        let v: serde_json::Value = resp.json().await?;
        parse_holidays(&v)
    }

    fn replace(&self, list: &[NaiveDate], today: NaiveDate) {
        self.dates.clear();
        for d in list {
            self.dates.insert(*d);
        }
        if let Err(e) = self.local.set(HOLIDAYS_KEY, &list) {
            warn!("Failed to persist holiday cache: {e}");
        }
        if let Err(e) = self.local.set(LAST_FETCH_KEY, &today) {
            warn!("Failed to persist holiday fetch stamp: {e}");
        }
    }

    #[cfg(test)]
    pub fn insert(&self, date: NaiveDate) {
        self.dates.insert(date);
    }
}

impl HolidayLookup for HolidayCalendar {
    fn is_holiday(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date)
    }
}

// ---------------------------------------------------------------------------
// HolidayRefresher
// ---------------------------------------------------------------------------

/// Wakes hourly; the calendar itself skips the fetch once today's is done.
pub struct HolidayRefresher {
    calendar: Arc<HolidayCalendar>,
    clock: GameClock,
}

impl HolidayRefresher {
    pub fn new(calendar: Arc<HolidayCalendar>, clock: GameClock) -> Self {
        Self { calendar, clock }
    }

    pub async fn run(self) {
        let mut ticker = interval(Duration::from_secs(HOLIDAY_REFRESH_INTERVAL_SECS));

        loop {
            ticker.tick().await;
            let today = self.clock.local_now(Utc::now()).date();
            self.calendar.refresh_if_stale(today).await;
            if self.calendar.len() == 0 {
                error!("Holiday list is empty; only weekends will close the market");
            }
        }
    }
}
