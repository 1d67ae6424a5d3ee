//! Daily-window gate: which calendar day counts as "today", whether the
//! market trades on it, and where the current time falls relative to the
//! pick deadline and market close.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use tracing::warn;

use crate::config::{PICK_DEADLINE, SETTLEMENT_TIME};
use crate::types::{ClosedReason, MarketWindow, Settings};

/// Anything that can answer "is this date an exchange holiday?".
pub trait HolidayLookup {
    fn is_holiday(&self, date: NaiveDate) -> bool;
}

impl HolidayLookup for HashSet<NaiveDate> {
    fn is_holiday(&self, date: NaiveDate) -> bool {
        self.contains(&date)
    }
}

impl HolidayLookup for [NaiveDate] {
    fn is_holiday(&self, date: NaiveDate) -> bool {
        self.contains(&date)
    }
}

/// Converts wall-clock UTC into market-local time, honouring the admin date override.
#[derive(Debug, Clone, Copy)]
pub struct GameClock {
    offset: FixedOffset,
}

impl GameClock {
    pub fn new(utc_offset_minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
        Self { offset }
    }

    pub fn local_now(&self, real_now: DateTime<Utc>) -> NaiveDateTime {
        real_now.with_timezone(&self.offset).naive_local()
    }

    /// The "now" all game rules use.
    pub fn effective_now(&self, settings: &Settings, real_now: DateTime<Utc>) -> NaiveDateTime {
        effective_now(settings.date_override.as_deref(), self.local_now(real_now))
    }

    /// Epoch milliseconds of a market-local timestamp.
    pub fn to_epoch_ms(&self, local: NaiveDateTime) -> i64 {
        local
            .and_local_timezone(self.offset)
            .single()
            .map(|dt| dt.timestamp_millis())
            .unwrap_or_else(|| local.and_utc().timestamp_millis())
    }
}

/// Parse an override against the real local time. A date-only override keeps
/// the real time of day; a full timestamp is used as-is.
pub fn parse_override(raw: &str, real_local: NaiveDateTime) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(real_local.time()))
}

/// Apply an override to the real local time. Anything unparsable falls back
/// to the real time.
pub fn effective_now(date_override: Option<&str>, real_local: NaiveDateTime) -> NaiveDateTime {
    let Some(raw) = date_override.map(str::trim).filter(|s| !s.is_empty()) else {
        return real_local;
    };

    parse_override(raw, real_local).unwrap_or_else(|| {
        warn!(date_override = raw, "Ignoring unparsable date override");
        real_local
    })
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Closed reason for the date, if the market does not trade on it.
/// Weekends are decided locally; the holiday list is only consulted on weekdays.
pub fn closed_reason<H: HolidayLookup + ?Sized>(date: NaiveDate, holidays: &H) -> Option<ClosedReason> {
    if is_weekend(date) {
        Some(ClosedReason::Weekend)
    } else if holidays.is_holiday(date) {
        Some(ClosedReason::Holiday)
    } else {
        None
    }
}

pub fn is_market_open_day<H: HolidayLookup + ?Sized>(date: NaiveDate, holidays: &H) -> bool {
    closed_reason(date, holidays).is_none()
}

fn hm(t: (u32, u32)) -> NaiveTime {
    NaiveTime::from_hms_opt(t.0, t.1, 0).unwrap_or(NaiveTime::MIN)
}

pub fn is_before_pick_deadline(now: NaiveDateTime) -> bool {
    now.time() < hm(PICK_DEADLINE)
}

pub fn is_after_market_close(now: NaiveDateTime) -> bool {
    now.time() >= hm(SETTLEMENT_TIME)
}

pub fn market_window<H: HolidayLookup + ?Sized>(now: NaiveDateTime, holidays: &H) -> MarketWindow {
    if let Some(reason) = closed_reason(now.date(), holidays) {
        return MarketWindow::Closed(reason);
    }
    if is_before_pick_deadline(now) {
        MarketWindow::AcceptingPicks
    } else if is_after_market_close(now) {
        MarketWindow::ResultsReady
    } else {
        MarketWindow::Trading
    }
}
