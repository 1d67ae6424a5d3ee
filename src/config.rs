use crate::error::{AppError, Result};

pub const QUOTE_SHEET_URL: &str = "https://docs.google.com/spreadsheets/d/e/2PACX-1vR3tiV98fFdm8rYUTaPT7Ey3IfrPwc4Mh-x1u9gV0vc0h3QClvYkqhI_OxEG-e0L5VPSeKVZX0wnfey/pub?output=csv";
pub const QUOTE_CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
pub const HOLIDAY_API_URL: &str = "https://api.upstox.com/v2/market/holidays";

/// NSE runs on IST (+05:30).
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 330;

/// Picks must be in before this local time.
pub const PICK_DEADLINE: (u32, u32) = (9, 0);

/// Market close; results are ready and settlement may run from here on.
pub const SETTLEMENT_TIME: (u32, u32) = (15, 30);

/// Head-to-head payouts for the stock game.
pub mod payout {
    pub const WINNER: i64 = 100;
    pub const TIE: i64 = 0;
    pub const NEGATIVE_LOSER: i64 = -100;
    /// Solo pick: earnings = round(return% * SOLO_MULTIPLIER).
    pub const SOLO_MULTIPLIER: f64 = 10.0;
}

/// Wrong PIN entries before a profile is locked.
pub const MAX_PIN_ATTEMPTS: i64 = 3;
pub const PIN_LENGTH: usize = 6;

pub const QUIZ_QUESTION_COUNT: usize = 100;
pub const QUIZ_OPERAND_MIN: u32 = 10;
pub const QUIZ_OPERAND_MAX: u32 = 99;
/// Network slack allowed past the quiz limit before a submission is late (ms).
pub const QUIZ_SUBMIT_GRACE_MS: u64 = 2000;

/// Addition history is pruned to this many sessions.
pub const SESSION_HISTORY_CAP: i64 = 500;

/// Bulk quote snapshot reuse window (seconds).
pub const QUOTE_SNAPSHOT_TTL_SECS: u64 = 60;

/// Holiday refresher wake-up interval (seconds). Fetches at most once per day.
pub const HOLIDAY_REFRESH_INTERVAL_SECS: u64 = 3600;

/// Settlement scheduler wake-up interval (seconds).
pub const SETTLEMENT_CHECK_INTERVAL_SECS: u64 = 60;

/// Capacity of the realtime broadcast channel.
pub const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteSourceKind {
    /// Published spreadsheet CSV export.
    Sheet,
    /// Per-symbol chart quote API.
    Chart,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// PIN for the admin console (ADMIN_PIN).
    pub admin_pin: String,
    /// PIN seeded into new profiles (DEFAULT_PIN).
    pub default_pin: String,
    /// Local cache file standing in for device storage (CACHE_PATH).
    pub cache_path: String,
    pub quote_source: QuoteSourceKind,
    pub quote_sheet_url: String,
    pub quote_chart_url: String,
    pub holiday_api_url: String,
    /// Market timezone as a fixed UTC offset (MARKET_UTC_OFFSET_MINUTES).
    pub utc_offset_minutes: i32,
    /// Whole-quiz time limit (QUIZ_DURATION_SECS).
    pub quiz_duration_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let quote_source = match std::env::var("QUOTE_SOURCE")
            .unwrap_or_else(|_| "sheet".to_string())
            .as_str()
        {
            "sheet" => QuoteSourceKind::Sheet,
            "chart" => QuoteSourceKind::Chart,
            other => {
                return Err(AppError::Config(format!(
                    "QUOTE_SOURCE must be 'sheet' or 'chart', got '{other}'"
                )))
            }
        };

        let default_pin = std::env::var("DEFAULT_PIN").unwrap_or_else(|_| "000000".to_string());
        if default_pin.len() != PIN_LENGTH || !default_pin.chars().all(|c| c.is_ascii_digit()) {
            return Err(AppError::Config(format!(
                "DEFAULT_PIN must be {PIN_LENGTH} digits"
            )));
        }

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "winnerone.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            admin_pin: std::env::var("ADMIN_PIN").unwrap_or_else(|_| "admin".to_string()),
            default_pin,
            cache_path: std::env::var("CACHE_PATH")
                .unwrap_or_else(|_| "winnerone-cache.json".to_string()),
            quote_source,
            quote_sheet_url: std::env::var("QUOTE_SHEET_URL")
                .unwrap_or_else(|_| QUOTE_SHEET_URL.to_string()),
            quote_chart_url: std::env::var("QUOTE_CHART_URL")
                .unwrap_or_else(|_| QUOTE_CHART_URL.to_string()),
            holiday_api_url: std::env::var("HOLIDAY_API_URL")
                .unwrap_or_else(|_| HOLIDAY_API_URL.to_string()),
            utc_offset_minutes: std::env::var("MARKET_UTC_OFFSET_MINUTES")
                .unwrap_or_else(|_| DEFAULT_UTC_OFFSET_MINUTES.to_string())
                .parse::<i32>()
                .map_err(|_| {
                    AppError::Config("MARKET_UTC_OFFSET_MINUTES must be an integer".to_string())
                })?,
            quiz_duration_secs: std::env::var("QUIZ_DURATION_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse::<u64>()
                .unwrap_or(10),
        })
    }

    /// Config for tests: local-only URLs, in-memory paths.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            log_level: "debug".to_string(),
            db_path: ":memory:".to_string(),
            api_port: 0,
            admin_pin: "admin".to_string(),
            default_pin: "123456".to_string(),
            cache_path: String::new(),
            quote_source: QuoteSourceKind::Sheet,
            quote_sheet_url: "http://127.0.0.1:9/sheet.csv".to_string(),
            quote_chart_url: "http://127.0.0.1:9/chart".to_string(),
            holiday_api_url: "http://127.0.0.1:9/holidays".to_string(),
            utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
            quiz_duration_secs: 10,
        }
    }
}
