/// Database row types matching migrations/0001_init.sql.
/// Converted into the domain types in `crate::types` at the repository edge.
use chrono::NaiveDate;

use crate::error::AppError;
use crate::types::{GameSession, NiftyPick, Player, Profile, QuestionResult, StockHistoryEntry};

#[derive(Debug, sqlx::FromRow)]
pub struct SettingRow {
    pub key: String,
    pub value: String,
}

#[derive(Debug, sqlx::FromRow)]
pub struct ProfileRow {
    pub player: String,
    pub pin: String,
    pub failed_attempts: i64,
    pub is_locked: bool,
}

#[derive(Debug, sqlx::FromRow)]
pub struct SessionRow {
    pub id: String,
    pub player: String,
    pub score: i64,
    pub wrong: i64,
    pub earnings: i64,
    pub timestamp: i64,
    pub day: String,
    /// JSON array of `QuestionResult`.
    pub results: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct PickRow {
    pub id: i64,
    pub date: String,
    pub player: String,
    pub stock_symbol: String,
    pub stock_return: Option<f64>,
    pub earnings: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct StockHistoryRow {
    pub date: String,
    pub symbol: String,
    pub close_percentage: f64,
}

pub const DATE_FMT: &str = "%Y-%m-%d";

pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_FMT).to_string()
}

fn decode_date(s: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(s, DATE_FMT)
        .map_err(|e| AppError::Database(sqlx::Error::Decode(Box::new(e))))
}

fn decode_player(s: &str) -> Result<Player, AppError> {
    s.parse::<Player>()
        .map_err(|_| AppError::Database(sqlx::Error::Decode(format!("unknown player '{s}'").into())))
}

impl TryFrom<ProfileRow> for Profile {
    type Error = AppError;

    fn try_from(r: ProfileRow) -> Result<Self, Self::Error> {
        Ok(Profile {
            player: decode_player(&r.player)?,
            pin: r.pin,
            failed_attempts: r.failed_attempts,
            is_locked: r.is_locked,
        })
    }
}

impl TryFrom<SessionRow> for GameSession {
    type Error = AppError;

    fn try_from(r: SessionRow) -> Result<Self, Self::Error> {
        let results = match r.results.as_deref() {
            Some(json) => Some(serde_json::from_str::<Vec<QuestionResult>>(json)?),
            None => None,
        };
        Ok(GameSession {
            id: r.id,
            player: decode_player(&r.player)?,
            score: r.score,
            wrong: r.wrong,
            earnings: r.earnings,
            timestamp: r.timestamp,
            day: decode_date(&r.day)?,
            results,
        })
    }
}

impl TryFrom<PickRow> for NiftyPick {
    type Error = AppError;

    fn try_from(r: PickRow) -> Result<Self, Self::Error> {
        Ok(NiftyPick {
            id: r.id,
            date: decode_date(&r.date)?,
            player: decode_player(&r.player)?,
            stock_symbol: r.stock_symbol,
            stock_return: r.stock_return,
            earnings: r.earnings,
            created_at: r.created_at,
        })
    }
}

impl TryFrom<StockHistoryRow> for StockHistoryEntry {
    type Error = AppError;

    fn try_from(r: StockHistoryRow) -> Result<Self, Self::Error> {
        Ok(StockHistoryEntry {
            date: decode_date(&r.date)?,
            symbol: r.symbol,
            close_percentage: r.close_percentage,
        })
    }
}
