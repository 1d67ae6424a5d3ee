use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

// ---------------------------------------------------------------------------
// Players
// ---------------------------------------------------------------------------

/// The two fixed players. Every head-to-head comparison is between these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Player {
    Ayaan,
    Riyaan,
}

impl Player {
    pub const ALL: [Player; 2] = [Player::Ayaan, Player::Riyaan];

    pub fn sibling(self) -> Player {
        match self {
            Player::Ayaan => Player::Riyaan,
            Player::Riyaan => Player::Ayaan,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Player::Ayaan => "Ayaan",
            Player::Riyaan => "Riyaan",
        }
    }
}

impl std::fmt::Display for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Player {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ayaan" => Ok(Player::Ayaan),
            "riyaan" => Ok(Player::Riyaan),
            _ => Err(AppError::NotFound(format!("unknown player '{s}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

pub mod setting_keys {
    pub const DATE_OVERRIDE: &str = "date_override";
    pub const ADDITION_ENABLED: &str = "addition_enabled";
    pub const NIFTY_ENABLED: &str = "nifty_enabled";
    pub const PIN_ENTRY_ENABLED: &str = "pin_entry_enabled";
}

/// Snapshot of the admin-controlled settings. Read once per request and
/// passed down explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub date_override: Option<String>,
    pub addition_enabled: bool,
    pub nifty_enabled: bool,
    pub pin_entry_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            date_override: None,
            addition_enabled: true,
            nifty_enabled: true,
            pin_entry_enabled: true,
        }
    }
}

impl Settings {
    /// Build from raw key/value rows. Unknown keys are ignored; a toggle is on
    /// unless stored as exactly "false".
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut settings = Settings::default();
        for (key, value) in pairs {
            match key {
                setting_keys::DATE_OVERRIDE => {
                    let v = value.trim();
                    settings.date_override = (!v.is_empty()).then(|| v.to_string());
                }
                setting_keys::ADDITION_ENABLED => settings.addition_enabled = value != "false",
                setting_keys::NIFTY_ENABLED => settings.nifty_enabled = value != "false",
                setting_keys::PIN_ENTRY_ENABLED => settings.pin_entry_enabled = value != "false",
                _ => {}
            }
        }
        settings
    }
}

/// Partial update from the admin console.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsPatch {
    pub date_override: Option<String>,
    pub addition_enabled: Option<bool>,
    pub nifty_enabled: Option<bool>,
    pub pin_entry_enabled: Option<bool>,
}

// ---------------------------------------------------------------------------
// Market window
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosedReason {
    Weekend,
    Holiday,
}

/// Where "now" falls in the trading day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum MarketWindow {
    /// Weekend or exchange holiday: no picks, no settlement.
    Closed(ClosedReason),
    /// Before the pick deadline.
    AcceptingPicks,
    /// Between the pick deadline and market close.
    Trading,
    /// At or after market close.
    ResultsReady,
}

impl std::fmt::Display for MarketWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MarketWindow::Closed(ClosedReason::Weekend) => "closed (weekend)",
            MarketWindow::Closed(ClosedReason::Holiday) => "closed (holiday)",
            MarketWindow::AcceptingPicks => "accepting_picks",
            MarketWindow::Trading => "trading",
            MarketWindow::ResultsReady => "results_ready",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Addition game
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub num1: u32,
    pub num2: u32,
    pub answer: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub num1: u32,
    pub num2: u32,
    pub answer: u32,
    pub user_answer: u32,
    pub is_correct: bool,
    /// Seconds since the previous answer (or quiz start).
    pub time_taken: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSession {
    pub id: String,
    pub player: Player,
    pub score: i64,
    pub wrong: i64,
    pub earnings: i64,
    /// Effective time the session finished, epoch milliseconds.
    pub timestamp: i64,
    /// Effective calendar day of the session.
    pub day: NaiveDate,
    pub results: Option<Vec<QuestionResult>>,
}

// ---------------------------------------------------------------------------
// Nifty game
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NiftyPick {
    pub id: i64,
    pub date: NaiveDate,
    pub player: Player,
    pub stock_symbol: String,
    /// Percentage change; None until settled.
    pub stock_return: Option<f64>,
    /// None until settled.
    pub earnings: Option<i64>,
    pub created_at: i64,
}

impl NiftyPick {
    pub fn is_settled(&self) -> bool {
        self.stock_return.is_some() && self.earnings.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    pub change_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockHistoryEntry {
    pub date: NaiveDate,
    pub symbol: String,
    pub close_percentage: f64,
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub player: Player,
    pub pin: String,
    pub failed_attempts: i64,
    pub is_locked: bool,
}

/// What clients are allowed to see of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileView {
    pub player: Player,
    pub failed_attempts: i64,
    pub attempts_left: i64,
    pub is_locked: bool,
}

impl From<&Profile> for ProfileView {
    fn from(p: &Profile) -> Self {
        Self {
            player: p.player,
            failed_attempts: p.failed_attempts,
            attempts_left: (crate::config::MAX_PIN_ATTEMPTS - p.failed_attempts).max(0),
            is_locked: p.is_locked,
        }
    }
}

// ---------------------------------------------------------------------------
// Realtime change events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    AppSettings,
    Profiles,
    AdditionLogs,
    NiftyLogs,
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Table::AppSettings => "app_settings",
            Table::Profiles => "profiles",
            Table::AdditionLogs => "addition_logs",
            Table::NiftyLogs => "nifty_logs",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
}

/// One row-level change, pushed to realtime subscribers after the write lands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub action: ChangeAction,
    pub record: serde_json::Value,
}
