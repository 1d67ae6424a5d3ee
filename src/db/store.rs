//! Table-level reads and writes. Every write returns its outcome to the caller;
//! nothing here is fire-and-forget.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::SESSION_HISTORY_CAP;
use crate::db::models::{
    date_key, PickRow, ProfileRow, SessionRow, SettingRow, StockHistoryRow,
};
use crate::error::{AppError, Result};
use crate::types::{GameSession, NiftyPick, Player, Profile, Settings, StockHistoryEntry};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Turn a unique-constraint violation into a 409 with `msg`.
fn conflict_on_unique(e: sqlx::Error, msg: impl Into<String>) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict(msg.into()),
        _ => AppError::Database(e),
    }
}

// ---------------------------------------------------------------------------
// app_settings
// ---------------------------------------------------------------------------

pub async fn load_settings(pool: &SqlitePool) -> Result<Settings> {
    let rows: Vec<SettingRow> = sqlx::query_as("SELECT key, value FROM app_settings")
        .fetch_all(pool)
        .await?;
    Ok(Settings::from_pairs(
        rows.iter().map(|r| (r.key.as_str(), r.value.as_str())),
    ))
}

/// Apply a batch of setting writes in one transaction: every upsert lands and
/// each key in `deletes` is removed, or nothing changes. Returns the deleted
/// keys that actually existed.
pub async fn apply_settings<'a>(
    pool: &SqlitePool,
    upserts: &[(&str, String)],
    deletes: &[&'a str],
) -> Result<Vec<&'a str>> {
    let mut tx = pool.begin().await?;
    let mut removed = Vec::new();
    for key in deletes {
        let res = sqlx::query("DELETE FROM app_settings WHERE key = ?")
            .bind(*key)
            .execute(&mut *tx)
            .await?;
        if res.rows_affected() > 0 {
            removed.push(*key);
        }
    }
    let ts = now_ms();
    for (key, value) in upserts {
        sqlx::query(
            r#"
            INSERT INTO app_settings (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(*key)
        .bind(value)
        .bind(ts)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(removed)
}

pub async fn delete_setting(pool: &SqlitePool, key: &str) -> Result<bool> {
    let res = sqlx::query("DELETE FROM app_settings WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// profiles
// ---------------------------------------------------------------------------

/// Create a profile for every player that does not have one yet.
pub async fn ensure_profiles(pool: &SqlitePool, default_pin: &str) -> Result<()> {
    for player in Player::ALL {
        sqlx::query("INSERT OR IGNORE INTO profiles (player, pin) VALUES (?, ?)")
            .bind(player.as_str())
            .bind(default_pin)
            .execute(pool)
            .await?;
    }
    Ok(())
}

pub async fn get_profile(pool: &SqlitePool, player: Player) -> Result<Profile> {
    let row: Option<ProfileRow> = sqlx::query_as(
        "SELECT player, pin, failed_attempts, is_locked FROM profiles WHERE player = ?",
    )
    .bind(player.as_str())
    .fetch_optional(pool)
    .await?;

    row.ok_or_else(|| AppError::NotFound(format!("no profile for {player}")))?
        .try_into()
}

pub async fn save_profile_lock_state(pool: &SqlitePool, profile: &Profile) -> Result<()> {
    sqlx::query("UPDATE profiles SET failed_attempts = ?, is_locked = ? WHERE player = ?")
        .bind(profile.failed_attempts)
        .bind(profile.is_locked)
        .bind(profile.player.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_pin(pool: &SqlitePool, player: Player, pin: &str) -> Result<()> {
    let res = sqlx::query("UPDATE profiles SET pin = ? WHERE player = ?")
        .bind(pin)
        .bind(player.as_str())
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("no profile for {player}")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// addition_logs
// ---------------------------------------------------------------------------

const SESSION_COLUMNS: &str = "id, player, score, wrong, earnings, timestamp, day, results";

/// Insert a finished session, bump the player's running addition total and
/// prune history beyond the cap. A second session for the same player and day
/// is a conflict.
pub async fn insert_session(pool: &SqlitePool, session: &GameSession) -> Result<()> {
    let results = match &session.results {
        Some(r) => Some(serde_json::to_string(r)?),
        None => None,
    };

    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO addition_logs (id, player, score, wrong, earnings, timestamp, day, results)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&session.id)
    .bind(session.player.as_str())
    .bind(session.score)
    .bind(session.wrong)
    .bind(session.earnings)
    .bind(session.timestamp)
    .bind(date_key(session.day))
    .bind(results)
    .execute(&mut *tx)
    .await
    .map_err(|e| conflict_on_unique(e, format!("{} already played on {}", session.player, session.day)))?;

    add_to_addition_total(&mut tx, session.player.as_str(), session.earnings).await?;

    sqlx::query(
        r#"
        DELETE FROM addition_logs
        WHERE id NOT IN (SELECT id FROM addition_logs ORDER BY timestamp DESC LIMIT ?)
        "#,
    )
    .bind(SESSION_HISTORY_CAP)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn session_for_day(
    pool: &SqlitePool,
    player: Player,
    day: NaiveDate,
) -> Result<Option<GameSession>> {
    let row: Option<SessionRow> = sqlx::query_as(&format!(
        "SELECT {SESSION_COLUMNS} FROM addition_logs WHERE player = ? AND day = ?"
    ))
    .bind(player.as_str())
    .bind(date_key(day))
    .fetch_optional(pool)
    .await?;
    row.map(GameSession::try_from).transpose()
}

/// Newest first.
pub async fn list_sessions(pool: &SqlitePool, player: Option<Player>, limit: i64) -> Result<Vec<GameSession>> {
    let rows: Vec<SessionRow> = match player {
        Some(p) => {
            sqlx::query_as(&format!(
                "SELECT {SESSION_COLUMNS} FROM addition_logs WHERE player = ? ORDER BY timestamp DESC LIMIT ?"
            ))
            .bind(p.as_str())
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as(&format!(
                "SELECT {SESSION_COLUMNS} FROM addition_logs ORDER BY timestamp DESC LIMIT ?"
            ))
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };
    rows.into_iter().map(GameSession::try_from).collect()
}

/// Delete one session, returning it if it existed. Its earnings come off the
/// player's running total.
pub async fn delete_session(pool: &SqlitePool, id: &str) -> Result<Option<GameSession>> {
    let mut tx = pool.begin().await?;
    let row: Option<SessionRow> = sqlx::query_as(&format!(
        "DELETE FROM addition_logs WHERE id = ? RETURNING {SESSION_COLUMNS}"
    ))
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?;
    if let Some(r) = &row {
        add_to_addition_total(&mut tx, &r.player, -r.earnings).await?;
    }
    tx.commit().await?;
    row.map(GameSession::try_from).transpose()
}

async fn add_to_addition_total(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    player: &str,
    delta: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO addition_totals (player, earnings) VALUES (?, ?)
        ON CONFLICT(player) DO UPDATE SET earnings = earnings + excluded.earnings
        "#,
    )
    .bind(player)
    .bind(delta)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// nifty_logs
// ---------------------------------------------------------------------------

const PICK_COLUMNS: &str = "id, date, player, stock_symbol, stock_return, earnings, created_at";

pub async fn insert_pick(
    pool: &SqlitePool,
    date: NaiveDate,
    player: Player,
    symbol: &str,
) -> Result<NiftyPick> {
    let row: PickRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO nifty_logs (date, player, stock_symbol, created_at)
        VALUES (?, ?, ?, ?)
        RETURNING {PICK_COLUMNS}
        "#
    ))
    .bind(date_key(date))
    .bind(player.as_str())
    .bind(symbol)
    .bind(now_ms())
    .fetch_one(pool)
    .await
    .map_err(|e| conflict_on_unique(e, format!("{player} already picked on {date}")))?;
    row.try_into()
}

pub async fn picks_for_date(pool: &SqlitePool, date: NaiveDate) -> Result<Vec<NiftyPick>> {
    let rows: Vec<PickRow> = sqlx::query_as(&format!(
        "SELECT {PICK_COLUMNS} FROM nifty_logs WHERE date = ? ORDER BY player"
    ))
    .bind(date_key(date))
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(NiftyPick::try_from).collect()
}

/// Newest date first.
pub async fn list_picks(pool: &SqlitePool, limit: i64) -> Result<Vec<NiftyPick>> {
    let rows: Vec<PickRow> = sqlx::query_as(&format!(
        "SELECT {PICK_COLUMNS} FROM nifty_logs ORDER BY date DESC, player LIMIT ?"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(NiftyPick::try_from).collect()
}

/// Picks with no settled return, dated on or before `up_to`.
pub async fn unsettled_picks(pool: &SqlitePool, up_to: NaiveDate) -> Result<Vec<NiftyPick>> {
    let rows: Vec<PickRow> = sqlx::query_as(&format!(
        "SELECT {PICK_COLUMNS} FROM nifty_logs WHERE stock_return IS NULL AND date <= ? ORDER BY date, player"
    ))
    .bind(date_key(up_to))
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(NiftyPick::try_from).collect()
}

/// Write a settlement result. Only touches picks that are still unsettled;
/// returns false if the pick was already settled (or does not exist).
pub async fn settle_pick(pool: &SqlitePool, id: i64, stock_return: f64, earnings: i64) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE nifty_logs SET stock_return = ?, earnings = ? WHERE id = ? AND stock_return IS NULL",
    )
    .bind(stock_return)
    .bind(earnings)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

// ---------------------------------------------------------------------------
// stock_history
// ---------------------------------------------------------------------------

pub async fn upsert_stock_history(pool: &SqlitePool, entry: &StockHistoryEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO stock_history (date, symbol, close_percentage) VALUES (?, ?, ?)
        ON CONFLICT(date, symbol) DO UPDATE SET close_percentage = excluded.close_percentage
        "#,
    )
    .bind(date_key(entry.date))
    .bind(&entry.symbol)
    .bind(entry.close_percentage)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn stock_history_for(pool: &SqlitePool, date: NaiveDate) -> Result<HashMap<String, f64>> {
    let rows: Vec<StockHistoryRow> = sqlx::query_as(
        "SELECT date, symbol, close_percentage FROM stock_history WHERE date = ?",
    )
    .bind(date_key(date))
    .fetch_all(pool)
    .await?;
    let mut out = HashMap::with_capacity(rows.len());
    for row in rows {
        let entry = StockHistoryEntry::try_from(row)?;
        out.insert(entry.symbol, entry.close_percentage);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Aggregates & resets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct EarningsTotals {
    pub player: String,
    pub addition: i64,
    pub nifty: i64,
    pub total: i64,
}

/// Lifetime earnings per player across both games. Addition comes from the
/// running totals, which outlive pruned sessions. Unsettled picks count as zero.
pub async fn earnings_totals(pool: &SqlitePool) -> Result<Vec<EarningsTotals>> {
    let addition: Vec<(String, i64)> = sqlx::query_as(
        "SELECT player, earnings FROM addition_totals",
    )
    .fetch_all(pool)
    .await?;
    let nifty: Vec<(String, i64)> = sqlx::query_as(
        "SELECT player, COALESCE(SUM(earnings), 0) FROM nifty_logs WHERE earnings IS NOT NULL GROUP BY player",
    )
    .fetch_all(pool)
    .await?;

    let addition: HashMap<String, i64> = addition.into_iter().collect();
    let nifty: HashMap<String, i64> = nifty.into_iter().collect();

    Ok(Player::ALL
        .iter()
        .map(|p| {
            let a = addition.get(p.as_str()).copied().unwrap_or(0);
            let n = nifty.get(p.as_str()).copied().unwrap_or(0);
            EarningsTotals {
                player: p.to_string(),
                addition: a,
                nifty: n,
                total: a + n,
            }
        })
        .collect())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResetSummary {
    pub sessions_deleted: u64,
    pub picks_deleted: u64,
}

/// Wipe game data and the date override. Profiles and the price archive stay.
pub async fn reset_all(pool: &SqlitePool) -> Result<ResetSummary> {
    let mut tx = pool.begin().await?;
    let sessions = sqlx::query("DELETE FROM addition_logs").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM addition_totals").execute(&mut *tx).await?;
    let picks = sqlx::query("DELETE FROM nifty_logs").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM app_settings WHERE key = ?")
        .bind(crate::types::setting_keys::DATE_OVERRIDE)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(ResetSummary {
        sessions_deleted: sessions.rows_affected(),
        picks_deleted: picks.rows_affected(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn session(id: &str, player: Player, day: &str, earnings: i64, ts: i64) -> GameSession {
        GameSession {
            id: id.to_string(),
            player,
            score: earnings.max(0),
            wrong: 0,
            earnings,
            timestamp: ts,
            day: d(day),
            results: None,
        }
    }

    #[tokio::test]
    async fn settings_upsert_overwrites() {
        let pool = test_pool().await;
        apply_settings(
            &pool,
            &[("nifty_enabled", "false".into()), ("date_override", "2025-03-15".into())],
            &[],
        )
        .await
        .unwrap();
        let s = load_settings(&pool).await.unwrap();
        assert!(!s.nifty_enabled);
        assert_eq!(s.date_override.as_deref(), Some("2025-03-15"));

        apply_settings(&pool, &[("nifty_enabled", "true".into())], &[]).await.unwrap();
        assert!(delete_setting(&pool, "date_override").await.unwrap());
        let s = load_settings(&pool).await.unwrap();
        assert!(s.nifty_enabled);
        assert!(s.date_override.is_none());
    }

    #[tokio::test]
    async fn settings_batch_is_all_or_nothing() {
        let pool = test_pool().await;
        apply_settings(&pool, &[("date_override", "2025-03-15".into())], &[]).await.unwrap();

        // The trigger fails the last write; the delete and the first upsert
        // must roll back with it.
        sqlx::query("CREATE TRIGGER reject_pin_toggle BEFORE INSERT ON app_settings \
                     WHEN NEW.key = 'pin_entry_enabled' BEGIN SELECT RAISE(ABORT, 'rejected'); END")
            .execute(&pool)
            .await
            .unwrap();
        let err = apply_settings(
            &pool,
            &[("nifty_enabled", "false".into()), ("pin_entry_enabled", "false".into())],
            &["date_override"],
        )
        .await;
        assert!(err.is_err());

        let s = load_settings(&pool).await.unwrap();
        assert_eq!(s.date_override.as_deref(), Some("2025-03-15"));
        assert!(s.nifty_enabled);

        sqlx::query("DROP TRIGGER reject_pin_toggle").execute(&pool).await.unwrap();
        let removed = apply_settings(&pool, &[("nifty_enabled", "false".into())], &["date_override", "missing"])
            .await
            .unwrap();
        assert_eq!(removed, vec!["date_override"]);
        let s = load_settings(&pool).await.unwrap();
        assert!(s.date_override.is_none());
        assert!(!s.nifty_enabled);
    }

    #[tokio::test]
    async fn one_session_per_player_per_day() {
        let pool = test_pool().await;
        insert_session(&pool, &session("a", Player::Ayaan, "2025-03-13", 5, 1)).await.unwrap();
        insert_session(&pool, &session("b", Player::Riyaan, "2025-03-13", 3, 2)).await.unwrap();

        let err = insert_session(&pool, &session("c", Player::Ayaan, "2025-03-13", 9, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)), "got {err:?}");

        let found = session_for_day(&pool, Player::Ayaan, d("2025-03-13")).await.unwrap();
        assert_eq!(found.unwrap().id, "a");
    }

    #[tokio::test]
    async fn delete_session_returns_removed_row() {
        let pool = test_pool().await;
        insert_session(&pool, &session("a", Player::Ayaan, "2025-03-13", 5, 1)).await.unwrap();
        let removed = delete_session(&pool, "a").await.unwrap();
        assert_eq!(removed.map(|s| s.earnings), Some(5));
        assert!(delete_session(&pool, "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn settle_pick_only_once() {
        let pool = test_pool().await;
        let pick = insert_pick(&pool, d("2025-03-13"), Player::Ayaan, "INFY").await.unwrap();
        assert!(!pick.is_settled());

        assert!(settle_pick(&pool, pick.id, 1.2, 100).await.unwrap());
        assert!(!settle_pick(&pool, pick.id, 9.9, -100).await.unwrap());

        let picks = picks_for_date(&pool, d("2025-03-13")).await.unwrap();
        assert_eq!(picks[0].stock_return, Some(1.2));
        assert_eq!(picks[0].earnings, Some(100));
    }

    #[tokio::test]
    async fn unsettled_picks_respects_date_bound() {
        let pool = test_pool().await;
        insert_pick(&pool, d("2025-03-13"), Player::Ayaan, "INFY").await.unwrap();
        insert_pick(&pool, d("2025-03-14"), Player::Ayaan, "TCS").await.unwrap();

        let due = unsettled_picks(&pool, d("2025-03-13")).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].stock_symbol, "INFY");
    }

    #[tokio::test]
    async fn totals_sum_both_games() {
        let pool = test_pool().await;
        insert_session(&pool, &session("a", Player::Ayaan, "2025-03-13", 12, 1)).await.unwrap();
        let pick = insert_pick(&pool, d("2025-03-13"), Player::Ayaan, "INFY").await.unwrap();
        settle_pick(&pool, pick.id, 1.2, 100).await.unwrap();
        insert_pick(&pool, d("2025-03-13"), Player::Riyaan, "TCS").await.unwrap();

        let totals = earnings_totals(&pool).await.unwrap();
        let ayaan = totals.iter().find(|t| t.player == "Ayaan").unwrap();
        let riyaan = totals.iter().find(|t| t.player == "Riyaan").unwrap();
        assert_eq!((ayaan.addition, ayaan.nifty, ayaan.total), (12, 100, 112));
        assert_eq!(riyaan.total, 0);
    }

    #[tokio::test]
    async fn totals_outlive_pruned_history() {
        let pool = test_pool().await;
        let first = d("2020-01-01");
        let n = SESSION_HISTORY_CAP + 1;
        for i in 0..n {
            let day = (first + chrono::Duration::days(i)).format("%Y-%m-%d").to_string();
            let s = session(&format!("s{i}"), Player::Ayaan, &day, 10, i);
            insert_session(&pool, &s).await.unwrap();
        }

        let kept = list_sessions(&pool, None, n).await.unwrap();
        assert_eq!(kept.len() as i64, SESSION_HISTORY_CAP);
        assert!(kept.iter().all(|s| s.id != "s0"));

        let totals = earnings_totals(&pool).await.unwrap();
        let ayaan = totals.iter().find(|t| t.player == "Ayaan").unwrap();
        assert_eq!(ayaan.addition, 10 * n);

        delete_session(&pool, "s7").await.unwrap();
        let totals = earnings_totals(&pool).await.unwrap();
        let ayaan = totals.iter().find(|t| t.player == "Ayaan").unwrap();
        assert_eq!(ayaan.addition, 10 * (n - 1));
    }

    #[tokio::test]
    async fn reset_clears_games_and_override() {
        let pool = test_pool().await;
        ensure_profiles(&pool, "123456").await.unwrap();
        apply_settings(
            &pool,
            &[("date_override", "2025-03-15".into()), ("nifty_enabled", "false".into())],
            &[],
        )
        .await
        .unwrap();
        insert_session(&pool, &session("a", Player::Ayaan, "2025-03-13", 12, 1)).await.unwrap();
        insert_pick(&pool, d("2025-03-13"), Player::Ayaan, "INFY").await.unwrap();

        let summary = reset_all(&pool).await.unwrap();
        assert_eq!(summary.sessions_deleted, 1);
        assert_eq!(summary.picks_deleted, 1);
        let totals = earnings_totals(&pool).await.unwrap();
        assert!(totals.iter().all(|t| t.total == 0));

        let s = load_settings(&pool).await.unwrap();
        assert!(s.date_override.is_none());
        assert!(!s.nifty_enabled);
        assert!(get_profile(&pool, Player::Ayaan).await.is_ok());
    }

    #[tokio::test]
    async fn history_upsert_replaces_value() {
        let pool = test_pool().await;
        let mut entry = StockHistoryEntry { date: d("2025-03-13"), symbol: "INFY".into(), close_percentage: 1.0 };
        upsert_stock_history(&pool, &entry).await.unwrap();
        entry.close_percentage = 1.5;
        upsert_stock_history(&pool, &entry).await.unwrap();
        let map = stock_history_for(&pool, d("2025-03-13")).await.unwrap();
        assert_eq!(map.get("INFY"), Some(&1.5));
    }
}
