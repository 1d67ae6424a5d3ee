//! Stock pick game: submission rules, the per-player results view and the
//! day-by-day log.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;

use crate::calendar::{closed_reason, is_after_market_close, is_before_pick_deadline, market_window, HolidayLookup};
use crate::config::PICK_DEADLINE;
use crate::db::store;
use crate::error::{AppError, Result};
use crate::game::payout::winner_index;
use crate::game::PerPlayer;
use crate::market_data::canonical_symbol;
use crate::realtime::Realtime;
use crate::types::{ChangeAction, MarketWindow, NiftyPick, Player, Settings, Table};

/// Validate and record a pick for the effective day.
pub async fn submit_pick<H: HolidayLookup + ?Sized>(
    pool: &SqlitePool,
    realtime: &Realtime,
    settings: &Settings,
    holidays: &H,
    now: NaiveDateTime,
    player: Player,
    symbol: &str,
) -> Result<NiftyPick> {
    if !settings.nifty_enabled {
        return Err(AppError::Forbidden("the stock game is disabled".to_string()));
    }
    let symbol = canonical_symbol(symbol)
        .ok_or_else(|| AppError::BadRequest(format!("{symbol} is not a Nifty 50 stock")))?;

    let date = now.date();
    if let Some(reason) = closed_reason(date, holidays) {
        return Err(AppError::Forbidden(format!("market closed on {date}: {reason:?}")));
    }
    if !is_before_pick_deadline(now) {
        return Err(AppError::Forbidden(format!(
            "picks close at {:02}:{:02}",
            PICK_DEADLINE.0, PICK_DEADLINE.1
        )));
    }

    let today = store::picks_for_date(pool, date).await?;
    if today.iter().any(|p| p.player == player) {
        return Err(AppError::Conflict(format!("{player} already picked on {date}")));
    }
    if today
        .iter()
        .any(|p| p.player == player.sibling() && p.stock_symbol == symbol)
    {
        return Err(AppError::Conflict(format!(
            "{symbol} was already picked by {}",
            player.sibling()
        )));
    }

    let pick = store::insert_pick(pool, date, player, symbol).await?;
    realtime.publish(Table::NiftyLogs, ChangeAction::Insert, &pick);
    info!(%player, %symbol, %date, "Pick recorded");
    Ok(pick)
}

// ---------------------------------------------------------------------------
// Results view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ResultsView {
    pub player: Player,
    pub date: NaiveDate,
    pub window: MarketWindow,
    pub mine: Option<NiftyPick>,
    pub sibling: Option<NiftyPick>,
    /// Market has closed and the player's pick is settled.
    pub ready: bool,
    pub winner: Option<Player>,
    /// Both picks' earnings, once ready.
    pub group_total: i64,
}

pub fn build_results<H: HolidayLookup + ?Sized>(
    picks: &[NiftyPick],
    holidays: &H,
    now: NaiveDateTime,
    player: Player,
) -> ResultsView {
    let mine = picks.iter().find(|p| p.player == player).cloned();
    let sibling = picks.iter().find(|p| p.player == player.sibling()).cloned();

    let ready = is_after_market_close(now) && mine.as_ref().is_some_and(NiftyPick::is_settled);

    let winner = if ready {
        let ret = |p: &Option<NiftyPick>| p.as_ref().and_then(|p| p.stock_return);
        winner_index(ret(&mine), ret(&sibling)).map(|i| if i == 0 { player } else { player.sibling() })
    } else {
        None
    };

    let group_total = if ready {
        mine.iter().chain(sibling.iter()).filter_map(|p| p.earnings).sum()
    } else {
        0
    };

    ResultsView {
        player,
        date: now.date(),
        window: market_window(now, holidays),
        mine,
        sibling,
        ready,
        winner,
        group_total,
    }
}

pub async fn results_view<H: HolidayLookup + ?Sized>(
    pool: &SqlitePool,
    holidays: &H,
    now: NaiveDateTime,
    player: Player,
) -> Result<ResultsView> {
    let picks = store::picks_for_date(pool, now.date()).await?;
    Ok(build_results(&picks, holidays, now, player))
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct NiftyDay {
    pub date: NaiveDate,
    pub picks: PerPlayer<NiftyPick>,
    /// Set once both picks are settled and the returns differ.
    pub winner: Option<Player>,
}

/// Group picks by date, newest first.
pub fn group_history(picks: Vec<NiftyPick>) -> Vec<NiftyDay> {
    let mut days: BTreeMap<NaiveDate, PerPlayer<NiftyPick>> = BTreeMap::new();
    for pick in picks {
        let date = pick.date;
        let player = pick.player;
        *days.entry(date).or_default().slot_mut(player) = Some(pick);
    }

    days.into_iter()
        .rev()
        .map(|(date, picks)| {
            let ret = |p: Player| picks.get(p).and_then(|p| p.stock_return);
            let winner = winner_index(ret(Player::Ayaan), ret(Player::Riyaan))
                .map(|i| Player::ALL[i]);
            NiftyDay { date, picks, winner }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use std::collections::HashSet;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn settled(player: Player, date: &str, symbol: &str, ret: f64, earnings: i64) -> NiftyPick {
        NiftyPick {
            id: 0,
            date: d(date),
            player,
            stock_symbol: symbol.to_string(),
            stock_return: Some(ret),
            earnings: Some(earnings),
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn pick_rules() {
        let pool = test_pool().await;
        let rt = Realtime::new(8);
        let s = Settings::default();
        let none: HashSet<NaiveDate> = HashSet::new();
        let morning = at("2025-03-13 08:30");

        let pick = submit_pick(&pool, &rt, &s, &none, morning, Player::Ayaan, "infy").await.unwrap();
        assert_eq!(pick.stock_symbol, "INFY");

        let err = submit_pick(&pool, &rt, &s, &none, morning, Player::Ayaan, "TCS").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = submit_pick(&pool, &rt, &s, &none, morning, Player::Riyaan, "INFY").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = submit_pick(&pool, &rt, &s, &none, morning, Player::Riyaan, "AAPL").await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err = submit_pick(&pool, &rt, &s, &none, at("2025-03-13 09:00"), Player::Riyaan, "TCS")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        assert!(submit_pick(&pool, &rt, &s, &none, morning, Player::Riyaan, "TCS").await.is_ok());
    }

    #[tokio::test]
    async fn closed_day_or_disabled_rejects() {
        let pool = test_pool().await;
        let rt = Realtime::new(8);
        let holidays: HashSet<NaiveDate> = [d("2025-03-14")].into_iter().collect();

        let err = submit_pick(&pool, &rt, &Settings::default(), &holidays, at("2025-03-14 08:00"), Player::Ayaan, "INFY")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = submit_pick(&pool, &rt, &Settings::default(), &holidays, at("2025-03-15 08:00"), Player::Ayaan, "INFY")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let off = Settings { nifty_enabled: false, ..Settings::default() };
        let err = submit_pick(&pool, &rt, &off, &holidays, at("2025-03-13 08:00"), Player::Ayaan, "INFY")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn results_show_winner_and_group_total_after_close() {
        let picks = vec![
            settled(Player::Ayaan, "2025-03-13", "INFY", 1.2, 100),
            settled(Player::Riyaan, "2025-03-13", "TCS", 0.8, 0),
        ];
        let none: HashSet<NaiveDate> = HashSet::new();

        let view = build_results(&picks, &none, at("2025-03-13 16:00"), Player::Riyaan);
        assert!(view.ready);
        assert_eq!(view.winner, Some(Player::Ayaan));
        assert_eq!(view.group_total, 100);
        assert_eq!(view.mine.unwrap().stock_symbol, "TCS");

        let early = build_results(&picks, &none, at("2025-03-13 12:00"), Player::Riyaan);
        assert!(!early.ready);
        assert_eq!(early.winner, None);
        assert_eq!(early.group_total, 0);
        assert_eq!(early.window, MarketWindow::Trading);
    }

    #[test]
    fn history_groups_by_date_newest_first() {
        let mut pending = settled(Player::Riyaan, "2025-03-13", "TCS", 0.0, 0);
        pending.stock_return = None;
        pending.earnings = None;

        let days = group_history(vec![
            settled(Player::Ayaan, "2025-03-12", "INFY", -0.5, -100),
            settled(Player::Riyaan, "2025-03-12", "ITC", 0.4, 100),
            settled(Player::Ayaan, "2025-03-13", "SBIN", 0.9, 100),
            pending,
        ]);
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, d("2025-03-13"));
        assert_eq!(days[0].winner, None);
        assert_eq!(days[1].winner, Some(Player::Riyaan));
        assert_eq!(days[1].picks.get(Player::Ayaan).unwrap().stock_symbol, "INFY");
    }
}
