use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::calendar::{market_window, GameClock};
use crate::config::SETTLEMENT_CHECK_INTERVAL_SECS;
use crate::db::store;
use crate::error::Result;
use crate::game::payout;
use crate::holidays::HolidayCalendar;
use crate::market_data::MarketData;
use crate::realtime::Realtime;
use crate::types::{ChangeAction, MarketWindow, NiftyPick, StockHistoryEntry, Table};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SettlementReport {
    /// Unsettled picks found.
    pub pending: usize,
    /// Picks this run wrote a result for.
    pub settled: usize,
    /// Picks settled concurrently by someone else.
    pub skipped: usize,
    /// Symbols whose return fell back to 0.
    pub defaulted: usize,
}

/// Fills in return and earnings for every unsettled pick dated on or before
/// the given day, and archives the returns it used. Safe to run repeatedly.
pub struct Settler {
    pool: SqlitePool,
    market: Arc<MarketData>,
    realtime: Realtime,
    health: Arc<HealthState>,
}

impl Settler {
    pub fn new(pool: SqlitePool, market: Arc<MarketData>, realtime: Realtime, health: Arc<HealthState>) -> Self {
        Self { pool, market, realtime, health }
    }

    pub async fn settle_pending(&self, today: NaiveDate) -> Result<SettlementReport> {
        let pending = store::unsettled_picks(&self.pool, today).await?;
        let mut report = SettlementReport { pending: pending.len(), ..Default::default() };
        if pending.is_empty() {
            debug!("No pending picks");
            return Ok(report);
        }

        let mut by_date: BTreeMap<NaiveDate, Vec<NiftyPick>> = BTreeMap::new();
        for pick in pending {
            by_date.entry(pick.date).or_default().push(pick);
        }

        for (date, picks) in by_date {
            let symbols: Vec<&str> = picks.iter().map(|p| p.stock_symbol.as_str()).collect();
            let returns = self.returns_for(date, &symbols, &mut report).await?;
            self.settle_day(date, &returns, &mut report).await?;
        }

        self.health
            .record_settlement(Utc::now().timestamp_millis(), report.settled as u64);
        info!(
            pending = report.pending,
            settled = report.settled,
            skipped = report.skipped,
            defaulted = report.defaulted,
            "Settlement complete: {} settled of {} pending",
            report.settled,
            report.pending,
        );
        Ok(report)
    }

    /// Close percentage per symbol: archived value, then cached or live
    /// quote, then 0.
    async fn returns_for(
        &self,
        date: NaiveDate,
        symbols: &[&str],
        report: &mut SettlementReport,
    ) -> Result<HashMap<String, f64>> {
        let mut returns = store::stock_history_for(&self.pool, date).await?;

        let missing: Vec<&str> = symbols
            .iter()
            .copied()
            .filter(|s| !returns.contains_key(*s))
            .collect();
        if missing.is_empty() {
            return Ok(returns);
        }

        let snapshot = self.market.snapshot(date, &missing).await;
        if snapshot.stale {
            warn!(%date, "Settling from cached quotes");
        }
        for symbol in missing {
            let change = match snapshot.quotes.get(symbol) {
                Some(q) => q.change_percent,
                None => {
                    warn!(%symbol, %date, "No quote available, settling at 0%");
                    report.defaulted += 1;
                    0.0
                }
            };
            returns.insert(symbol.to_string(), change);
        }
        Ok(returns)
    }

    async fn settle_day(
        &self,
        date: NaiveDate,
        returns: &HashMap<String, f64>,
        report: &mut SettlementReport,
    ) -> Result<()> {
        // Re-read the whole day so an already-settled sibling is compared too.
        let day = store::picks_for_date(&self.pool, date).await?;
        let return_of = |p: &NiftyPick| {
            p.stock_return
                .or_else(|| returns.get(&p.stock_symbol).copied())
                .unwrap_or(0.0)
        };

        for pick in day.iter().filter(|p| !p.is_settled()) {
            let own = return_of(pick);
            let sibling = day
                .iter()
                .find(|p| p.player == pick.player.sibling())
                .map(return_of);
            let (outcome, earnings) = payout::earnings(own, sibling);

            if store::settle_pick(&self.pool, pick.id, own, earnings).await? {
                report.settled += 1;
                let settled = NiftyPick {
                    stock_return: Some(own),
                    earnings: Some(earnings),
                    ..pick.clone()
                };
                self.realtime.publish(Table::NiftyLogs, ChangeAction::Update, &settled);
                info!(
                    player = %pick.player,
                    symbol = %pick.stock_symbol,
                    %date,
                    stock_return = own,
                    ?outcome,
                    earnings,
                    "Pick settled"
                );
            } else {
                report.skipped += 1;
            }

            store::upsert_stock_history(
                &self.pool,
                &StockHistoryEntry {
                    date,
                    symbol: pick.stock_symbol.clone(),
                    close_percentage: own,
                },
            )
            .await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SettlementScheduler
// ---------------------------------------------------------------------------

/// Runs the settler once a minute while today's results are ready.
pub struct SettlementScheduler {
    settler: Arc<Settler>,
    pool: SqlitePool,
    clock: GameClock,
    holidays: Arc<HolidayCalendar>,
}

impl SettlementScheduler {
    pub fn new(settler: Arc<Settler>, pool: SqlitePool, clock: GameClock, holidays: Arc<HolidayCalendar>) -> Self {
        Self { settler, pool, clock, holidays }
    }

    pub async fn run(self) {
        let mut ticker = interval(Duration::from_secs(SETTLEMENT_CHECK_INTERVAL_SECS));

        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                error!("Settlement tick failed: {e}");
            }
        }
    }

    async fn tick(&self) -> Result<()> {
        let settings = store::load_settings(&self.pool).await?;
        let now = self.clock.effective_now(&settings, Utc::now());
        if market_window(now, self.holidays.as_ref()) != MarketWindow::ResultsReady {
            return Ok(());
        }
        self.settler.settle_pending(now.date()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::latency::FeedLatency;
    use crate::config::Config;
    use crate::db::test_pool;
    use crate::state::LocalStore;
    use crate::types::{Player, Quote};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    /// Settler whose feed is unreachable; quotes come from the seeded cache.
    fn settler(pool: &SqlitePool, cached: &[(&str, &str, f64)]) -> Settler {
        let health = Arc::new(HealthState::new());
        let market = MarketData::new(
            &Config::for_tests(),
            LocalStore::in_memory(),
            Arc::new(FeedLatency::new()),
            Arc::clone(&health),
        )
        .unwrap();
        for (symbol, date, change) in cached {
            let quotes = [(symbol.to_string(), Quote { price: 100.0, change_percent: *change })]
                .into_iter()
                .collect();
            market.cache().store(d(date), &[*symbol], &quotes);
            market.cache().invalidate_snapshot();
        }
        Settler::new(pool.clone(), Arc::new(market), Realtime::new(16), health)
    }

    #[tokio::test]
    async fn settles_sibling_pair_and_archives() {
        let pool = test_pool().await;
        store::insert_pick(&pool, d("2025-03-13"), Player::Ayaan, "INFY").await.unwrap();
        store::insert_pick(&pool, d("2025-03-13"), Player::Riyaan, "TCS").await.unwrap();
        let s = settler(&pool, &[("INFY", "2025-03-13", 1.2), ("TCS", "2025-03-13", 0.8)]);

        let report = s.settle_pending(d("2025-03-13")).await.unwrap();
        assert_eq!((report.pending, report.settled, report.defaulted), (2, 2, 0));

        let picks = store::picks_for_date(&pool, d("2025-03-13")).await.unwrap();
        let ayaan = picks.iter().find(|p| p.player == Player::Ayaan).unwrap();
        let riyaan = picks.iter().find(|p| p.player == Player::Riyaan).unwrap();
        assert_eq!(ayaan.earnings, Some(100));
        assert_eq!(riyaan.earnings, Some(0));

        let archived = store::stock_history_for(&pool, d("2025-03-13")).await.unwrap();
        assert_eq!(archived.get("TCS"), Some(&0.8));
    }

    #[tokio::test]
    async fn rerun_does_not_change_settled_picks() {
        let pool = test_pool().await;
        store::insert_pick(&pool, d("2025-03-13"), Player::Ayaan, "INFY").await.unwrap();
        let s = settler(&pool, &[("INFY", "2025-03-13", 1.26)]);

        assert_eq!(s.settle_pending(d("2025-03-13")).await.unwrap().settled, 1);
        let again = s.settle_pending(d("2025-03-13")).await.unwrap();
        assert_eq!((again.pending, again.settled), (0, 0));

        let picks = store::picks_for_date(&pool, d("2025-03-13")).await.unwrap();
        assert_eq!(picks[0].stock_return, Some(1.26));
        assert_eq!(picks[0].earnings, Some(13));
    }

    #[tokio::test]
    async fn archived_return_wins_over_feed_and_missing_defaults_to_zero() {
        let pool = test_pool().await;
        store::insert_pick(&pool, d("2025-03-12"), Player::Ayaan, "SBIN").await.unwrap();
        store::insert_pick(&pool, d("2025-03-12"), Player::Riyaan, "ITC").await.unwrap();
        store::upsert_stock_history(
            &pool,
            &StockHistoryEntry { date: d("2025-03-12"), symbol: "SBIN".into(), close_percentage: -0.4 },
        )
        .await
        .unwrap();
        let s = settler(&pool, &[("SBIN", "2025-03-12", 5.0)]);

        let report = s.settle_pending(d("2025-03-13")).await.unwrap();
        assert_eq!(report.defaulted, 1);

        let picks = store::picks_for_date(&pool, d("2025-03-12")).await.unwrap();
        let ayaan = picks.iter().find(|p| p.player == Player::Ayaan).unwrap();
        let riyaan = picks.iter().find(|p| p.player == Player::Riyaan).unwrap();
        assert_eq!(ayaan.stock_return, Some(-0.4));
        assert_eq!(ayaan.earnings, Some(-100));
        assert_eq!(riyaan.stock_return, Some(0.0));
        assert_eq!(riyaan.earnings, Some(100));
    }

    #[tokio::test]
    async fn future_picks_wait() {
        let pool = test_pool().await;
        store::insert_pick(&pool, d("2025-03-14"), Player::Ayaan, "INFY").await.unwrap();
        let s = settler(&pool, &[]);
        assert_eq!(s.settle_pending(d("2025-03-13")).await.unwrap().pending, 0);
    }
}
