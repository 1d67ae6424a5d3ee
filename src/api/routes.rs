use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::api::health::HealthState;
use crate::api::latency::{Feed, FeedLatency, LatencySummary};
use crate::api::stream::realtime_ws;
use crate::calendar::{is_market_open_day, market_window, parse_override, GameClock};
use crate::config::{Config, PICK_DEADLINE, SESSION_HISTORY_CAP, SETTLEMENT_TIME};
use crate::db::store::{self, EarningsTotals, ResetSummary};
use crate::error::AppError;
use crate::game::addition::{group_by_day, Answer, DailyEarnings, QuizBook, QuizStarted};
use crate::game::nifty::{self, NiftyDay, ResultsView};
use crate::game::pin;
use crate::holidays::HolidayCalendar;
use crate::market_data::{symbols, MarketData, NIFTY_50_SYMBOLS};
use crate::realtime::Realtime;
use crate::settlement::{SettlementReport, Settler};
use crate::state::LocalStore;
use crate::types::{
    setting_keys, ChangeAction, GameSession, MarketWindow, NiftyPick, Player, ProfileView, Settings,
    SettingsPatch, Table,
};

/// Local store keys for the last good copies of DB-backed reads.
const SETTINGS_MIRROR_KEY: &str = "settings";
const TOTALS_MIRROR_KEY: &str = "earnings_totals";

const ADMIN_PIN_HEADER: &str = "x-admin-pin";

#[derive(Clone)]
pub struct ApiState {
    pub pool: SqlitePool,
    pub cfg: Arc<Config>,
    pub clock: GameClock,
    pub holidays: Arc<HolidayCalendar>,
    pub market: Arc<MarketData>,
    pub settler: Arc<Settler>,
    pub quizzes: Arc<QuizBook>,
    pub realtime: Realtime,
    pub local: Arc<LocalStore>,
    pub latency: Arc<FeedLatency>,
    pub health: Arc<HealthState>,
}

impl ApiState {
    /// Settings snapshot for one request. Falls back to the last mirrored copy
    /// when the database read fails.
    async fn settings(&self) -> Settings {
        match store::load_settings(&self.pool).await {
            Ok(s) => {
                if self.local.get::<Settings>(SETTINGS_MIRROR_KEY).as_ref() != Some(&s) {
                    if let Err(e) = self.local.set(SETTINGS_MIRROR_KEY, &s) {
                        warn!("Failed to mirror settings locally: {e}");
                    }
                }
                s
            }
            Err(e) => {
                warn!("Settings read failed, using local copy: {e}");
                self.local.get(SETTINGS_MIRROR_KEY).unwrap_or_default()
            }
        }
    }

    fn now(&self, settings: &Settings) -> NaiveDateTime {
        self.clock.effective_now(settings, Utc::now())
    }

    fn require_admin(&self, headers: &HeaderMap) -> Result<(), AppError> {
        let given = headers.get(ADMIN_PIN_HEADER).and_then(|v| v.to_str().ok());
        if given == Some(self.cfg.admin_pin.as_str()) {
            Ok(())
        } else {
            Err(AppError::Unauthorized)
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .route("/status", get(get_status))
        .route("/players/:player/profile", get(get_profile))
        .route("/players/:player/pin", post(post_verify_pin))
        .route("/addition/sessions", get(get_sessions))
        .route("/addition/daily", get(get_daily))
        .route("/addition/:player/start", post(post_start_quiz))
        .route("/addition/:player/finish", post(post_finish_quiz))
        .route("/addition/:player/today", get(get_today_session))
        .route("/addition/:player/questions", get(get_active_questions))
        .route("/nifty/quotes", get(get_quotes))
        .route("/nifty/history", get(get_nifty_history))
        .route("/nifty/:player/pick", post(post_pick))
        .route("/nifty/:player/results", get(get_results))
        .route("/leaderboard", get(get_leaderboard))
        .route("/admin/settings", get(get_admin_settings).put(put_admin_settings))
        .route("/admin/settings/date_override", delete(delete_date_override))
        .route("/admin/players/:player/unlock", post(post_unlock))
        .route("/admin/players/:player/pin", put(put_player_pin))
        .route("/admin/sessions/:id", delete(delete_session))
        .route("/admin/reset", post(post_reset))
        .route("/admin/settle", post(post_settle))
        .route("/realtime", get(realtime_ws))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request bodies & query params
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct PinBody {
    pub pin: String,
}

#[derive(Deserialize)]
pub struct FinishBody {
    #[serde(default)]
    pub answers: Vec<Answer>,
}

#[derive(Deserialize)]
pub struct PickBody {
    pub symbol: String,
}

#[derive(Deserialize)]
pub struct SessionsQuery {
    pub player: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct QuotesQuery {
    pub q: Option<String>,
}

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub feed_ok: bool,
    pub holidays_cached: usize,
    pub holidays_last_fetched: Option<String>,
    pub last_settlement_ms: Option<i64>,
    pub picks_settled: u64,
    pub realtime_subscribers: usize,
}

/// Feed round trips: both feeds merged at the top level, then per feed.
#[derive(Serialize, Deserialize)]
pub struct LatencyResponse {
    #[serde(flatten)]
    pub overall: LatencySummary,
    pub quotes: LatencySummary,
    pub holidays: LatencySummary,
}

#[derive(Serialize, Deserialize)]
pub struct StatusResponse {
    pub real_now: NaiveDateTime,
    pub effective_now: NaiveDateTime,
    pub override_active: bool,
    pub market_open_today: bool,
    pub window: MarketWindow,
    pub settings: Settings,
    pub pick_deadline: String,
    pub market_close: String,
    pub quiz_duration_secs: u64,
}

#[derive(Serialize)]
pub struct TodayResponse {
    pub player: Player,
    pub date: chrono::NaiveDate,
    pub played: bool,
    pub session: Option<GameSession>,
}

#[derive(Serialize)]
pub struct QuoteRow {
    pub symbol: &'static str,
    pub price: Option<f64>,
    pub change_percent: Option<f64>,
}

#[derive(Serialize)]
pub struct QuotesResponse {
    pub date: chrono::NaiveDate,
    pub stale: bool,
    pub quotes: Vec<QuoteRow>,
}

// ---------------------------------------------------------------------------
// Health & status handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let last = state.health.last_settlement_ms();
    Json(HealthResponse {
        status: "ok".to_string(),
        feed_ok: state.health.feed_ok(),
        holidays_cached: state.holidays.len(),
        holidays_last_fetched: state.holidays.last_fetched().map(|d| d.to_string()),
        last_settlement_ms: (last > 0).then_some(last),
        picks_settled: state.health.picks_settled(),
        realtime_subscribers: state.realtime.subscriber_count(),
    })
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    Json(LatencyResponse {
        overall: state.latency.overall(),
        quotes: state.latency.summary(Feed::Quotes),
        holidays: state.latency.summary(Feed::Holidays),
    })
}

async fn get_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let settings = state.settings().await;
    let real_now = state.clock.local_now(Utc::now());
    let effective_now = state.now(&settings);
    Json(StatusResponse {
        real_now,
        effective_now,
        override_active: settings.date_override.is_some(),
        market_open_today: is_market_open_day(effective_now.date(), state.holidays.as_ref()),
        window: market_window(effective_now, state.holidays.as_ref()),
        settings,
        pick_deadline: format!("{:02}:{:02}", PICK_DEADLINE.0, PICK_DEADLINE.1),
        market_close: format!("{:02}:{:02}", SETTLEMENT_TIME.0, SETTLEMENT_TIME.1),
        quiz_duration_secs: state.quizzes.duration().as_secs(),
    })
}

// ---------------------------------------------------------------------------
// Player handlers
// ---------------------------------------------------------------------------

async fn get_profile(
    State(state): State<ApiState>,
    Path(player): Path<String>,
) -> Result<Json<ProfileView>, AppError> {
    let player: Player = player.parse()?;
    let profile = store::get_profile(&state.pool, player).await?;
    Ok(Json(ProfileView::from(&profile)))
}

async fn post_verify_pin(
    State(state): State<ApiState>,
    Path(player): Path<String>,
    Json(body): Json<PinBody>,
) -> Result<Json<ProfileView>, AppError> {
    let player: Player = player.parse()?;
    let settings = state.settings().await;
    let view = pin::verify(&state.pool, &state.realtime, &settings, player, &body.pin).await?;
    Ok(Json(view))
}

// ---------------------------------------------------------------------------
// Addition handlers
// ---------------------------------------------------------------------------

async fn post_start_quiz(
    State(state): State<ApiState>,
    Path(player): Path<String>,
) -> Result<Json<QuizStarted>, AppError> {
    let player: Player = player.parse()?;
    let settings = state.settings().await;
    let now = state.now(&settings);
    let started = state
        .quizzes
        .start(&state.pool, &settings, state.holidays.as_ref(), now, player)
        .await?;
    Ok(Json(started))
}

async fn post_finish_quiz(
    State(state): State<ApiState>,
    Path(player): Path<String>,
    Json(body): Json<FinishBody>,
) -> Result<Json<GameSession>, AppError> {
    let player: Player = player.parse()?;
    let settings = state.settings().await;
    let now = state.now(&settings);
    let session = state
        .quizzes
        .finish(&state.pool, &state.realtime, &state.clock, &settings, now, player, &body.answers)
        .await?;
    Ok(Json(session))
}

async fn get_sessions(
    State(state): State<ApiState>,
    Query(params): Query<SessionsQuery>,
) -> Result<Json<Vec<GameSession>>, AppError> {
    let player = params.player.as_deref().map(str::parse::<Player>).transpose()?;
    let limit = params.limit.unwrap_or(50).clamp(1, SESSION_HISTORY_CAP);
    Ok(Json(store::list_sessions(&state.pool, player, limit).await?))
}

async fn get_daily(State(state): State<ApiState>) -> Result<Json<Vec<DailyEarnings>>, AppError> {
    let sessions = store::list_sessions(&state.pool, None, SESSION_HISTORY_CAP).await?;
    Ok(Json(group_by_day(&sessions)))
}

async fn get_today_session(
    State(state): State<ApiState>,
    Path(player): Path<String>,
) -> Result<Json<TodayResponse>, AppError> {
    let player: Player = player.parse()?;
    let settings = state.settings().await;
    let date = state.now(&settings).date();
    let session = store::session_for_day(&state.pool, player, date).await?;
    Ok(Json(TodayResponse {
        player,
        date,
        played: session.is_some(),
        session,
    }))
}

async fn get_active_questions(
    State(state): State<ApiState>,
    Path(player): Path<String>,
) -> Result<Json<QuizStarted>, AppError> {
    let player: Player = player.parse()?;
    state
        .quizzes
        .prompts(player)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("{player} has no quiz in progress")))
}

// ---------------------------------------------------------------------------
// Nifty handlers
// ---------------------------------------------------------------------------

async fn get_quotes(
    State(state): State<ApiState>,
    Query(params): Query<QuotesQuery>,
) -> Json<QuotesResponse> {
    let settings = state.settings().await;
    let date = state.now(&settings).date();
    let wanted = symbols::search(params.q.as_deref().unwrap_or(""));
    let snapshot = state.market.snapshot(date, NIFTY_50_SYMBOLS).await;

    let quotes = wanted
        .into_iter()
        .map(|symbol| {
            let q = snapshot.quotes.get(symbol);
            QuoteRow {
                symbol,
                price: q.map(|q| q.price),
                change_percent: q.map(|q| q.change_percent),
            }
        })
        .collect();

    Json(QuotesResponse { date, stale: snapshot.stale, quotes })
}

async fn post_pick(
    State(state): State<ApiState>,
    Path(player): Path<String>,
    Json(body): Json<PickBody>,
) -> Result<Json<NiftyPick>, AppError> {
    let player: Player = player.parse()?;
    let settings = state.settings().await;
    let now = state.now(&settings);
    let pick = nifty::submit_pick(
        &state.pool,
        &state.realtime,
        &settings,
        state.holidays.as_ref(),
        now,
        player,
        &body.symbol,
    )
    .await?;
    Ok(Json(pick))
}

async fn get_results(
    State(state): State<ApiState>,
    Path(player): Path<String>,
) -> Result<Json<ResultsView>, AppError> {
    let player: Player = player.parse()?;
    let settings = state.settings().await;
    let now = state.now(&settings);
    Ok(Json(nifty::results_view(&state.pool, state.holidays.as_ref(), now, player).await?))
}

async fn get_nifty_history(
    State(state): State<ApiState>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<NiftyDay>>, AppError> {
    let limit = params.limit.unwrap_or(200).clamp(1, 2_000);
    let picks = store::list_picks(&state.pool, limit).await?;
    Ok(Json(nifty::group_history(picks)))
}

async fn get_leaderboard(State(state): State<ApiState>) -> Result<Json<Vec<EarningsTotals>>, AppError> {
    match store::earnings_totals(&state.pool).await {
        Ok(totals) => {
            if let Err(e) = state.local.set(TOTALS_MIRROR_KEY, &totals) {
                warn!("Failed to mirror earnings totals locally: {e}");
            }
            Ok(Json(totals))
        }
        Err(e) => match state.local.get::<Vec<EarningsTotals>>(TOTALS_MIRROR_KEY) {
            Some(cached) => {
                warn!("Earnings read failed, serving local copy: {e}");
                Ok(Json(cached))
            }
            None => Err(e),
        },
    }
}

// ---------------------------------------------------------------------------
// Admin handlers
// ---------------------------------------------------------------------------

async fn get_admin_settings(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<Settings>, AppError> {
    state.require_admin(&headers)?;
    Ok(Json(state.settings().await))
}

async fn put_admin_settings(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(patch): Json<SettingsPatch>,
) -> Result<Json<Settings>, AppError> {
    state.require_admin(&headers)?;

    let mut writes: Vec<(&str, String)> = Vec::new();
    let mut deletes: Vec<&str> = Vec::new();
    if let Some(raw) = patch.date_override.as_deref().map(str::trim) {
        if raw.is_empty() {
            deletes.push(setting_keys::DATE_OVERRIDE);
        } else {
            let real = state.clock.local_now(Utc::now());
            if parse_override(raw, real).is_none() {
                return Err(AppError::BadRequest(format!(
                    "date_override '{raw}' is not YYYY-MM-DD or YYYY-MM-DDTHH:MM"
                )));
            }
            writes.push((setting_keys::DATE_OVERRIDE, raw.to_string()));
        }
    }
    for (key, value) in [
        (setting_keys::ADDITION_ENABLED, patch.addition_enabled),
        (setting_keys::NIFTY_ENABLED, patch.nifty_enabled),
        (setting_keys::PIN_ENTRY_ENABLED, patch.pin_entry_enabled),
    ] {
        if let Some(v) = value {
            writes.push((key, v.to_string()));
        }
    }

    // Events go out only after the whole patch has committed.
    let removed = store::apply_settings(&state.pool, &writes, &deletes).await?;
    for key in removed {
        state.realtime.publish(
            Table::AppSettings,
            ChangeAction::Delete,
            &serde_json::json!({ "key": key }),
        );
        info!(key, "Setting cleared");
    }
    for (key, value) in &writes {
        state.realtime.publish(
            Table::AppSettings,
            ChangeAction::Update,
            &serde_json::json!({ "key": key, "value": value }),
        );
        info!(key, value = %value, "Setting updated");
    }

    Ok(Json(state.settings().await))
}

async fn clear_date_override(state: &ApiState) -> Result<(), AppError> {
    if store::delete_setting(&state.pool, setting_keys::DATE_OVERRIDE).await? {
        state.realtime.publish(
            Table::AppSettings,
            ChangeAction::Delete,
            &serde_json::json!({ "key": setting_keys::DATE_OVERRIDE }),
        );
        info!("Date override cleared");
    }
    Ok(())
}

async fn delete_date_override(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<Settings>, AppError> {
    state.require_admin(&headers)?;
    clear_date_override(&state).await?;
    Ok(Json(state.settings().await))
}

async fn post_unlock(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(player): Path<String>,
) -> Result<Json<ProfileView>, AppError> {
    state.require_admin(&headers)?;
    let player: Player = player.parse()?;
    Ok(Json(pin::unlock(&state.pool, &state.realtime, player).await?))
}

async fn put_player_pin(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(player): Path<String>,
    Json(body): Json<PinBody>,
) -> Result<Json<ProfileView>, AppError> {
    state.require_admin(&headers)?;
    let player: Player = player.parse()?;
    pin::change_pin(&state.pool, player, &body.pin).await?;
    let profile = store::get_profile(&state.pool, player).await?;
    Ok(Json(ProfileView::from(&profile)))
}

async fn delete_session(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<GameSession>, AppError> {
    state.require_admin(&headers)?;
    let session = store::delete_session(&state.pool, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no session {id}")))?;
    state
        .realtime
        .publish(Table::AdditionLogs, ChangeAction::Delete, &session);
    info!(id = %session.id, player = %session.player, "Session deleted");
    Ok(Json(session))
}

async fn post_reset(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<ResetSummary>, AppError> {
    state.require_admin(&headers)?;
    let summary = store::reset_all(&state.pool).await?;
    let dropped = state.quizzes.clear();
    if let Err(e) = state.local.remove(TOTALS_MIRROR_KEY) {
        warn!("Failed to clear local earnings totals: {e}");
    }

    let marker = serde_json::json!({ "reset": true });
    state.realtime.publish(Table::AdditionLogs, ChangeAction::Delete, &marker);
    state.realtime.publish(Table::NiftyLogs, ChangeAction::Delete, &marker);
    state.realtime.publish(
        Table::AppSettings,
        ChangeAction::Delete,
        &serde_json::json!({ "key": setting_keys::DATE_OVERRIDE }),
    );
    warn!(
        sessions = summary.sessions_deleted,
        picks = summary.picks_deleted,
        quizzes_dropped = dropped,
        "Game data reset by admin"
    );
    Ok(Json(summary))
}

/// Settle now. Today's picks are included only once results are ready;
/// otherwise settlement stops at the previous day.
async fn post_settle(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<SettlementReport>, AppError> {
    state.require_admin(&headers)?;
    let settings = state.settings().await;
    let now = state.now(&settings);
    let up_to = if market_window(now, state.holidays.as_ref()) == MarketWindow::ResultsReady {
        now.date()
    } else {
        now.date().pred_opt().unwrap_or(now.date())
    };
    state.market.cache().invalidate_snapshot();
    Ok(Json(state.settler.settle_pending(up_to).await?))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
