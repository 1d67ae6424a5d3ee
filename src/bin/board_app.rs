use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Delays between realtime reconnect attempts; the last one repeats.
const RECONNECT_BACKOFF_MS: &[u64] = &[500, 1000, 2000, 5000];
const EVENT_FEED_CAP: usize = 50;

// ---------------------------------------------------------------------------
// API response types (mirror routes.rs shapes)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct TotalsRow {
    pub player: String,
    pub addition: i64,
    pub nifty: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct WindowView {
    pub state: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[allow(dead_code)]
pub struct StatusResponse {
    pub effective_now: String,
    pub override_active: bool,
    pub window: WindowView,
    pub pick_deadline: String,
    pub market_close: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PickRow {
    pub stock_symbol: String,
    pub stock_return: Option<f64>,
    pub earnings: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Pair<T> {
    #[serde(rename = "Ayaan")]
    pub ayaan: Option<T>,
    #[serde(rename = "Riyaan")]
    pub riyaan: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NiftyDayRow {
    pub date: String,
    pub picks: Pair<PickRow>,
    pub winner: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DailyRow {
    pub date: String,
    pub earnings: Pair<i64>,
}

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Error(String),
    Connecting,
}

/// Messages from the realtime listener task.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveMsg {
    Up,
    Down(String),
    Event(String),
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub status: ConnectionStatus,
    pub live: bool,
    pub totals: Vec<TotalsRow>,
    pub market: StatusResponse,
    pub nifty_days: Vec<NiftyDayRow>,
    pub daily: Vec<DailyRow>,
    pub events: VecDeque<String>,
    pub base_url: String,
}

impl AppState {
    pub fn new(base_url: String) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            live: false,
            totals: Vec::new(),
            market: StatusResponse::default(),
            nifty_days: Vec::new(),
            daily: Vec::new(),
            events: VecDeque::new(),
            base_url,
        }
    }

    pub fn group_total(&self) -> i64 {
        self.totals.iter().map(|t| t.total).sum()
    }

    /// Apply a realtime message. Returns true when the boards should refetch.
    pub fn apply_live(&mut self, msg: LiveMsg) -> bool {
        match msg {
            LiveMsg::Up => {
                self.live = true;
                false
            }
            LiveMsg::Down(e) => {
                self.live = false;
                self.push_event(format!("realtime down: {e}"));
                false
            }
            LiveMsg::Event(text) => {
                self.push_event(summarize_event(&text));
                true
            }
        }
    }

    fn push_event(&mut self, line: String) {
        self.events.push_front(line);
        self.events.truncate(EVENT_FEED_CAP);
    }

    pub async fn refresh(&mut self, client: &reqwest::Client) {
        let totals_url = format!("{}/leaderboard", self.base_url);
        let status_url = format!("{}/status", self.base_url);
        let nifty_url = format!("{}/nifty/history?limit=60", self.base_url);
        let daily_url = format!("{}/addition/daily", self.base_url);

        let (totals_res, status_res, nifty_res, daily_res) = tokio::join!(
            client.get(&totals_url).send(),
            client.get(&status_url).send(),
            client.get(&nifty_url).send(),
            client.get(&daily_url).send(),
        );

        let (totals_resp, status_resp) = match (totals_res, status_res) {
            (Ok(t), Ok(s)) => (t, s),
            (Err(e), _) | (_, Err(e)) => {
                self.status = ConnectionStatus::Error(format!("{e}"));
                return;
            }
        };

        let (totals, market) = tokio::join!(
            totals_resp.json::<Vec<TotalsRow>>(),
            status_resp.json::<StatusResponse>(),
        );

        match (totals, market) {
            (Ok(t), Ok(m)) => {
                self.totals = t;
                self.market = m;
                self.status = ConnectionStatus::Connected;

                if let Ok(n) = nifty_res {
                    if let Ok(days) = n.json::<Vec<NiftyDayRow>>().await {
                        self.nifty_days = days;
                    }
                }
                if let Ok(d) = daily_res {
                    if let Ok(daily) = d.json::<Vec<DailyRow>>().await {
                        self.daily = daily;
                    }
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                self.status = ConnectionStatus::Error(format!("parse error: {e}"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Realtime listener
// ---------------------------------------------------------------------------

/// Follow `/realtime` forever, reconnecting with backoff. Exits when the
/// board drops its receiver.
pub async fn listen_realtime(ws_url: String, tx: mpsc::Sender<LiveMsg>) {
    let mut backoff_idx = 0usize;

    loop {
        if let Err(e) = follow_once(&ws_url, &tx, &mut backoff_idx).await {
            if tx.send(LiveMsg::Down(e)).await.is_err() {
                return;
            }
        }
        if tx.is_closed() {
            return;
        }

        tokio::time::sleep(Duration::from_millis(backoff_delay(backoff_idx))).await;
        backoff_idx = (backoff_idx + 1).min(RECONNECT_BACKOFF_MS.len() - 1);
    }
}

/// One connection. Ok only when the receiver has gone away.
async fn follow_once(ws_url: &str, tx: &mpsc::Sender<LiveMsg>, backoff_idx: &mut usize) -> Result<(), String> {
    let (ws_stream, _) = connect_async(ws_url).await.map_err(|e| e.to_string())?;
    let (mut write, mut read) = ws_stream.split();
    *backoff_idx = 0;
    if tx.send(LiveMsg::Up).await.is_err() {
        return Ok(());
    }

    while let Some(msg) = read.next().await {
        match msg.map_err(|e| e.to_string())? {
            Message::Text(text) => {
                if tx.send(LiveMsg::Event(text.to_string())).await.is_err() {
                    return Ok(());
                }
            }
            Message::Ping(data) => write.send(Message::Pong(data)).await.map_err(|e| e.to_string())?,
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err("connection closed".to_string())
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

pub fn backoff_delay(idx: usize) -> u64 {
    RECONNECT_BACKOFF_MS
        .get(idx)
        .or(RECONNECT_BACKOFF_MS.last())
        .copied()
        .unwrap_or(1000)
}

/// `http://host:3000` -> `ws://host:3000/realtime`.
pub fn realtime_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws}/realtime")
}

pub fn format_money(v: i64) -> String {
    match v {
        0 => "₹0".to_string(),
        v if v > 0 => format!("+₹{v}"),
        v => format!("-₹{}", v.unsigned_abs()),
    }
}

pub fn format_return(v: Option<f64>) -> String {
    match v {
        Some(r) => format!("{r:+.2}%"),
        None => "—".to_string(),
    }
}

pub fn format_window(w: &WindowView) -> String {
    match (w.state.as_str(), w.reason.as_deref()) {
        ("closed", Some(reason)) => format!("closed ({reason})"),
        ("accepting_picks", _) => "picks open".to_string(),
        ("trading", _) => "trading".to_string(),
        ("results_ready", _) => "results ready".to_string(),
        ("", _) => "—".to_string(),
        (other, _) => other.to_string(),
    }
}

/// One-line description of a change event for the feed.
pub fn summarize_event(text: &str) -> String {
    let Ok(v) = serde_json::from_str::<serde_json::Value>(text) else {
        return truncate(text, 60);
    };
    let table = v["table"].as_str().unwrap_or("?");
    let action = v["action"].as_str().unwrap_or("?");
    let r = &v["record"];
    let detail = match table {
        "nifty_logs" => format!(
            "{} {} {}",
            r["player"].as_str().unwrap_or(""),
            r["stock_symbol"].as_str().unwrap_or(""),
            r["earnings"].as_i64().map(format_money).unwrap_or_default(),
        ),
        "addition_logs" => format!(
            "{} score {}",
            r["player"].as_str().unwrap_or(""),
            r["score"].as_i64().map(|s| s.to_string()).unwrap_or_default(),
        ),
        "app_settings" => r["key"].as_str().unwrap_or("").to_string(),
        "profiles" => format!(
            "{}{}",
            r["player"].as_str().unwrap_or(""),
            if r["is_locked"].as_bool() == Some(true) { " locked" } else { "" },
        ),
        _ => String::new(),
    };
    let line = format!("{action} {table} {}", detail.trim());
    truncate(line.trim(), 60)
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
