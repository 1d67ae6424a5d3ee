mod board_app;

use std::io;
use std::time::Duration;

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, List, ListItem, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use tokio::sync::mpsc;

use board_app::{
    format_money, format_return, format_window, listen_realtime, realtime_url, truncate, AppState,
    ConnectionStatus, LiveMsg,
};

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> io::Result<()> {
    let base_url = std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(io::Error::other)?;

    let mut app = AppState::new(base_url.clone());

    let (live_tx, live_rx) = mpsc::channel(256);
    tokio::spawn(listen_realtime(realtime_url(&base_url), live_tx));

    // Initial fetch before rendering
    app.refresh(&client).await;

    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut history_state = TableState::default();

    let result = run_loop(&mut terminal, &mut app, &client, live_rx, &mut history_state).await;

    // Restore terminal regardless of result
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    result
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut AppState,
    client: &reqwest::Client,
    mut live_rx: mpsc::Receiver<LiveMsg>,
    history_state: &mut TableState,
) -> io::Result<()> {
    let refresh_interval = Duration::from_secs(2);
    let poll_slice = Duration::from_millis(100);
    let mut last_tick = std::time::Instant::now();

    loop {
        terminal.draw(|f| render(f, app, history_state))?;

        if event::poll(poll_slice)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') => return Ok(()),
                        KeyCode::Char('r') | KeyCode::Char('R') => {
                            app.refresh(client).await;
                            last_tick = std::time::Instant::now();
                        }
                        KeyCode::Down | KeyCode::Char('j') => {
                            let max = app.nifty_days.len().saturating_sub(1);
                            let next = history_state.selected().map_or(0, |i| (i + 1).min(max));
                            history_state.select(Some(next));
                        }
                        KeyCode::Up | KeyCode::Char('k') => {
                            let prev = history_state.selected().map_or(0, |i| i.saturating_sub(1));
                            history_state.select(Some(prev));
                        }
                        _ => {}
                    }
                }
            }
        }

        let mut changed = false;
        while let Ok(msg) = live_rx.try_recv() {
            changed |= app.apply_live(msg);
        }

        if changed || last_tick.elapsed() >= refresh_interval {
            app.refresh(client).await;
            last_tick = std::time::Instant::now();
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, app: &AppState, history_state: &mut TableState) {
    let area = f.area();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Min(0),    // body
            Constraint::Length(8), // event feed
            Constraint::Length(1), // footer
        ])
        .split(area);

    render_header(f, app, chunks[0]);
    render_body(f, app, history_state, chunks[1]);
    render_events(f, app, chunks[2]);
    render_footer(f, chunks[3]);
}

fn title(text: &str) -> Span<'_> {
    Span::styled(text, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
}

fn header_cells(labels: &[&'static str]) -> Row<'static> {
    let cells = labels
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)))
        .collect::<Vec<_>>();
    Row::new(cells).height(1)
}

fn money_color(v: i64) -> Color {
    match v {
        v if v > 0 => Color::Green,
        v if v < 0 => Color::Red,
        _ => Color::White,
    }
}

fn render_header(f: &mut Frame, app: &AppState, area: Rect) {
    let (status_text, status_color) = match &app.status {
        ConnectionStatus::Connected => ("● connected".to_string(), Color::Green),
        ConnectionStatus::Connecting => ("◌ connecting".to_string(), Color::Yellow),
        ConnectionStatus::Error(e) => (format!("✗ {}", truncate(e, 40)), Color::Red),
    };
    let (live_text, live_color) = if app.live {
        ("live", Color::Green)
    } else {
        ("polling", Color::DarkGray)
    };

    let mut spans = vec![
        Span::styled(" WinnerOne  ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::styled(status_text, Style::default().fg(status_color)),
        Span::raw(" "),
        Span::styled(live_text, Style::default().fg(live_color)),
        Span::raw("  │  "),
        Span::styled(
            truncate(&app.market.effective_now, 16),
            Style::default().fg(Color::White),
        ),
        Span::raw("  │  "),
        Span::styled(format_window(&app.market.window), Style::default().fg(Color::White)),
        Span::raw("  │  group "),
        Span::styled(
            format_money(app.group_total()),
            Style::default().fg(money_color(app.group_total())),
        ),
    ];
    if app.market.override_active {
        spans.push(Span::styled("  [date override]", Style::default().fg(Color::Magenta)));
    }

    let paragraph = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::DarkGray)));
    f.render_widget(paragraph, area);
}

fn render_body(f: &mut Frame, app: &AppState, history_state: &mut TableState, area: Rect) {
    // Horizontal split: totals + addition (40%) | nifty history (60%)
    let halves = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(area);

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(5), Constraint::Min(0)])
        .split(halves[0]);

    render_totals(f, app, left[0]);
    render_daily(f, app, left[1]);
    render_history(f, app, history_state, halves[1]);
}

fn render_totals(f: &mut Frame, app: &AppState, area: Rect) {
    let rows: Vec<Row> = app
        .totals
        .iter()
        .map(|t| {
            Row::new(vec![
                Cell::from(t.player.clone()),
                Cell::from(format_money(t.addition)).style(Style::default().fg(money_color(t.addition))),
                Cell::from(format_money(t.nifty)).style(Style::default().fg(money_color(t.nifty))),
                Cell::from(format_money(t.total))
                    .style(Style::default().fg(money_color(t.total)).add_modifier(Modifier::BOLD)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [Constraint::Min(8), Constraint::Length(8), Constraint::Length(8), Constraint::Length(8)],
    )
    .header(header_cells(&["Player", "Maths", "Nifty", "Total"]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(title(" EARNINGS ")),
    );
    f.render_widget(table, area);
}

fn render_daily(f: &mut Frame, app: &AppState, area: Rect) {
    let cell = |v: Option<i64>| match v {
        Some(e) => Cell::from(format_money(e)).style(Style::default().fg(money_color(e))),
        None => Cell::from("—").style(Style::default().fg(Color::DarkGray)),
    };
    let rows: Vec<Row> = app
        .daily
        .iter()
        .map(|d| {
            Row::new(vec![
                Cell::from(d.date.clone()).style(Style::default().fg(Color::DarkGray)),
                cell(d.earnings.ayaan),
                cell(d.earnings.riyaan),
            ])
        })
        .collect();

    let table = Table::new(rows, [Constraint::Length(10), Constraint::Min(7), Constraint::Min(7)])
        .header(header_cells(&["Date", "Ayaan", "Riyaan"]))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::DarkGray))
                .title(title(" ADDITION ")),
        );
    f.render_widget(table, area);
}

fn render_history(f: &mut Frame, app: &AppState, state: &mut TableState, area: Rect) {
    let pick_cell = |p: Option<&board_app::PickRow>| match p {
        Some(p) => Cell::from(format!("{} {}", truncate(&p.stock_symbol, 10), format_return(p.stock_return))),
        None => Cell::from("—").style(Style::default().fg(Color::DarkGray)),
    };
    let earned = |p: Option<&board_app::PickRow>| p.and_then(|p| p.earnings).unwrap_or(0);

    let rows: Vec<Row> = app
        .nifty_days
        .iter()
        .map(|day| {
            let a = day.picks.ayaan.as_ref();
            let r = day.picks.riyaan.as_ref();
            let settled = a.or(r).is_some_and(|p| p.earnings.is_some());
            let result = if !settled {
                Cell::from("pending").style(Style::default().fg(Color::Yellow))
            } else {
                let total = earned(a) + earned(r);
                Cell::from(format_money(total)).style(Style::default().fg(money_color(total)))
            };
            Row::new(vec![
                Cell::from(day.date.clone()).style(Style::default().fg(Color::DarkGray)),
                pick_cell(a),
                pick_cell(r),
                Cell::from(day.winner.clone().unwrap_or_else(|| "—".to_string()))
                    .style(Style::default().fg(Color::Cyan)),
                result,
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(10),
            Constraint::Min(16),
            Constraint::Min(16),
            Constraint::Length(7),
            Constraint::Length(8),
        ],
    )
    .header(header_cells(&["Date", "Ayaan", "Riyaan", "Winner", "Group"]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(title(" NIFTY PICKS ")),
    )
    .row_highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD));

    f.render_stateful_widget(table, area, state);
}

fn render_events(f: &mut Frame, app: &AppState, area: Rect) {
    let items: Vec<ListItem> = app
        .events
        .iter()
        .map(|e| ListItem::new(Line::from(Span::raw(e.clone()))))
        .collect();
    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(title(" LIVE ")),
    );
    f.render_widget(list, area);
}

fn render_footer(f: &mut Frame, area: Rect) {
    let line = Line::from(vec![
        Span::styled(" [q] ", Style::default().fg(Color::Yellow)),
        Span::raw("quit  "),
        Span::styled("[r] ", Style::default().fg(Color::Yellow)),
        Span::raw("refresh  "),
        Span::styled("[↑↓ / j k] ", Style::default().fg(Color::Yellow)),
        Span::raw("scroll picks  "),
        Span::styled("auto-refresh: 2s", Style::default().fg(Color::DarkGray)),
    ]);
    let paragraph = Paragraph::new(line).style(Style::default().fg(Color::White));
    f.render_widget(paragraph, area);
}
