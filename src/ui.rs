use crate::config::SortKey;
use crate::scanner::GlobalStats;
use crate::state::RowData;
use crate::traffic_scope::TrafficScope;
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState},
};

pub struct AppState {
    /// Rows after filtering and sorting, as displayed
    pub rows: Vec<RowData>,
    pub table_state: TableState,
    pub sort_by: SortKey,
    pub filter: String,
    pub filtering: bool,
    pub show_help: bool,
    pub status_message: String,
    pub stats: GlobalStats,
    /// Connection count before filtering
    pub total_rows: usize,
}

impl AppState {
    pub fn new(sort_by: SortKey) -> Self {
        Self {
            rows: Vec::new(),
            table_state: TableState::default(),
            sort_by,
            filter: String::new(),
            filtering: false,
            show_help: false,
            status_message: String::from("GlowNet started. Press 'h' for help."),
            stats: GlobalStats::default(),
            total_rows: 0,
        }
    }

    /// Replace the displayed rows with a fresh projection from the store
    pub fn update_rows(&mut self, rows: Vec<RowData>, stats: GlobalStats) {
        self.total_rows = rows.len();
        self.stats = stats;
        self.rows = apply_view(rows, &self.filter, self.sort_by);

        // Keep the selection in range
        match self.table_state.selected() {
            Some(i) if i >= self.rows.len() => {
                self.table_state
                    .select(self.rows.len().checked_sub(1));
            }
            None if !self.rows.is_empty() => self.table_state.select(Some(0)),
            _ => {}
        }
    }

    pub fn select_next(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        let next = match self.table_state.selected() {
            Some(i) if i + 1 < self.rows.len() => i + 1,
            Some(i) => i,
            None => 0,
        };
        self.table_state.select(Some(next));
    }

    pub fn select_previous(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        let prev = self.table_state.selected().map_or(0, |i| i.saturating_sub(1));
        self.table_state.select(Some(prev));
    }

    pub fn cycle_sort(&mut self) {
        self.sort_by = self.sort_by.next();
        let rows = std::mem::take(&mut self.rows);
        self.rows = apply_view(rows, &self.filter, self.sort_by);
        self.status_message = format!("Sorted by {}", self.sort_by.label());
    }

    pub fn start_filter(&mut self) {
        self.filtering = true;
        self.filter.clear();
    }

    pub fn stop_filter(&mut self) {
        self.filtering = false;
    }

    pub fn push_filter_char(&mut self, c: char) {
        self.filter.push(c);
    }

    pub fn pop_filter_char(&mut self) {
        self.filter.pop();
    }
}

/// Filter (case-insensitive substring on process, host or remote address) then sort
pub fn apply_view(rows: Vec<RowData>, filter: &str, sort_by: SortKey) -> Vec<RowData> {
    let needle = filter.to_lowercase();
    let mut rows: Vec<RowData> = if needle.is_empty() {
        rows
    } else {
        rows.into_iter()
            .filter(|r| {
                r.process_name.to_lowercase().contains(&needle)
                    || r.remote_host.to_lowercase().contains(&needle)
                    || r.remote_addr.to_lowercase().contains(&needle)
            })
            .collect()
    };

    match sort_by {
        SortKey::Pid => rows.sort_by_key(|r| r.pid),
        SortKey::Name => rows.sort_by(|a, b| a.process_name.cmp(&b.process_name)),
        SortKey::Host => rows.sort_by(|a, b| a.remote_host.cmp(&b.remote_host)),
    }
    rows
}

/// Format bytes as human-readable string (e.g., "1.50 KB", "500.00 B")
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: f64 = 1024.0;
    const PREFIXES: [&str; 6] = ["K", "M", "G", "T", "P", "E"];

    let b = bytes as f64;
    if b < UNIT {
        return format!("{:.2} B", b);
    }

    let mut value = b / UNIT;
    let mut exp = 0;
    while value >= UNIT && exp < PREFIXES.len() - 1 {
        value /= UNIT;
        exp += 1;
    }
    format!("{:.2} {}B", value, PREFIXES[exp])
}

pub fn draw_ui(f: &mut Frame, app: &mut AppState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(5),    // Connection table
            Constraint::Length(3), // Status bar
        ])
        .split(f.area());

    draw_header(f, chunks[0], app);
    draw_connection_table(f, chunks[1], app);
    draw_status_bar(f, chunks[2], app);

    if app.show_help {
        draw_help_overlay(f, f.area());
    }
}

fn draw_header(f: &mut Frame, area: Rect, app: &AppState) {
    let line = Line::from(vec![
        Span::styled(
            " GlowNet ",
            Style::default()
                .fg(Color::White)
                .bg(Color::Magenta)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            " Network Monitoring Tool  ",
            Style::default().fg(Color::Magenta),
        ),
        Span::styled(
            format!("Download: {}/s", format_bytes(app.stats.download_rate)),
            Style::default().fg(Color::Green),
        ),
        Span::raw("  "),
        Span::styled(
            format!("Upload: {}/s", format_bytes(app.stats.upload_rate)),
            Style::default().fg(Color::LightRed),
        ),
        Span::raw(format!(
            "  |  {} of {} connections",
            app.rows.len(),
            app.total_rows
        )),
    ]);

    let header = Paragraph::new(line).block(Block::default().borders(Borders::ALL));
    f.render_widget(header, area);
}

fn draw_connection_table(f: &mut Frame, area: Rect, app: &mut AppState) {
    let titles = [
        "PID",
        "Process",
        "Local Address",
        "Remote Address",
        "Remote Host",
        "Country",
    ];
    let header = Row::new(titles.iter().map(|t| {
        let style = if *t == app.sort_by.label() {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().add_modifier(Modifier::BOLD)
        };
        Cell::from(*t).style(style)
    }))
    .bottom_margin(1);

    let rows = app.rows.iter().map(|r| {
        let style = match r.scope {
            TrafficScope::Internet => Style::default().fg(Color::White),
            TrafficScope::Local => Style::default().fg(Color::DarkGray),
        };
        Row::new(vec![
            Cell::from(r.pid.to_string()),
            Cell::from(r.process_name.clone()),
            Cell::from(r.local_addr.clone()),
            Cell::from(r.remote_addr.clone()),
            Cell::from(r.remote_host.clone()),
            Cell::from(r.country.clone()),
        ])
        .style(style)
    });

    let widths = [
        Constraint::Length(7),
        Constraint::Length(15),
        Constraint::Length(25),
        Constraint::Length(25),
        Constraint::Min(20),
        Constraint::Length(15),
    ];

    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title("Connections"))
        .highlight_style(
            Style::default()
                .fg(Color::LightYellow)
                .bg(Color::Blue)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▶ ");

    f.render_stateful_widget(table, area, &mut app.table_state);
}

fn draw_status_bar(f: &mut Frame, area: Rect, app: &AppState) {
    let line = if app.filtering {
        Line::from(vec![
            Span::styled(
                "FILTER: ",
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!("{}█", app.filter)),
            Span::styled("  (Enter/Esc to close)", Style::default().fg(Color::Gray)),
        ])
    } else {
        let mut spans = vec![];
        for (i, (key, description)) in crate::keybindings::get_status_bar_keybindings()
            .iter()
            .enumerate()
        {
            if i > 0 {
                spans.push(Span::raw("  "));
            }
            spans.push(Span::styled(
                format!("[{}]", key),
                Style::default().fg(Color::Yellow),
            ));
            spans.push(Span::raw(format!(" {}", description)));
        }
        spans.push(Span::raw("  |  "));
        if !app.filter.is_empty() {
            spans.push(Span::styled(
                format!("FILTER: {} | ", app.filter),
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ));
        }
        spans.push(Span::styled(
            app.status_message.as_str(),
            Style::default().fg(Color::Gray),
        ));
        Line::from(spans)
    };

    let status = Paragraph::new(line).block(Block::default().borders(Borders::ALL));
    f.render_widget(status, area);
}

fn draw_help_overlay(f: &mut Frame, area: Rect) {
    let mut help_text = vec![
        Line::from(""),
        Line::from(Span::styled(
            "GlowNet - Keyboard Shortcuts",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];

    for binding in crate::keybindings::get_all_keybindings() {
        help_text.push(Line::from(format!(
            "  {:12} - {}",
            binding.key, binding.description
        )));
    }

    help_text.push(Line::from(""));
    help_text.push(Line::from("Press any key to close"));

    let help_area = centered_rect(60, 50, area);
    let help = Paragraph::new(help_text)
        .style(Style::default().bg(Color::Black).fg(Color::White))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Help")
                .style(Style::default().fg(Color::Cyan)),
        );

    f.render_widget(Clear, help_area);
    f.render_widget(help, help_area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
