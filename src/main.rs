mod config;
mod enrichment;
mod keybindings;
mod mapper;
mod scanner;
mod state;
mod traffic_scope;
mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::config::Config;
use crate::enrichment::{EnrichmentService, GeoDatabase, ReverseResolver, SystemResolver};
use crate::mapper::ProcessInodeMapper;
use crate::scanner::{BandwidthScanner, ConnectionScanner, GlobalStats};
use crate::state::{CorrelationStore, RowData};
use crate::ui::AppState;

/// GlowNet - live TCP connections joined to their processes
#[derive(Parser, Debug)]
#[command(name = "glownet")]
#[command(version)]
#[command(about = "Network connection monitor with process, country and hostname info", long_about = None)]
struct Args {
    /// Config file (default: <config dir>/glownet/config.json)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Root of the proc filesystem
    #[arg(long, value_name = "DIR")]
    proc_root: Option<PathBuf>,

    /// Refresh interval in milliseconds
    #[arg(long, value_name = "MS")]
    interval: Option<u64>,

    /// MaxMind country database (.mmdb)
    #[arg(long, value_name = "FILE")]
    geoip: Option<PathBuf>,

    /// Don't resolve remote hostnames
    #[arg(long)]
    no_dns: bool,

    /// Print one snapshot as JSON and exit (no TUI)
    #[arg(long)]
    once: bool,

    /// Write the effective configuration back to the config file
    #[arg(long)]
    save_config: bool,
}

impl Args {
    /// Overlay command line flags on the loaded config
    fn apply(&self, config: &mut Config) {
        if let Some(ref root) = self.proc_root {
            config.proc_root = root.clone();
        }
        if let Some(ms) = self.interval {
            config.refresh_interval_ms = ms;
        }
        if let Some(ref path) = self.geoip {
            config.geoip_database = Some(path.clone());
        }
        if self.no_dns {
            config.resolve_hostnames = false;
        }
    }
}

/// Headless output for --once
#[derive(Serialize)]
struct Report {
    stats: GlobalStats,
    connections: Vec<RowData>,
}

fn build_store(config: &Config) -> CorrelationStore {
    let geo = GeoDatabase::load(config.geoip_database.as_deref());
    let resolver: Option<Arc<dyn ReverseResolver>> = if config.resolve_hostnames {
        Some(Arc::new(SystemResolver))
    } else {
        None
    };

    let enrichment = EnrichmentService::new(
        geo,
        resolver,
        tokio::runtime::Handle::current(),
        config.max_concurrent_lookups,
    );
    log::info!("Enrichment: {}", enrichment.geo_status());

    CorrelationStore::new(
        Box::new(ConnectionScanner::new(&config.proc_root)),
        Box::new(ProcessInodeMapper::new(&config.proc_root)),
        Arc::new(enrichment),
    )
}

async fn run_once(
    store: &CorrelationStore,
    bandwidth: &mut BandwidthScanner,
    period: Duration,
) -> Result<()> {
    // Two samples so bandwidth is a real delta and hostnames get a chance to resolve
    store.refresh(bandwidth);
    store.table_rows();
    let _ = tokio::join!(
        tokio::time::sleep(period),
        tokio::time::timeout(period, store.enrichment().drain()),
    );
    store.refresh(bandwidth);

    let report = Report {
        stats: store.global_stats(),
        connections: store.table_rows(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize snapshot")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    if std::env::var("RUST_LOG").is_ok() {
        pretty_env_logger::formatted_builder()
            .parse_default_env()
            .init();
    }

    let config_path = match args.config {
        Some(ref path) => path.clone(),
        None => Config::config_path()?,
    };
    let mut config = match Config::load_from(&config_path) {
        Ok(config) => config,
        Err(e) => {
            log::warn!("Ignoring unreadable config: {:#}", e);
            Config::default()
        }
    };
    args.apply(&mut config);

    if args.save_config {
        config.save_to(&config_path)?;
    }

    let period = Duration::from_millis(config.refresh_interval_ms.max(100));
    let store = build_store(&config);
    let mut bandwidth = BandwidthScanner::new(&config.proc_root);

    if args.once {
        let res = run_once(&store, &mut bandwidth, period).await;
        store.enrichment().shutdown();
        return res;
    }

    // Setup terminal for TUI mode
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = AppState::new(config.default_sort);
    let res = run_app(&mut terminal, &mut app, &store, &mut bandwidth, period).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    store.enrichment().shutdown();
    log::info!("GlowNet exiting");

    if let Err(err) = res {
        log::error!("Error: {:?}", err);
        return Err(err);
    }

    Ok(())
}

async fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut AppState,
    store: &CorrelationStore,
    bandwidth: &mut BandwidthScanner,
    period: Duration,
) -> Result<()> {
    let mut update_interval = interval(period);

    loop {
        terminal.draw(|f| ui::draw_ui(f, app))?;

        // Handle input with timeout
        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                // ALWAYS check Ctrl+C first - force quit regardless of mode
                if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
                    return Ok(());
                }

                // If help is shown, any key closes it
                if app.show_help {
                    app.show_help = false;
                    continue;
                }

                // Filter input captures everything else
                if app.filtering {
                    match key.code {
                        KeyCode::Enter | KeyCode::Esc => app.stop_filter(),
                        KeyCode::Backspace => app.pop_filter_char(),
                        KeyCode::Char(c) => app.push_filter_char(c),
                        _ => {}
                    }
                    app.update_rows(store.table_rows(), store.global_stats());
                    continue;
                }

                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => {
                        return Ok(());
                    }
                    KeyCode::Char('h') | KeyCode::Char('?') => {
                        app.show_help = true;
                    }
                    KeyCode::Char('s') => {
                        app.cycle_sort();
                    }
                    KeyCode::Char('f') => {
                        app.start_filter();
                        app.update_rows(store.table_rows(), store.global_stats());
                    }
                    KeyCode::Down | KeyCode::Char('j') => {
                        app.select_next();
                    }
                    KeyCode::Up | KeyCode::Char('k') => {
                        app.select_previous();
                    }
                    _ => {}
                }
            }
        }

        // Refresh the snapshot periodically
        if tokio::time::timeout(Duration::from_millis(1), update_interval.tick())
            .await
            .is_ok()
        {
            store.refresh(bandwidth);
            app.update_rows(store.table_rows(), store.global_stats());

            let updated = store
                .last_refresh()
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_default();
            let pending = store.enrichment().pending_lookups();
            app.status_message = if pending > 0 {
                format!(
                    "Monitoring {} connection(s), resolving {} host(s) | updated {}",
                    store.connection_count(),
                    pending,
                    updated
                )
            } else {
                format!(
                    "Monitoring {} connection(s) | updated {}",
                    store.connection_count(),
                    updated
                )
            };
        }
    }
}
