use anyhow::{Context, Result};
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use holiday_sync::calendar::WEEKDAY_LABELS;
use holiday_sync::{
    load_holidays, refresh_holidays, AppConfig, DatasetSource, HttpSource, MonthGrid, RowStore,
    SessionReport, SyncOutcome, Synchronizer,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dcalendar", version, about = "Month calendar with the national holiday list")]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Holiday database, overriding the configured path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Refresh the holiday cache if it is due
    Sync {
        /// Contact the feed even if it was checked this month
        #[arg(long)]
        force: bool,
    },
    /// Print a month with weekends and holidays marked
    Show {
        /// Month to show as YYYY-MM (defaults to the current month)
        #[arg(long)]
        month: Option<String>,
    },
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let source = HttpSource::new(config.source.clone())?;
    info!("holiday feed: {}", source.url());
    let synchronizer = Synchronizer::new(source);
    let mut store = RowStore::new(config.store_config());
    let now = Local::now().naive_local();

    match cli.command {
        Command::Sync { force } => {
            let report = if force {
                refresh_holidays(&mut store, &synchronizer, now)?
            } else {
                load_holidays(&mut store, &synchronizer, now)?
            };
            println!("{}", describe(&report));
        }
        Command::Show { month } => {
            let grid = match month {
                Some(month) => parse_month(&month)?,
                None => MonthGrid::today(),
            };
            let grid = show_month(&mut store, &synchronizer, now, grid)?;
            print!("{}", render(&grid));
        }
    }

    store.close()?;
    Ok(())
}

/// Refresh the cache if due, then mark the grid from whatever it holds. A
/// failed refresh has already been rolled back, so the previous list is shown.
fn show_month<S: DatasetSource>(
    store: &mut RowStore,
    synchronizer: &Synchronizer<S>,
    now: NaiveDateTime,
    grid: MonthGrid,
) -> Result<MonthGrid> {
    if let Err(err) = load_holidays(store, synchronizer, now) {
        warn!("holiday update failed, showing cached list: {}", err);
    }
    Ok(grid.with_holidays(store)?)
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_month(month: &str) -> Result<MonthGrid> {
    let first = NaiveDate::parse_from_str(&format!("{month}-01"), "%Y-%m-%d")
        .with_context(|| format!("invalid month {month:?}, expected YYYY-MM"))?;
    Ok(MonthGrid::containing(first))
}

fn describe(report: &SessionReport) -> String {
    match report {
        SessionReport::Fresh => "Holiday list already checked this month.".to_string(),
        SessionReport::Synced(SyncOutcome::Skipped(err)) => {
            format!("No update performed: {err}")
        }
        SessionReport::Synced(SyncOutcome::Unchanged) => "Holiday list unchanged.".to_string(),
        SessionReport::Synced(SyncOutcome::Updated { records }) => {
            format!("Holiday list updated ({records} entries).")
        }
    }
}

/// Sundays and holidays are marked `*`, Saturdays `+`; days of the
/// neighbouring months are shown as `.`.
fn render(grid: &MonthGrid) -> String {
    let mut out = format!("{}\n", grid.title());
    for label in WEEKDAY_LABELS {
        out.push_str(&format!(" {label} "));
    }
    out.push('\n');
    for week in grid.weeks() {
        for cell in week {
            if !cell.in_month {
                out.push_str("  . ");
                continue;
            }
            let marker = if cell.kind.is_red() {
                '*'
            } else if cell.kind.is_blue() {
                '+'
            } else {
                ' '
            };
            out.push_str(&format!("{:>3}{}", cell.date.day(), marker));
        }
        out.push('\n');
    }
    for (date, name) in grid.holidays() {
        out.push_str(&format!("{} {}\n", date.format("%m/%d"), name));
    }
    out
}
