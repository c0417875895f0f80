//! # `examly_monitor`: Live Anti-Cheat Feed
//!
//! Terminal counterpart of the monitoring dashboard used by exam staff. Cached events
//! are printed first, then the monitoring socket is opened and every new
//! event is printed as it arrives, newest last.
//!
//! ## Usage
//!
//! ```bash
//! examly_monitor --api-base http://127.0.0.1:8000
//!
//! # Start from an empty cache
//! examly_monitor --clear
//!
//! # Only show what is cached, do not connect
//! examly_monitor --offline
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use lib_examly::configs::{load_config, AppConfig};
use lib_examly::feed::{
    format_time, ConnectionManager, ConnectionStatus, FeedChange, FeedConfig, MonitorEvent,
    MonitorFeed, PersistenceMirror, Severity,
};
use lib_examly::loggers;
use lib_examly::storage::FileStore;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(
    name = "examly_monitor",
    about = "Follow the Examly anti-cheat feed from the terminal",
    version
)]
struct Cli {
    #[command(flatten)]
    config: AppConfig,

    /// Drop cached events before connecting.
    #[arg(long)]
    clear: bool,

    /// Print cached events and exit without connecting.
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = load_config(cli.config).resolve()?;
    loggers::setup_logging(&settings.log_dir, &settings.log_level, "examly_monitor")?;

    let store = FileStore::new(&settings.data_dir)
        .with_context(|| format!("cannot open data dir {}", settings.data_dir.display()))?;
    let mut feed = MonitorFeed::open(PersistenceMirror::new(store));

    if cli.clear {
        feed.clear().context("failed to clear cached events")?;
        log::info!("Cached events cleared.");
    }

    println!("{} {} cached events", "Anti-cheat monitor:".bold(), feed.len());
    for event in feed.events_desc() {
        print_event(event);
    }
    if cli.offline {
        return Ok(());
    }

    log::info!("Connecting to {}", settings.ws_url);
    let mut connection = ConnectionManager::spawn(FeedConfig::from_settings(&settings));
    let mut status = connection.watch_status();
    print_status(*status.borrow());

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            frame = connection.next_frame() => match frame {
                Some(frame) => match feed.apply(frame) {
                    FeedChange::History { added, total } => {
                        log::info!("History merged: {} new, {} total.", added, total);
                        println!("{}", format!("history: +{} ({} total)", added, total).dimmed());
                    }
                    FeedChange::Live(event) => print_event(&event),
                    FeedChange::Duplicate => log::debug!("Duplicate live event ignored."),
                },
                None => {
                    log::info!("Monitor feed stopped.");
                    break;
                }
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                print_status(*status.borrow_and_update());
            }
            _ = &mut shutdown => break,
        }
    }

    connection.teardown().await;
    log::info!("Shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Cannot listen for SIGTERM: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {}
    }
}

fn print_status(status: ConnectionStatus) {
    let label = format!("[{}]", status);
    let label = match status {
        ConnectionStatus::Open => label.green(),
        ConnectionStatus::Connecting => label.yellow(),
        ConnectionStatus::Closed => label.truecolor(128, 128, 128),
        ConnectionStatus::Error => label.red(),
    };
    println!("{}", label);
}

fn print_event(event: &MonitorEvent) {
    let severity = event.severity();
    let badge = format!("{:>4}", severity.label());
    let badge = match severity {
        Severity::High => badge.red().bold(),
        Severity::Med => badge.yellow(),
        Severity::Low => badge.truecolor(128, 128, 128),
    };

    let mut line = format!(
        "{} {} {} attempt:#{}",
        format_time(&event.ts).dimmed(),
        badge,
        event.event.bold(),
        event.attempt_id
    );
    if let Some(exam_id) = event.exam_id {
        line.push_str(&format!(" exam:#{}", exam_id));
    }
    if let Some(name) = &event.full_name {
        line.push_str(&format!(" {}", name));
    }
    if let Some(tid) = &event.telegram_id {
        line.push_str(&format!(" (tid:{})", tid));
    }
    if let Some(detail) = &event.detail {
        line.push_str(&format!(" {}", detail.to_string().dimmed()));
    }
    println!("{}", line);
}
