//! Patch GW - failover-aware MIDI patch router
//!
//! Runs the failover controller with a terminal front end. A mode change is applied by
//! relaunching the process, which then starts from the persisted mode.

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

mod cli;

use patch_gw::config::{AppConfig, EnumerationBackend};
use patch_gw::controller::{self, Collaborators};
use patch_gw::drivers::{ports, DeviceEnumerator, MidirEnumerator, ReceiveMidiRelay, SendMidiTool};
use patch_gw::events::{Notification, Notifier};
use patch_gw::mode::ConnectionMode;
use patch_gw::paths::AppPaths;
use patch_gw::state::{JsonStateStore, PersistedState, StateStore};

/// Patch GW - send footswitch patches over Bluetooth or USB with automatic failover
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults to the app data directory)
    #[arg(short, long, env = "PATCH_GW_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit console logs as JSON
    #[arg(long)]
    log_json: bool,

    /// List available MIDI ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Run without the interactive prompt (stop with Ctrl+C)
    #[arg(long)]
    no_repl: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut paths = AppPaths::detect();
    if let Some(config) = &args.config {
        paths = paths.with_config(config.clone());
    }
    paths.ensure_directories()?;

    // Read state before logging starts: it carries the debug preference
    let store = Arc::new(JsonStateStore::new(&paths.state_file));
    let loaded = store.load().await;
    let debug_enabled = loaded.as_ref().map(|s| s.debug_enabled).unwrap_or(false);

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| if debug_enabled { "debug" } else { "info" }.to_string());
    let log_guard = init_logging(&level, args.log_json, &paths.logs_dir)?;

    info!("Starting Patch GW v{}...", env!("CARGO_PKG_VERSION"));
    info!("Data directory: {}", paths.base_dir().display());

    if args.list_ports {
        ports::print_ports()?;
        return Ok(());
    }

    let mut persisted = match loaded {
        Ok(state) => state,
        Err(e) => {
            warn!("State file unreadable ({}), starting from defaults", e);
            PersistedState::default()
        },
    };
    if persisted.pending_restart {
        info!("Relaunched after mode change to {}", persisted.mode);
        persisted.pending_restart = false;
        if let Err(e) = store.save(&persisted).await {
            warn!("Could not clear restart marker: {}", e);
        }
    }

    let config = load_config(&paths.config).await?;

    let (notifier, mut notifications) = Notifier::channel(config.timing.activity_window());
    let controller = controller::spawn(
        &config,
        &persisted,
        collaborators(&config, store),
        notifier,
    )?;

    println!(
        "{} {} mode. Type 'help' for commands.",
        "Patch GW".bold().cyan(),
        persisted.mode.to_string().green()
    );

    // The REPL blocks on stdin, so it lives on a plain thread
    let repl_done = if args.no_repl {
        None
    } else {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = controller.clone();
        let prefix = config.patch_template.prefix_commands()?;
        let runtime = tokio::runtime::Handle::current();
        std::thread::spawn(move || {
            if let Err(e) = cli::run_repl(handle, prefix, runtime) {
                eprintln!("REPL error: {}", e);
            }
            let _ = done_tx.send(());
        });
        Some(done_rx)
    };
    let repl_closed = async move {
        match repl_done {
            Some(done) => {
                let _ = done.await;
            },
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(repl_closed);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut last_status = None;
    let mut restart = None;
    loop {
        tokio::select! {
            Some(notification) = notifications.recv() => {
                cli::render_notification(&notification, &mut last_status);
                if let Notification::RestartRequested { mode } = notification {
                    restart = Some(mode);
                    break;
                }
            },
            _ = &mut repl_closed => {
                info!("REPL closed");
                break;
            },
            _ = &mut shutdown => break,
        }
    }

    controller.shutdown().await;

    match restart {
        Some(mode) => info!("Relaunching in {} mode", mode),
        None => info!("Patch GW shutdown complete"),
    }
    // Neither exec nor exit runs destructors, so flush the file log here
    drop(log_guard);

    if let Some(mode) = restart {
        relaunch(mode)?;
    }

    // The REPL thread may still be parked in readline
    std::process::exit(0);
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        let config = AppConfig::load(path).await?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    } else {
        info!(
            "No config at {}, using built-in defaults",
            path.display()
        );
        Ok(AppConfig::default())
    }
}

fn collaborators(config: &AppConfig, store: Arc<JsonStateStore>) -> Collaborators {
    let sendmidi = Arc::new(SendMidiTool::new(config.tools.sendmidi.clone()));
    let enumerator: Arc<dyn DeviceEnumerator> = match config.enumeration.backend {
        EnumerationBackend::Sendmidi => sendmidi.clone(),
        EnumerationBackend::Midir => Arc::new(MidirEnumerator),
    };
    info!(backend = enumerator.name(), "Device enumeration backend");

    Collaborators {
        enumerator,
        sender: sendmidi,
        launcher: Arc::new(ReceiveMidiRelay::new(config.tools.receivemidi.clone())),
        store: store as Arc<dyn StateStore>,
    }
}

/// Replace this process with a fresh copy of itself; it comes up in `mode` because the
/// mode has already been persisted.
fn relaunch(mode: ConnectionMode) -> Result<()> {
    let exe = std::env::current_exe().context("Cannot locate own executable for restart")?;
    let args: Vec<_> = std::env::args_os().skip(1).collect();
    debug!("Relaunch command: {} {:?}", exe.display(), args);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // exec only returns on failure
        let err = std::process::Command::new(&exe).args(&args).exec();
        Err(err).with_context(|| format!("Failed to relaunch in {} mode", mode))
    }

    #[cfg(not(unix))]
    {
        std::process::Command::new(&exe)
            .args(&args)
            .spawn()
            .with_context(|| format!("Failed to relaunch in {} mode", mode))?;
        Ok(())
    }
}

fn init_logging(level: &str, json: bool, logs_dir: &Path) -> Result<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (file_writer, guard) = file_writer(logs_dir);

    let console = if json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    Ok(guard)
}

/// Non-blocking writer for `patch-gw.log`. Buffered lines are written out when the
/// guard drops.
fn file_writer(logs_dir: &Path) -> (NonBlocking, WorkerGuard) {
    let file_appender = tracing_appender::rolling::never(logs_dir, "patch-gw.log");
    tracing_appender::non_blocking(file_appender)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_log_file_flushed_when_guard_drops() {
        let dir = tempfile::tempdir().unwrap();
        let (mut writer, guard) = file_writer(dir.path());

        writer.write_all(b"last line before exec\n").unwrap();
        drop(guard);

        let contents = std::fs::read_to_string(dir.path().join("patch-gw.log")).unwrap();
        assert_eq!(contents, "last line before exec\n");
    }
}
