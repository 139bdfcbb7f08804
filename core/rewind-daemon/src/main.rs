//! Rewind daemon entrypoint.
//!
//! This is a small, single-writer service that owns the capture pipeline: it
//! supervises the capture agent process, polls the artifact the agent writes
//! into SQLite, and evaluates alert rules against every new record.

use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use rewind_core::storage::{FsArtifactSource, RecordStore, RuleStore};
use rewind_core::supervisor::{CaptureSupervisor, SupervisorConfig, SystemProcessLauncher};
use rewind_core::sync::SyncEngine;
use rewind_core::AlertEngine;

mod db;

use db::Db;

const ARTIFACT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const RULE_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_shutdown_signal(_signal: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn main() {
    init_logging();
    install_signal_handlers();

    let db_path = match daemon_db_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon database path");
            std::process::exit(1);
        }
    };

    let db = match Db::new(db_path) {
        Ok(db) => Arc::new(db),
        Err(err) => {
            error!(error = %err, "Failed to initialize daemon database");
            std::process::exit(1);
        }
    };

    match db.stats() {
        Ok(stats) => info!(
            records = stats.total_records,
            methods = stats.methods.len(),
            "Rewind daemon started"
        ),
        Err(err) => warn!(error = %err, "Failed to read startup stats"),
    }

    let supervisor = match build_supervisor() {
        Ok(supervisor) => Arc::new(supervisor),
        Err(err) => {
            error!(error = %err, "Failed to configure capture supervisor");
            std::process::exit(1);
        }
    };

    let artifact_path = match artifact_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve capture artifact path");
            std::process::exit(1);
        }
    };

    let sync = Arc::new(SyncEngine::new(
        artifact_path,
        ARTIFACT_POLL_INTERVAL,
        Arc::new(FsArtifactSource),
        Arc::clone(&db) as Arc<dyn RecordStore>,
    ));
    let alerts = Arc::new(AlertEngine::new(
        Arc::clone(&db) as Arc<dyn RuleStore>,
        RULE_REFRESH_INTERVAL,
    ));

    // Every newly persisted record flows straight into rule evaluation.
    let alerts_for_records = Arc::clone(&alerts);
    let _record_subscription =
        sync.subscribe_records(move |record| alerts_for_records.check_record(record));

    let _notification_subscription = alerts.subscribe_notifications(|notification| {
        info!(
            rule = %notification.rule_name,
            severity = ?notification.severity,
            record = %notification.record_id,
            "Notification raised"
        );
    });

    let _agent_output_subscription = supervisor.on_output(|line| {
        debug!(line = %line, "capture-agent");
    });

    let startup_state = supervisor.start();
    info!(status = ?startup_state.status, "Capture supervisor initialized");

    let sync_for_loop = Arc::clone(&sync);
    let poll_thread = thread::spawn(move || sync_for_loop.run_poll_loop(&SHUTDOWN));
    let alerts_for_loop = Arc::clone(&alerts);
    let refresh_thread = thread::spawn(move || alerts_for_loop.run_refresh_loop(&SHUTDOWN));

    while !SHUTDOWN.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }

    info!("Shutdown signal received; stopping capture agent");
    let final_state = supervisor.stop();
    info!(status = ?final_state.status, "Capture supervisor stopped");

    if poll_thread.join().is_err() {
        warn!("Artifact poll thread panicked during shutdown");
    }
    if refresh_thread.join().is_err() {
        warn!("Rule refresh thread panicked during shutdown");
    }
    info!("Rewind daemon exited");
}

fn init_logging() {
    let debug_enabled = env::var("REWIND_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn install_signal_handlers() {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGTERM, handle_shutdown_signal as libc::sighandler_t);
        libc::signal(libc::SIGINT, handle_shutdown_signal as libc::sighandler_t);
    }
}

fn build_supervisor() -> Result<CaptureSupervisor, String> {
    let agent_path = path_from_env("REWIND_AGENT_PATH", &["bin", "capture-agent"])?;
    let agent_config = path_from_env("REWIND_AGENT_CONFIG", &["agent-config.json"])?;
    let config = SupervisorConfig::new(agent_path, agent_config);
    Ok(CaptureSupervisor::new(
        config,
        Arc::new(SystemProcessLauncher),
    ))
}

fn daemon_db_path() -> Result<PathBuf, String> {
    path_from_env("REWIND_DB_PATH", &["daemon", "state.db"])
}

fn artifact_path() -> Result<PathBuf, String> {
    path_from_env("REWIND_ARTIFACT_PATH", &["capture", "sessions.json"])
}

/// Environment override first, otherwise the given segments under `~/.rewind`.
fn path_from_env(var: &str, default_segments: &[&str]) -> Result<PathBuf, String> {
    if let Ok(value) = env::var(var) {
        if !value.is_empty() {
            return Ok(PathBuf::from(value));
        }
    }
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    let mut path = home.join(".rewind");
    for segment in default_segments {
        path = path.join(segment);
    }
    Ok(path)
}
