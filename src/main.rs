use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use timesheet_alerts::alerts::{AlertDetectionEngine, AlertService, SqliteAlertStore};
use timesheet_alerts::archive::{ArchiveService, SqliteArchiveStore};
use timesheet_alerts::background_jobs::jobs::{
    AlertDetectionJob, NotificationCleanupJob, ReportArchiveJob,
};
use timesheet_alerts::background_jobs::JobScheduler;
use timesheet_alerts::config;
use timesheet_alerts::job_runs::SqliteJobRunStore;
use timesheet_alerts::notifications::{
    LogNotificationSender, NotificationDispatcher, NotificationSender, SqliteNotificationStore,
    WebhookNotificationSender,
};
use timesheet_alerts::reports::SqliteReportStore;
use timesheet_alerts::sqlite_persistence::open_database;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory containing timesheet.db. Can also be specified in config file.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Webhook receiving newly raised alerts. Alerts are only logged when unset.
    #[clap(long)]
    pub webhook_url: Option<String>,

    /// Minutes between alert detection runs.
    #[clap(long, default_value_t = 60)]
    pub detection_interval_minutes: u64,

    /// Hours between report archive runs.
    #[clap(long, default_value_t = 24)]
    pub archive_interval_hours: u64,

    /// Reports whose week ended more than this many days ago are archived.
    #[clap(long, default_value_t = 365)]
    pub retention_days: u32,

    /// Run alert detection once as soon as the daemon starts.
    #[clap(long)]
    pub run_detection_on_startup: bool,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            webhook_url: args.webhook_url.clone(),
            detection_interval_minutes: args.detection_interval_minutes,
            archive_interval_hours: args.archive_interval_hours,
            retention_days: args.retention_days,
            run_detection_on_startup: args.run_detection_on_startup,
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
#[cfg(unix)]
async fn shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            Ok("SIGINT")
        }
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    Ok("Ctrl+C")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  alert_detection: {:?}", app_config.alert_detection);
    info!("  report_archive: {:?}", app_config.report_archive);
    info!(
        "  notification_cleanup: {:?}",
        app_config.notification_cleanup
    );
    info!(
        "  notifications: {}",
        app_config
            .notifications
            .webhook_url
            .as_deref()
            .unwrap_or("log only")
    );

    info!("Opening SQLite database at {:?}...", app_config.db_path());
    let conn = open_database(app_config.db_path())?;

    let report_store = Arc::new(SqliteReportStore::new(conn.clone()));
    let alert_store = Arc::new(SqliteAlertStore::new(conn.clone()));
    let notification_store = Arc::new(SqliteNotificationStore::new(conn.clone()));
    let archive_store = Arc::new(SqliteArchiveStore::new(conn.clone()));
    let job_run_store = Arc::new(SqliteJobRunStore::new(conn));

    let alert_service = Arc::new(AlertService::new(alert_store.clone(), alert_store.clone()));
    alert_service.ensure_default_settings()?;

    let sender: Arc<dyn NotificationSender> = match &app_config.notifications.webhook_url {
        Some(url) => Arc::new(WebhookNotificationSender::new(
            url.clone(),
            app_config.notifications.timeout,
        )?),
        None => Arc::new(LogNotificationSender),
    };

    let detection_job = AlertDetectionJob::new(
        AlertDetectionEngine::new(report_store, alert_store),
        alert_service,
        NotificationDispatcher::new(sender, notification_store.clone()),
        app_config.alert_detection.clone(),
    );
    let archive_job = ReportArchiveJob::new(
        ArchiveService::new(archive_store, app_config.report_archive.archive.clone()),
        app_config.report_archive.schedule.clone(),
    );
    let cleanup_job =
        NotificationCleanupJob::new(notification_store, app_config.notification_cleanup.clone());

    let mut scheduler = JobScheduler::new()
        .with_run_history(job_run_store)
        .with_shutdown_timeouts(app_config.shutdown_grace, app_config.shutdown_notice);
    scheduler.register_job(Arc::new(detection_job))?;
    scheduler.register_job(Arc::new(archive_job))?;
    scheduler.register_job(Arc::new(cleanup_job))?;
    scheduler.start()?;

    let signal = shutdown_signal().await?;
    info!("Received {}, initiating graceful shutdown", signal);

    let report = scheduler.stop().await;
    if report.completed {
        info!("Shutdown complete in {:?}", report.elapsed);
        Ok(())
    } else {
        warn!(
            "Exiting with {} job(s) still running after {:?}: {}",
            report.abandoned.len(),
            report.elapsed,
            report.abandoned.join(", ")
        );
        // Dropping the runtime would wait on the abandoned blocking tasks.
        std::process::exit(1);
    }
}
