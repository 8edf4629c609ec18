//! Initialization helpers for the application:
//! - database connection + migrations
//! - push delivery (VAPID validation + web-push client)
//! - background worker spawn helpers

use std::{path::Path, sync::Arc};

use anyhow::Result;

use crate::config::Config;
use crate::services::push::{PushSender, VapidConfig, WebPushSender};
use crate::services::reminders::{next_run_delay, ReminderService};

/// Redact potentially sensitive information from a database URL before logging.
///
/// Attempts to parse the URL and remove userinfo (username:password) components.
/// Falls back to removing everything before '@' or returning "(redacted)".
pub fn redact_db_url(db_url: &str) -> String {
    if let Ok(url) = url::Url::parse(db_url) {
        let scheme = url.scheme();
        let host = url.host_str().unwrap_or("");
        let port_part = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
        let path = url.path();
        format!("{}://{}{}{}", scheme, host, port_part, path)
    } else {
        if let Some(at_pos) = db_url.find('@') {
            let without_creds = &db_url[at_pos + 1..];
            return format!("(redacted){}", without_creds);
        }
        "(redacted)".to_string()
    }
}

/// Initialize SQLite database connection and run migrations.
///
/// Creates the parent directory for the database file (if applicable),
/// opens a connection pool using `create_if_missing(true)` and runs migrations.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Connecting to database: {}", redact_db_url(db_url));

    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
    let db_file_path = Path::new(db_path);

    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
        }
    }

    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Validate the VAPID settings once and build the push sender.
///
/// Push stays disabled (both values `None`) when it is not configured or the
/// configuration is invalid; the reminder endpoints then answer with a
/// configuration error instead of attempting deliveries.
pub fn init_push(config: &Config) -> (Option<VapidConfig>, Option<Arc<dyn PushSender>>) {
    let vapid = match VapidConfig::from_settings(&config.push) {
        Ok(Some(vapid)) => vapid,
        Ok(None) => {
            tracing::warn!("Push notifications disabled: VAPID keys not configured");
            return (None, None);
        }
        Err(e) => {
            tracing::error!("Push notifications disabled: {}", e);
            return (None, None);
        }
    };

    match WebPushSender::new(vapid.clone()) {
        Ok(sender) => {
            tracing::info!("Push notifications enabled (subject {})", vapid.subject);
            (Some(vapid), Some(Arc::new(sender)))
        }
        Err(e) => {
            tracing::error!("Push notifications disabled: failed to init web-push ({})", e);
            (None, None)
        }
    }
}

/// Spawn background workers:
/// - in-process reminder scheduler (only when `REMINDER_SCHEDULER_ENABLED`)
///
/// Returns the `JoinHandle`s so callers can await shutdown. Each worker listens
/// for a shutdown notification via a `tokio::sync::broadcast::Sender<()>`.
pub fn spawn_background_workers(
    state: Arc<crate::AppState>,
    shutdown: tokio::sync::broadcast::Sender<()>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    if state.config.reminders.scheduler_enabled {
        let mut shutdown_rx = shutdown.subscribe();
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            let reminders = &state.config.reminders;
            tracing::info!(
                "Reminder scheduler started for local hours {:?} (UTC{:+})",
                reminders.schedule_hours,
                reminders.utc_offset_hours
            );

            loop {
                let Some(delay) = next_run_delay(
                    chrono::Utc::now(),
                    reminders.utc_offset_hours,
                    &reminders.schedule_hours,
                ) else {
                    tracing::warn!("Reminder scheduler has no upcoming run, stopping");
                    break;
                };

                tracing::debug!("Next scheduled reminder run in {}s", delay.as_secs());
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Reminder scheduler shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }

                match ReminderService::new(&state)
                    .run_scheduled(chrono::Utc::now())
                    .await
                {
                    Ok(run) => tracing::info!(
                        "Scheduled reminders sent: notified={}, failed={}, expired={}",
                        run.users_notified,
                        run.result.failed,
                        run.result.expired.len()
                    ),
                    Err(e) => tracing::warn!("Scheduled reminder run failed: {:?}", e),
                }
            }
        }));
    }

    handles
}
