//! Operational helpers: logging setup and transient user notifications.

use std::{
    fs::{self, File, OpenOptions},
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{DateTime, Duration, Utc};
use lookout_types::{config::OpsConfig, LookoutError, Result};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

const LOG_FILE: &str = "lookout.log";

/// How long a notification stays visible.
pub const NOTIFICATION_TTL_MS: i64 = 3_000;

fn env_filter(config: &OpsConfig) -> Result<EnvFilter> {
    EnvFilter::try_new(config.log_level.clone())
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|err| ops_error(format!("failed to create log filter: {err}")))
}

/// Log to stderr. Used by the one-shot commands.
pub fn init_tracing(config: &OpsConfig) -> Result<()> {
    fmt()
        .with_env_filter(env_filter(config)?)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| ops_error(format!("tracing init error: {err}")))?;
    Ok(())
}

/// Log to a file under `ops.log_dir` so the dashboard screen stays clean.
pub fn init_file_tracing(config: &OpsConfig) -> Result<PathBuf> {
    let dir = ensure_log_dir(&config.log_dir)?;
    let path = dir.join(LOG_FILE);
    let file: File = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|err| ops_error(format!("failed to open log file {}: {err}", path.display())))?;
    fmt()
        .with_env_filter(env_filter(config)?)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|err| ops_error(format!("tracing init error: {err}")))?;
    Ok(path)
}

pub fn ensure_log_dir(path: &str) -> Result<PathBuf> {
    let dir = PathBuf::from(path);
    fs::create_dir_all(&dir)
        .map_err(|err| ops_error(format!("failed to create log dir: {err}")))?;
    info!("Log directory ready at {:?}", dir);
    Ok(dir)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub message: String,
    pub kind: NotificationKind,
    pub created_at: DateTime<Utc>,
}

/// Short-lived messages shown after instance actions.
#[derive(Clone)]
pub struct NotificationCenter {
    entries: Arc<Mutex<Vec<Notification>>>,
    ttl: Duration,
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new(Duration::milliseconds(NOTIFICATION_TTL_MS))
    }
}

impl NotificationCenter {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            ttl,
        }
    }

    pub fn push(&self, message: impl Into<String>, kind: NotificationKind) -> Uuid {
        self.push_at(message, kind, Utc::now())
    }

    pub fn push_at(
        &self,
        message: impl Into<String>,
        kind: NotificationKind,
        created_at: DateTime<Utc>,
    ) -> Uuid {
        let notification = Notification {
            id: Uuid::new_v4(),
            message: message.into(),
            kind,
            created_at,
        };
        let id = notification.id;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
        id
    }

    /// Drop expired entries and return the rest, oldest first.
    pub fn active_at(&self, now: DateTime<Utc>) -> Vec<Notification> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|n| now - n.created_at < self.ttl);
        entries.clone()
    }

    pub fn active(&self) -> Vec<Notification> {
        self.active_at(Utc::now())
    }
}

pub fn ops_error(message: impl Into<String>) -> LookoutError {
    LookoutError::Ops(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifications_expire_after_ttl() {
        let center = NotificationCenter::default();
        let start = Utc::now();
        center.push_at("Instance started successfully", NotificationKind::Success, start);
        center.push_at(
            "Error deleting instance",
            NotificationKind::Error,
            start + Duration::milliseconds(2_000),
        );

        let visible = center.active_at(start + Duration::milliseconds(2_500));
        assert_eq!(visible.len(), 2);
        assert_eq!(visible[0].kind, NotificationKind::Success);

        let visible = center.active_at(start + Duration::milliseconds(3_000));
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].message, "Error deleting instance");

        assert!(center
            .active_at(start + Duration::milliseconds(5_001))
            .is_empty());
    }

    #[test]
    fn log_dir_is_created() {
        let dir = std::env::temp_dir().join(format!("lookout-logs-{}", Uuid::new_v4()));
        let created = ensure_log_dir(dir.to_str().expect("utf8 path")).expect("create");
        assert!(created.is_dir());
        fs::remove_dir_all(&created).expect("cleanup");
    }
}
