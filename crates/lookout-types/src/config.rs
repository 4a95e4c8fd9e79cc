use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{LookoutError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default)]
    pub password: Option<String>,
    pub request_timeout_ms: u64,
}

/// When the poller refetches the detection map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionRefresh {
    /// Only when the image list changed; otherwise the cached map is reused.
    #[default]
    OnChange,
    /// On every successful image fetch.
    EveryTick,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerConfig {
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub detection_refresh: DetectionRefresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    pub enabled: bool,
    #[serde(default = "default_push_path")]
    pub path: String,
}

fn default_push_path() -> String {
    "/socket.io/".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsConfig {
    pub log_level: String,
    pub log_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookoutConfig {
    pub backend: BackendConfig,
    pub viewer: ViewerConfig,
    pub push: PushConfig,
    pub ops: OpsConfig,
}

impl LookoutConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            LookoutError::Configuration(format!(
                "unable to read config file {}: {err}",
                path_ref.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|err| {
            LookoutError::Configuration(format!(
                "failed to parse config file {}: {err}",
                path_ref.display()
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        let base = self.backend.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(LookoutError::Configuration(
                "backend.base_url must start with http:// or https://".into(),
            ));
        }
        if self.backend.request_timeout_ms == 0 {
            return Err(LookoutError::Configuration(
                "backend.request_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.viewer.poll_interval_secs == 0 {
            return Err(LookoutError::Configuration(
                "viewer.poll_interval_secs must be greater than zero".into(),
            ));
        }
        if !self.push.path.starts_with('/') {
            return Err(LookoutError::Configuration(
                "push.path must be an absolute path".into(),
            ));
        }
        if self.ops.log_level.trim().is_empty() {
            return Err(LookoutError::Configuration(
                "ops.log_level must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Apply `LOOKOUT_PASSWORD` on top of the file value.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(password) = std::env::var("LOOKOUT_PASSWORD") {
            if !password.is_empty() {
                self.backend.password = Some(password);
            }
        }
        self
    }
}
