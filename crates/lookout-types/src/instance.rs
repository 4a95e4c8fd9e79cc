//! Capture instances managed by the backend.
//!
//! The backend stores instances as flat records where the presence of
//! `youtube_url` or `camera_url` decides the kind. Internally an instance
//! always carries exactly one [`InstanceSource`] variant; the conversion
//! happens at the serde boundary through [`WireInstance`].

use serde::{Deserialize, Serialize};

use crate::{LookoutError, Result};

pub const DEFAULT_FREQUENCY_SECS: u64 = 60;
pub const DEFAULT_FOLDER_PATH: &str = "./camera_images";
const LINK_TEXT_MAX: usize = 25;

#[derive(Debug, Clone, PartialEq)]
pub enum InstanceSource {
    Youtube {
        url: String,
    },
    Camera {
        url: String,
        username: String,
        password: String,
        folder_path: String,
    },
}

impl InstanceSource {
    pub fn url(&self) -> &str {
        match self {
            InstanceSource::Youtube { url } | InstanceSource::Camera { url, .. } => url,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            InstanceSource::Youtube { .. } => "youtube",
            InstanceSource::Camera { .. } => "camera",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            InstanceSource::Youtube { .. } => "YouTube",
            InstanceSource::Camera { .. } => "Camera",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Running,
    #[default]
    Stopped,
    #[serde(other)]
    Unknown,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Running => "running",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Unknown => "unknown",
        }
    }

    /// Capitalised label shown in the instance table.
    pub fn label(&self) -> &'static str {
        match self {
            InstanceStatus::Running => "Running",
            InstanceStatus::Stopped => "Stopped",
            InstanceStatus::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireInstance", into = "WireInstance")]
pub struct Instance {
    pub name: String,
    pub source: InstanceSource,
    pub frequency: u64,
    pub lookout_endpoint: String,
    pub latitude: f64,
    pub longitude: f64,
    pub status: InstanceStatus,
}

/// Flat record exchanged with the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireInstance {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookout_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<InstanceStatus>,
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

impl TryFrom<WireInstance> for Instance {
    type Error = LookoutError;

    fn try_from(wire: WireInstance) -> Result<Self> {
        let kind = match wire.instance_type.as_deref() {
            Some("youtube") => "youtube",
            Some("camera") => "camera",
            Some(other) if !other.is_empty() => {
                return Err(LookoutError::Decode(format!(
                    "instance '{}' has unknown type '{other}'",
                    wire.name
                )))
            }
            _ if non_empty(&wire.youtube_url) => "youtube",
            _ if non_empty(&wire.camera_url) => "camera",
            _ => {
                return Err(LookoutError::Decode(format!(
                    "instance '{}' has neither a youtube nor a camera url",
                    wire.name
                )))
            }
        };

        let source = if kind == "youtube" {
            InstanceSource::Youtube {
                url: wire.youtube_url.unwrap_or_default(),
            }
        } else {
            InstanceSource::Camera {
                url: wire.camera_url.unwrap_or_default(),
                username: wire.camera_username.unwrap_or_default(),
                password: wire.camera_password.unwrap_or_default(),
                folder_path: wire
                    .folder_path
                    .unwrap_or_else(|| DEFAULT_FOLDER_PATH.to_string()),
            }
        };

        Ok(Instance {
            name: wire.name,
            source,
            frequency: wire.frequency.unwrap_or(DEFAULT_FREQUENCY_SECS),
            lookout_endpoint: wire.lookout_endpoint.unwrap_or_default(),
            latitude: wire.latitude.unwrap_or(0.0),
            longitude: wire.longitude.unwrap_or(0.0),
            status: wire.status.unwrap_or_default(),
        })
    }
}

impl From<Instance> for WireInstance {
    fn from(instance: Instance) -> Self {
        let mut wire = WireInstance {
            name: instance.name,
            instance_type: Some(instance.source.kind_name().to_string()),
            frequency: Some(instance.frequency),
            lookout_endpoint: Some(instance.lookout_endpoint),
            latitude: Some(instance.latitude),
            longitude: Some(instance.longitude),
            status: Some(instance.status),
            ..WireInstance::default()
        };
        match instance.source {
            InstanceSource::Youtube { url } => wire.youtube_url = Some(url),
            InstanceSource::Camera {
                url,
                username,
                password,
                folder_path,
            } => {
                wire.camera_url = Some(url);
                wire.camera_username = Some(username);
                wire.camera_password = Some(password);
                wire.folder_path = Some(folder_path);
            }
        }
        wire
    }
}

impl Instance {
    /// Field rules enforced before an instance is sent to the backend.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(validation_error("name is required"));
        }
        match &self.source {
            InstanceSource::Youtube { url } => {
                if url.trim().is_empty() {
                    return Err(validation_error("youtube url is required"));
                }
            }
            InstanceSource::Camera {
                url,
                username,
                password,
                folder_path,
            } => {
                if url.trim().is_empty() {
                    return Err(validation_error("camera url is required"));
                }
                if username.is_empty() || password.is_empty() {
                    return Err(validation_error("camera credentials are required"));
                }
                if folder_path.trim().is_empty() {
                    return Err(validation_error("folder path is required"));
                }
            }
        }
        if self.frequency < 1 {
            return Err(validation_error("frequency must be at least 1 second"));
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(validation_error("latitude must be between -90 and 90"));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(validation_error("longitude must be between -180 and 180"));
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.status == InstanceStatus::Running
    }

    /// Instances at (0, 0) or with either coordinate unset are not placed on the map.
    pub fn has_location(&self) -> bool {
        self.latitude != 0.0 && self.longitude != 0.0
    }

    /// Link text for the instance table.
    pub fn link_text(&self) -> String {
        truncate_url(self.source.url(), LINK_TEXT_MAX)
    }
}

fn validation_error(message: &str) -> LookoutError {
    LookoutError::Validation(message.to_string())
}

pub fn truncate_url(url: &str, max_len: usize) -> String {
    if url.is_empty() {
        return "Unknown".to_string();
    }
    if url.chars().count() <= max_len {
        return url.to_string();
    }
    let head: String = url.chars().take(max_len).collect();
    format!("{head}...")
}

/// Video id from a `watch?v=` or `youtu.be/` link, at most 11 characters.
pub fn youtube_video_id(url: &str) -> Option<String> {
    let rest = ["youtube.com/watch?v=", "youtu.be/"]
        .iter()
        .find_map(|marker| url.find(marker).map(|idx| &url[idx + marker.len()..]))?;
    let id: String = rest
        .chars()
        .take_while(|c| !matches!(c, '&' | '\n' | '?' | '#'))
        .take(11)
        .collect();
    (!id.is_empty()).then_some(id)
}

/// Lifecycle actions accepted by `POST /api/instances/{name}/{action}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceAction {
    Start,
    Stop,
}

impl InstanceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceAction::Start => "start",
            InstanceAction::Stop => "stop",
        }
    }

    pub fn past_tense(&self) -> &'static str {
        match self {
            InstanceAction::Start => "started",
            InstanceAction::Stop => "stopped",
        }
    }

    pub fn gerund(&self) -> &'static str {
        match self {
            InstanceAction::Start => "starting",
            InstanceAction::Stop => "stopping",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn camera() -> Instance {
        Instance {
            name: "big tree".into(),
            source: InstanceSource::Camera {
                url: "rtsp://10.0.0.4/stream".into(),
                username: "admin".into(),
                password: "secret".into(),
                folder_path: DEFAULT_FOLDER_PATH.into(),
            },
            frequency: 60,
            lookout_endpoint: "http://lookout.local/detect".into(),
            latitude: 38.5,
            longitude: -121.4,
            status: InstanceStatus::Stopped,
        }
    }

    #[test]
    fn decodes_backend_record_with_both_url_fields() {
        let record = json!({
            "name": "Spray Valley",
            "instance_type": "youtube",
            "youtube_url": "https://www.youtube.com/watch?v=abcdefghijk",
            "camera_url": "",
            "camera_username": "",
            "camera_password": "",
            "folder_path": "./images",
            "frequency": 30,
            "lookout_endpoint": "http://lookout.local",
            "latitude": 51.1,
            "longitude": -115.5,
            "status": "running"
        });
        let instance: Instance = serde_json::from_value(record).expect("decode instance");
        assert_eq!(
            instance.source,
            InstanceSource::Youtube {
                url: "https://www.youtube.com/watch?v=abcdefghijk".into()
            }
        );
        assert!(instance.is_running());
        assert_eq!(instance.frequency, 30);
    }

    #[test]
    fn infers_kind_from_url_presence_when_type_missing() {
        let record = json!({ "name": "gate", "camera_url": "rtsp://gate", "status": "paused" });
        let instance: Instance = serde_json::from_value(record).expect("decode instance");
        assert_eq!(instance.source.label(), "Camera");
        assert_eq!(instance.status, InstanceStatus::Unknown);
        assert_eq!(instance.frequency, DEFAULT_FREQUENCY_SECS);

        let missing = json!({ "name": "ghost" });
        assert!(serde_json::from_value::<Instance>(missing).is_err());
        let unknown = json!({ "name": "x", "instance_type": "drone" });
        assert!(serde_json::from_value::<Instance>(unknown).is_err());
    }

    #[test]
    fn encodes_only_variant_fields() {
        let value = serde_json::to_value(camera()).expect("encode");
        assert_eq!(value["instance_type"], "camera");
        assert_eq!(value["camera_username"], "admin");
        assert!(value.get("youtube_url").is_none());

        let youtube = Instance {
            source: InstanceSource::Youtube {
                url: "https://youtu.be/xyz".into(),
            },
            ..camera()
        };
        let value = serde_json::to_value(youtube).expect("encode");
        assert!(value.get("camera_url").is_none());
        assert_eq!(value["youtube_url"], "https://youtu.be/xyz");
    }

    #[test]
    fn validation_mirrors_form_rules() {
        let mut instance = camera();
        assert!(instance.validate().is_ok());
        instance.frequency = 0;
        assert!(instance.validate().is_err());
        instance.frequency = 1;
        instance.latitude = 91.0;
        assert!(instance.validate().is_err());
        instance.latitude = -90.0;
        instance.longitude = 180.5;
        assert!(instance.validate().is_err());
        instance.longitude = 180.0;
        assert!(instance.validate().is_ok());
        instance.source = InstanceSource::Camera {
            url: "rtsp://cam".into(),
            username: String::new(),
            password: "pw".into(),
            folder_path: "./x".into(),
        };
        assert!(instance.validate().is_err());
        instance.name = " ".into();
        assert!(matches!(
            instance.validate(),
            Err(LookoutError::Validation(_))
        ));
    }

    #[test]
    fn table_helpers() {
        assert_eq!(truncate_url("", 25), "Unknown");
        assert_eq!(truncate_url("https://a.b", 25), "https://a.b");
        assert_eq!(
            truncate_url("https://www.youtube.com/watch?v=abcdefghijk", 25),
            "https://www.youtube.com/w..."
        );
        assert_eq!(InstanceStatus::default().label(), "Stopped");
        let mut instance = camera();
        assert!(instance.has_location());
        instance.longitude = 0.0;
        assert!(!instance.has_location());
    }

    #[test]
    fn extracts_youtube_ids() {
        assert_eq!(
            youtube_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=10"),
            Some("dQw4w9WgXcQ".into())
        );
        assert_eq!(
            youtube_video_id("https://youtu.be/abcdefghijklmnop"),
            Some("abcdefghijk".into())
        );
        assert_eq!(youtube_video_id("rtsp://camera.local/stream"), None);
    }
}
