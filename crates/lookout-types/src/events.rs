use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::instance::{Instance, InstanceStatus};

/// Host statistics broadcast by the backend every few seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    #[serde(default)]
    pub cpu: f64,
    /// MiB sent since the previous sample.
    #[serde(default)]
    pub network_sent: f64,
    /// MiB received since the previous sample.
    #[serde(default)]
    pub network_recv: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Connection,
    Stats,
    Instance,
    Unknown,
}

/// Envelope for everything received over the push channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub received_at: DateTime<Utc>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Connected,
    Stats(SystemStats),
    InstanceAdded(Box<Instance>),
    InstanceUpdated { name: String },
    InstanceDeleted { name: String },
    InstanceStatusChanged { name: String, status: InstanceStatus },
    Unknown { event: String, data: serde_json::Value },
}

#[derive(Deserialize)]
struct NamedEvent {
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct StatusEvent {
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: InstanceStatus,
}

impl EventPayload {
    /// Map a named socket event and its JSON body onto a payload.
    ///
    /// Bodies that do not match the expected shape are kept as `Unknown`
    /// rather than dropped.
    pub fn decode(event: &str, data: serde_json::Value) -> Self {
        let decoded = match event {
            "connected" => Some(EventPayload::Connected),
            "system_stats" => serde_json::from_value(data.clone())
                .ok()
                .map(EventPayload::Stats),
            "instance_added" => serde_json::from_value::<Instance>(data.clone())
                .ok()
                .map(|instance| EventPayload::InstanceAdded(Box::new(instance))),
            "instance_updated" => serde_json::from_value::<NamedEvent>(data.clone())
                .ok()
                .map(|e| EventPayload::InstanceUpdated { name: e.name }),
            "instance_deleted" => serde_json::from_value::<NamedEvent>(data.clone())
                .ok()
                .map(|e| EventPayload::InstanceDeleted { name: e.name }),
            "instance_status_changed" => serde_json::from_value::<StatusEvent>(data.clone())
                .ok()
                .map(|e| EventPayload::InstanceStatusChanged {
                    name: e.name,
                    status: e.status,
                }),
            _ => None,
        };
        decoded.unwrap_or_else(|| EventPayload::Unknown {
            event: event.to_string(),
            data,
        })
    }

    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Connected => EventKind::Connection,
            EventPayload::Stats(_) => EventKind::Stats,
            EventPayload::InstanceAdded(_)
            | EventPayload::InstanceUpdated { .. }
            | EventPayload::InstanceDeleted { .. }
            | EventPayload::InstanceStatusChanged { .. } => EventKind::Instance,
            EventPayload::Unknown { .. } => EventKind::Unknown,
        }
    }
}

impl PushEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: payload.kind(),
            received_at: Utc::now(),
            payload,
        }
    }

    /// Whether the instance list shown alongside should be reloaded.
    pub fn invalidates_instances(&self) -> bool {
        self.kind == EventKind::Instance
    }
}
