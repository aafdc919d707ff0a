use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The event names the relay knows how to send and the receiver knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TestConnection,
    CropUpdate,
    WeatherAlert,
    SensorData,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TestConnection => "test_connection",
            EventKind::CropUpdate => "crop_update",
            EventKind::WeatherAlert => "weather_alert",
            EventKind::SensorData => "sensor_data",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "test_connection" => Some(EventKind::TestConnection),
            "crop_update" => Some(EventKind::CropUpdate),
            "weather_alert" => Some(EventKind::WeatherAlert),
            "sensor_data" => Some(EventKind::SensorData),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire wrapper for every webhook send: `{event, data, timestamp}`.
///
/// `event` stays a plain string so the receiver can echo names it does not know.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl WebhookEnvelope {
    /// Build an envelope stamped with the current time.
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self {
            event: kind.as_str().to_string(),
            data,
            timestamp: Some(Utc::now().to_rfc3339()),
        }
    }

    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_name(&self.event)
    }
}

/// A persisted `webhook_events` row. Never mutated here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

// Row ids may be uuids or integers depending on the table definition.
fn opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

/// Result of a typed relay send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SendOutcome {
    pub fn delivered(status: u16) -> Self {
        Self {
            delivered: true,
            status: Some(status),
            reason: None,
        }
    }

    pub fn failed(status: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            delivered: false,
            status,
            reason: Some(reason.into()),
        }
    }
}

/// Outcome of a connectivity self-test, shaped for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
