use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::ProtoError;

/// Outbound socket frame. Every frame the client sends carries the event
/// name, its payload, and the send time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub event: String,
    pub data: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// Inbound socket frame. The server emits both `{event, data}` and the
/// older `{type, payload}` spelling; the timestamp is optional and may be
/// either an ISO string or epoch millis, so it is kept opaque.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundEnvelope {
    #[serde(alias = "type")]
    pub event: String,
    #[serde(default, alias = "payload")]
    pub data: Value,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

impl InboundEnvelope {
    pub fn parse(raw: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(raw).map_err(ProtoError::Envelope)
    }
}
