//! CDP Protocol Types
//!
//! These are the fundamental types for CDP communication.
//! Keep them minimal - no per-domain bindings, methods are addressed by name.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request ID - monotonically increasing
pub type RequestId = u64;

/// Target ID from Chrome
pub type TargetId = String;

/// Session ID for attached targets
pub type SessionId = String;

/// CDP Request sent to browser
#[derive(Debug, Clone, Serialize)]
pub struct CDPRequest<'a> {
    pub id: RequestId,
    pub method: &'a str,
    pub params: Map<String, Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<&'a str>,
}

/// CDP Response from browser
#[derive(Debug, Clone, Deserialize)]
pub struct CDPResponse {
    pub id: RequestId,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RemoteError>,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<SessionId>,
}

/// Error object carried by a failed response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// CDP Event from browser (no request ID)
#[derive(Debug, Clone, Deserialize)]
pub struct CDPEvent {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<SessionId>,
}

/// Inbound frame after classification
///
/// `method` wins over `id`: anything carrying a method is an event.
#[derive(Debug)]
pub enum CDPMessage {
    Event(CDPEvent),
    Response(CDPResponse),
    /// Neither `method` nor `id`, or a shape that does not decode
    Unknown(Value),
}

impl CDPMessage {
    pub fn classify(message: Value) -> Self {
        let kind = match message.as_object() {
            Some(obj) if obj.contains_key("method") => Kind::Event,
            Some(obj) if obj.contains_key("id") => Kind::Response,
            _ => return Self::Unknown(message),
        };

        let decoded = match kind {
            Kind::Event => serde_json::from_value(message.clone()).map(Self::Event),
            Kind::Response => serde_json::from_value(message.clone()).map(Self::Response),
        };
        decoded.unwrap_or(Self::Unknown(message))
    }
}

enum Kind {
    Event,
    Response,
}

/// Validate call parameters: named pairs only
///
/// `null` means "no parameters". Arrays and scalars are positional and rejected.
pub fn named_params(params: Value) -> Option<Map<String, Value>> {
    match params {
        Value::Object(map) => Some(map),
        Value::Null => Some(Map::new()),
        _ => None,
    }
}

/// Target descriptor as served by the `/json` endpoints
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TargetDescriptor {
    pub id: TargetId,
    #[serde(rename = "type", default)]
    pub target_type: String,
    /// Absent when another client is already attached
    #[serde(rename = "webSocketDebuggerUrl", default)]
    pub web_socket_debugger_url: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "devtoolsFrontendUrl", default)]
    pub devtools_frontend_url: Option<String>,
}

impl TargetDescriptor {
    pub fn new(
        id: impl Into<TargetId>,
        target_type: impl Into<String>,
        web_socket_debugger_url: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            target_type: target_type.into(),
            web_socket_debugger_url,
            ..Default::default()
        }
    }
}

/// Response of `/json/version`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VersionInfo {
    #[serde(rename = "Browser", default)]
    pub browser: String,
    #[serde(rename = "Protocol-Version", default)]
    pub protocol_version: String,
    #[serde(rename = "User-Agent", default)]
    pub user_agent: String,
    #[serde(rename = "V8-Version", default)]
    pub v8_version: Option<String>,
    #[serde(rename = "WebKit-Version", default)]
    pub webkit_version: Option<String>,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    pub web_socket_debugger_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
