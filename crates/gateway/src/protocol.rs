//! Gateway wire protocol: frame types, error codes, method registry,
//! and per-method parameter validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version spoken by this server.
pub const PROTOCOL_VERSION: u32 = 1;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One JSON text frame, either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Req {
        id: String,
        #[serde(rename = "traceId", skip_serializing_if = "Option::is_none")]
        trace_id: Option<String>,
        method: String,
        #[serde(default)]
        params: Value,
    },
    Res {
        id: String,
        #[serde(rename = "traceId", skip_serializing_if = "Option::is_none")]
        trace_id: Option<String>,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },
    Event {
        event: String,
        payload: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
}

impl Frame {
    pub fn ok(id: &str, trace_id: Option<String>, payload: Value) -> Self {
        Frame::Res {
            id: id.to_owned(),
            trace_id,
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(id: &str, trace_id: Option<String>, code: ErrorCode, message: &str) -> Self {
        Frame::Res {
            id: id.to_owned(),
            trace_id,
            ok: false,
            payload: None,
            error: Some(ErrorBody {
                code,
                message: message.to_owned(),
                retryable: None,
                details: None,
            }),
        }
    }

    pub fn event(event: &str, payload: Value) -> Self {
        Frame::Event {
            event: event.to_owned(),
            payload,
            seq: None,
        }
    }
}

/// Structured error carried on a failed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    Unauthorized,
    MethodNotFound,
    InternalError,
    Timeout,
    BadState,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handshake payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// Params of the `connect` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub protocol: u32,
    pub client: ClientInfo,
    pub auth: ConnectAuth,
    pub challenge_nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectAuth {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Features {
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub max_payload_bytes: usize,
    pub tick_interval_ms: u64,
}

/// Payload of a successful `connect` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloOk {
    pub protocol: u32,
    pub server: ServerInfo,
    pub features: Features,
    pub policy: Policy,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Method registry & param validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Every method the server dispatches.
pub const METHODS: [&str; 12] = [
    "connect",
    "health",
    "status.deep",
    "sessions.open",
    "sessions.subscribe",
    "sessions.unsubscribe",
    "sessions.send",
    "sessions.abort",
    "sessions.close",
    "heartbeat.reload",
    "gateway.rotate-token",
    "gateway.stop",
];

/// Every event the server may emit.
pub const EVENTS: [&str; 8] = [
    "connect.challenge",
    "tick",
    "session.turn.start",
    "session.turn.chunk",
    "session.turn.error",
    "session.turn.end",
    "heartbeat.fired",
    "shutdown",
];

pub fn is_known_method(method: &str) -> bool {
    METHODS.contains(&method)
}

/// Validate `params` against the method's expected shape.
pub fn validate_params_for_method(method: &str, params: &Value) -> Result<(), String> {
    match method {
        "connect" => {
            serde_json::from_value::<ConnectParams>(params.clone())
                .map(|_| ())
                .map_err(|e| format!("connect params: {e}"))
        }
        "sessions.open" | "sessions.subscribe" | "sessions.unsubscribe" | "sessions.abort"
        | "sessions.close" => require_string_field(params, "sessionId"),
        "sessions.send" => {
            require_string_field(params, "sessionId")?;
            require_string_field(params, "text")
        }
        "health" | "status.deep" | "heartbeat.reload" | "gateway.rotate-token"
        | "gateway.stop" => match params {
            Value::Null | Value::Object(_) => Ok(()),
            _ => Err("params must be an object".to_owned()),
        },
        _ => Err(format!("unknown method: {method}")),
    }
}

fn require_string_field(params: &Value, field: &str) -> Result<(), String> {
    match params.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(()),
        Some(_) => Err(format!("{field} must be a non-empty string")),
        None => Err(format!("missing required field: {field}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frames_roundtrip() {
        let frame = Frame::Req {
            id: "r1".into(),
            trace_id: Some("t1".into()),
            method: "health".into(),
            params: json!({}),
        };
        let raw = serde_json::to_string(&frame).unwrap();
        assert!(raw.contains("\"type\":\"req\""));
        assert!(raw.contains("\"traceId\":\"t1\""));
        let back: Frame = serde_json::from_str(&raw).unwrap();
        assert!(matches!(back, Frame::Req { .. }));
    }

    #[test]
    fn error_codes_serialize_snake_case() {
        let frame = Frame::err("r1", None, ErrorCode::MethodNotFound, "nope");
        let raw = serde_json::to_string(&frame).unwrap();
        assert!(raw.contains("\"code\":\"method_not_found\""));
    }

    #[test]
    fn session_methods_require_session_id() {
        assert!(validate_params_for_method("sessions.open", &json!({})).is_err());
        assert!(
            validate_params_for_method("sessions.open", &json!({"sessionId": "s1"})).is_ok()
        );
        assert!(validate_params_for_method(
            "sessions.send",
            &json!({"sessionId": "s1", "text": "hi"})
        )
        .is_ok());
        assert!(
            validate_params_for_method("sessions.send", &json!({"sessionId": "s1"})).is_err()
        );
    }

    #[test]
    fn connect_params_validate_shape() {
        let good = json!({
            "protocol": 1,
            "client": {"id": "t", "version": "0.1"},
            "auth": {"token": "secret"},
            "challengeNonce": "n1",
        });
        assert!(validate_params_for_method("connect", &good).is_ok());
        assert!(validate_params_for_method("connect", &json!({"protocol": 1})).is_err());
    }
}
