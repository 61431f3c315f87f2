//! JSON message classification.
//!
//! The hub speaks single-line JSON objects discriminated by key presence.
//! Classification checks the shapes in a fixed order: request (`i`,`m`,`p`),
//! response (`i`,`r`), error (`i`,`e`), notification (`m`,`p` without `i`).
//! Anything else, including non-object JSON, is `Unknown`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;

/// Method name the hub uses for user program console output. It arrives in
/// request shape (`i`,`m`,`p`) and is told apart by this method string.
pub const USER_PROGRAM_PRINT: &str = "userProgram.print";

/// The message shapes the classifier recognises.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// RPC call from the hub.
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    /// Reply to a prior outbound request.
    Response { id: Value, result: Value },
    /// Failure reply; `payload` is base64 of a UTF-8 JSON error body.
    Error { id: Value, payload: String },
    /// Asynchronous event; `method` is a numeric opcode or string tag.
    Notification { method: Value, params: Value },
    /// None of the above.
    Unknown(Value),
}

/// Classify a parsed JSON value into one of the recognised shapes.
pub fn classify(message: Value) -> HubMessage {
    let mut map = match message {
        Value::Object(map) => map,
        other => return HubMessage::Unknown(other),
    };

    if map.contains_key("i") && map.contains_key("m") && map.contains_key("p") {
        let method = match map.remove("m") {
            Some(Value::String(m)) => m,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        return HubMessage::Request {
            id: map.remove("i").unwrap_or(Value::Null),
            method,
            params: map.remove("p").unwrap_or(Value::Null),
        };
    }
    if map.contains_key("i") && map.contains_key("r") {
        return HubMessage::Response {
            id: map.remove("i").unwrap_or(Value::Null),
            result: map.remove("r").unwrap_or(Value::Null),
        };
    }
    if map.contains_key("i") && map.contains_key("e") {
        let payload = match map.remove("e") {
            Some(Value::String(e)) => e,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        return HubMessage::Error {
            id: map.remove("i").unwrap_or(Value::Null),
            payload,
        };
    }
    if map.contains_key("m") && map.contains_key("p") {
        return HubMessage::Notification {
            method: map.remove("m").unwrap_or(Value::Null),
            params: map.remove("p").unwrap_or(Value::Null),
        };
    }

    HubMessage::Unknown(Value::Object(map))
}

/// Decode a base64 payload into text, replacing invalid UTF-8.
pub fn decode_base64_text(value: &str) -> Result<String, base64::DecodeError> {
    let bytes = BASE64.decode(value)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
