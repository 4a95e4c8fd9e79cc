//! Text frames of the socket.io (Engine.IO v4) websocket transport.
//!
//! Every frame starts with an Engine.IO packet digit. Message packets (`4`)
//! wrap a socket.io packet whose own leading digit selects connect (`0`),
//! disconnect (`1`), event (`2`) or connect error (`4`). Events carry an
//! optional namespace (`/admin,`), an optional ack id, then a JSON array
//! `["name", data]`.

use lookout_types::{LookoutError, Result};
use serde_json::Value;

/// Sent after the handshake to join the default namespace.
pub const CONNECT: &str = "40";
/// Reply to a server ping.
pub const PONG: &str = "3";
/// Leave the default namespace.
pub const DISCONNECT: &str = "41";

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Engine.IO handshake carrying session parameters.
    Open(Value),
    Close,
    Ping,
    Pong,
    Noop,
    Connect,
    Disconnect,
    ConnectError(String),
    Event { name: String, data: Value },
    /// Socket.io packets the panel has no use for (acks, binary events).
    Ignored(String),
}

pub fn decode(text: &str) -> Result<Frame> {
    let mut chars = text.chars();
    let Some(packet) = chars.next() else {
        return Err(frame_error("empty frame"));
    };
    let rest = chars.as_str();
    match packet {
        '0' => {
            let params = if rest.is_empty() {
                Value::Null
            } else {
                serde_json::from_str(rest)
                    .map_err(|err| frame_error(format!("bad handshake payload: {err}")))?
            };
            Ok(Frame::Open(params))
        }
        '1' => Ok(Frame::Close),
        '2' => Ok(Frame::Ping),
        '3' => Ok(Frame::Pong),
        '4' => decode_message(rest),
        '6' => Ok(Frame::Noop),
        other => Err(frame_error(format!("unknown packet type '{other}'"))),
    }
}

fn decode_message(text: &str) -> Result<Frame> {
    let mut chars = text.chars();
    let Some(packet) = chars.next() else {
        return Err(frame_error("empty message packet"));
    };
    let body = skip_namespace(chars.as_str());
    match packet {
        '0' => Ok(Frame::Connect),
        '1' => Ok(Frame::Disconnect),
        '2' => decode_event(body),
        '4' => Ok(Frame::ConnectError(connect_error_message(body))),
        _ => Ok(Frame::Ignored(text.to_string())),
    }
}

fn skip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        match body.find(',') {
            Some(idx) => &body[idx + 1..],
            None => "",
        }
    } else {
        body
    }
}

fn decode_event(body: &str) -> Result<Frame> {
    let payload = body.trim_start_matches(|c: char| c.is_ascii_digit());
    let value: Value = serde_json::from_str(payload)
        .map_err(|err| frame_error(format!("bad event payload: {err}")))?;
    let Value::Array(mut items) = value else {
        return Err(frame_error("event payload is not an array"));
    };
    if items.is_empty() {
        return Err(frame_error("event payload is empty"));
    }
    let name = match items.remove(0) {
        Value::String(name) => name,
        other => return Err(frame_error(format!("event name is not a string: {other}"))),
    };
    let data = if items.is_empty() {
        Value::Null
    } else {
        items.remove(0)
    };
    Ok(Frame::Event { name, data })
}

fn connect_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

fn frame_error(message: impl Into<String>) -> LookoutError {
    LookoutError::Push(message.into())
}
