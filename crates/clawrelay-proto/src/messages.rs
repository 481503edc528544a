//! Protocol message types
//!
//! Frames are JSON text messages. Requests flow relay → agent, responses flow
//! agent → relay, and heartbeats flow in both directions. Incoming frames are
//! validated structurally instead of being trusted to deserialize cleanly, so
//! a misbehaving agent can never push a half-formed reply into the relay.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Header name → value pairs carried inside a frame
pub type HeaderFields = BTreeMap<String, String>;

/// HTTP-shaped request forwarded from the relay to an agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TunnelRequest {
    pub id: String,
    pub method: String,
    pub path: String,
    pub headers: HeaderFields,
    pub body: String,
}

/// Agent's reply to a [`TunnelRequest`], correlated by `id`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TunnelResponse {
    pub id: String,
    pub status: u16,
    pub headers: HeaderFields,
    pub body: String,
}

impl TunnelResponse {
    /// Build a reply with an empty header set
    pub fn new(id: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status,
            headers: HeaderFields::new(),
            body: body.into(),
        }
    }
}

/// Keep-alive frames: `{"type":"ping"}` / `{"type":"pong"}`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Heartbeat {
    Ping,
    Pong,
}

/// Frames the relay accepts from an agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentFrame {
    Heartbeat(Heartbeat),
    Response(TunnelResponse),
}

/// Frames an agent accepts from the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    Heartbeat(Heartbeat),
    Request(TunnelRequest),
}

/// Reasons a frame was rejected
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Frame is not a JSON object")]
    NotAnObject,

    #[error("Unknown frame type: {0}")]
    UnknownType(String),

    #[error("Frame id must be a non-empty string")]
    MissingId,

    #[error("Frame status must be a number between 100 and 999")]
    InvalidStatus,

    #[error("Frame method must be a non-empty string")]
    InvalidMethod,

    #[error("Frame path must be a string starting with '/'")]
    InvalidPath,

    #[error("Frame headers must be an object of string values")]
    InvalidHeaders,

    #[error("Frame body must be a string")]
    InvalidBody,
}

impl AgentFrame {
    /// Decode and validate a text frame received from an agent
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let object = parse_object(text)?;

        if let Some(heartbeat) = heartbeat(&object)? {
            return Ok(AgentFrame::Heartbeat(heartbeat));
        }

        Ok(AgentFrame::Response(TunnelResponse {
            id: required_id(&object)?,
            status: status_code(&object)?,
            headers: header_fields(&object)?,
            body: string_body(&object)?,
        }))
    }
}

impl RelayFrame {
    /// Decode and validate a text frame received from the relay
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let object = parse_object(text)?;

        if let Some(heartbeat) = heartbeat(&object)? {
            return Ok(RelayFrame::Heartbeat(heartbeat));
        }

        let method = object
            .get("method")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .ok_or(FrameError::InvalidMethod)?;
        let path = object
            .get("path")
            .and_then(Value::as_str)
            .filter(|p| p.starts_with('/'))
            .ok_or(FrameError::InvalidPath)?;

        Ok(RelayFrame::Request(TunnelRequest {
            id: required_id(&object)?,
            method: method.to_string(),
            path: path.to_string(),
            headers: header_fields(&object)?,
            body: string_body(&object)?,
        }))
    }
}

/// Serialize any frame payload to its JSON text form
pub fn encode<T: Serialize>(frame: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

fn parse_object(text: &str) -> Result<Map<String, Value>, FrameError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;
    match value {
        Value::Object(object) => Ok(object),
        _ => Err(FrameError::NotAnObject),
    }
}

fn heartbeat(object: &Map<String, Value>) -> Result<Option<Heartbeat>, FrameError> {
    match object.get("type") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(kind)) if kind == "ping" => Ok(Some(Heartbeat::Ping)),
        Some(Value::String(kind)) if kind == "pong" => Ok(Some(Heartbeat::Pong)),
        Some(other) => Err(FrameError::UnknownType(match other {
            Value::String(kind) => kind.clone(),
            value => value.to_string(),
        })),
    }
}

fn required_id(object: &Map<String, Value>) -> Result<String, FrameError> {
    object
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or(FrameError::MissingId)
}

fn status_code(object: &Map<String, Value>) -> Result<u16, FrameError> {
    object
        .get("status")
        .and_then(Value::as_u64)
        .filter(|status| (100..=999).contains(status))
        .map(|status| status as u16)
        .ok_or(FrameError::InvalidStatus)
}

fn header_fields(object: &Map<String, Value>) -> Result<HeaderFields, FrameError> {
    match object.get("headers") {
        Some(Value::Object(headers)) => headers
            .iter()
            .map(|(name, value)| match value {
                Value::String(value) => Ok((name.clone(), value.clone())),
                _ => Err(FrameError::InvalidHeaders),
            })
            .collect(),
        _ => Err(FrameError::InvalidHeaders),
    }
}

fn string_body(object: &Map<String, Value>) -> Result<String, FrameError> {
    match object.get("body") {
        Some(Value::String(body)) => Ok(body.clone()),
        _ => Err(FrameError::InvalidBody),
    }
}
