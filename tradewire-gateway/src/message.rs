//! WebSocket message types.
//!
//! This module defines the wire envelope for both directions:
//! - Inbound: `{ "type": string, "token"?: string, ...payload }`
//! - Outbound: `{ "type": string, "payload": any }`
//!
//! Only `authenticate` is interpreted by the gateway; every other inbound
//! type is handed to the application handler untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

use crate::auth::SubjectId;
use crate::connection::ConnectionId;
use crate::error::GatewayError;

/// Inbound type tag of the authentication request.
pub const AUTHENTICATE: &str = "authenticate";

/// Server-to-client event. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    #[serde(rename = "type")]
    event_type: String,
    payload: Value,
}

impl OutboundEvent {
    /// Sent once when a connection opens.
    pub const WELCOME: &'static str = "welcome";
    /// Sent after successful in-band authentication.
    pub const AUTH_SUCCESS: &'static str = "auth_success";
    /// Sent after failed in-band authentication.
    pub const AUTH_ERROR: &'static str = "auth_error";
    /// Snapshot sent right after `auth_success`.
    pub const INITIAL_STATE: &'static str = "initial_state";
    /// Reply of the default application handler.
    pub const ECHO: &'static str = "echo";
    /// Acknowledgment of a message nobody handled.
    pub const UNHANDLED: &'static str = "unhandled";

    /// Creates an event with an arbitrary type tag.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    /// Creates a `welcome` event.
    pub fn welcome(message: impl Into<String>) -> Self {
        Self::new(Self::WELCOME, Value::String(message.into()))
    }

    /// Creates an `auth_success` event.
    #[must_use]
    pub fn auth_success(subject: &SubjectId) -> Self {
        Self::new(Self::AUTH_SUCCESS, json!({ "userId": subject }))
    }

    /// Creates an `auth_error` event.
    pub fn auth_error(message: impl Into<String>) -> Self {
        Self::new(Self::AUTH_ERROR, json!({ "message": message.into() }))
    }

    /// Creates an `initial_state` event.
    #[must_use]
    pub fn initial_state(snapshot: Value) -> Self {
        Self::new(Self::INITIAL_STATE, snapshot)
    }

    /// Creates an `echo` event.
    #[must_use]
    pub fn echo(message: Value) -> Self {
        Self::new(Self::ECHO, message)
    }

    /// Creates an `unhandled` event.
    #[must_use]
    pub fn unhandled(message: Value) -> Self {
        Self::new(Self::UNHANDLED, message)
    }

    /// Returns the type tag.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Returns the payload.
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Serializes the event into a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Delivery target of an outbound event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// One connection, authenticated or not
    Connection(ConnectionId),
    /// Every authenticated connection of one subject
    Subject(SubjectId),
    /// Every authenticated connection
    All,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(id) => write!(f, "connection:{id}"),
            Self::Subject(subject) => write!(f, "subject:{subject}"),
            Self::All => f.write_str("all"),
        }
    }
}

/// Application message, passed through opaquely.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationMessage {
    /// Type tag
    pub kind: String,
    /// The whole inbound object, type tag included
    pub body: Value,
}

/// Parsed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Authentication request
    Authenticate {
        /// Credential, if one was supplied
        token: Option<String>,
    },
    /// Anything else
    Application(ApplicationMessage),
}

impl InboundMessage {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::MalformedFrame`] if the frame is not a JSON
    /// object with a string `type` field.
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        let body: Value = serde_json::from_str(text)
            .map_err(|e| GatewayError::MalformedFrame(format!("invalid JSON: {e}")))?;

        let kind = body
            .as_object()
            .ok_or_else(|| GatewayError::MalformedFrame("expected a JSON object".to_string()))?
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::MalformedFrame("missing string `type` field".to_string()))?
            .to_string();

        if kind == AUTHENTICATE {
            let token = body
                .get("token")
                .and_then(Value::as_str)
                .filter(|token| !token.is_empty())
                .map(str::to_string);
            return Ok(Self::Authenticate { token });
        }

        Ok(Self::Application(ApplicationMessage { kind, body }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_authenticate() {
        let msg = InboundMessage::parse(r#"{"type":"authenticate","token":"abc"}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::Authenticate {
                token: Some("abc".to_string())
            }
        );
    }

    #[test]
    fn test_parse_authenticate_without_token() {
        let msg = InboundMessage::parse(r#"{"type":"authenticate"}"#).unwrap();
        assert_eq!(msg, InboundMessage::Authenticate { token: None });

        let msg = InboundMessage::parse(r#"{"type":"authenticate","token":""}"#).unwrap();
        assert_eq!(msg, InboundMessage::Authenticate { token: None });
    }

    #[test]
    fn test_parse_application_message_keeps_body() {
        let msg = InboundMessage::parse(r#"{"type":"subscribe","symbols":["BTC-USDT"]}"#).unwrap();
        let InboundMessage::Application(app) = msg else {
            panic!("Wrong message type");
        };
        assert_eq!(app.kind, "subscribe");
        assert_eq!(app.body["symbols"][0], "BTC-USDT");
        assert_eq!(app.body["type"], "subscribe");
    }

    #[test]
    fn test_parse_malformed_frames() {
        for frame in ["not json", "42", r#"["type"]"#, r#"{"kind":"x"}"#, r#"{"type":7}"#] {
            let err = InboundMessage::parse(frame).unwrap_err();
            assert!(matches!(err, GatewayError::MalformedFrame(_)), "{frame}");
        }
    }

    #[test]
    fn test_outbound_envelope_shape() {
        let event = OutboundEvent::auth_success(&SubjectId::from("42"));
        let json: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json, json!({ "type": "auth_success", "payload": { "userId": "42" } }));

        let event = OutboundEvent::auth_error("Invalid authentication token");
        assert_eq!(event.event_type(), OutboundEvent::AUTH_ERROR);
        assert_eq!(event.payload()["message"], "Invalid authentication token");
    }

    #[test]
    fn test_welcome_payload_is_a_string() {
        let event = OutboundEvent::welcome("hello");
        let json: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json, json!({ "type": "welcome", "payload": "hello" }));
    }

    #[test]
    fn test_target_display() {
        assert_eq!(Target::All.to_string(), "all");
        assert_eq!(
            Target::Subject(SubjectId::from("u1")).to_string(),
            "subject:u1"
        );
    }
}
