//! Frame envelope types and (de)serialization.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use skyhook_common::{epoch_ms, ClientId, MsgId};

/// Protocol version reported in REGISTER payloads.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Coarse frame classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameType {
    Control,
    Message,
    Ack,
    Error,
}

/// Frame operation.
///
/// Unknown operations must be logged and ignored by both sides, so `Op`
/// deserialization failures are surfaced as [`DecodeError::UnknownOp`]
/// rather than closing the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Op {
    Register,
    RegisterAck,
    RouteSync,
    Request,
    Response,
    Ack,
    Ping,
    Pong,
    Error,
}

/// One JSON envelope on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    pub op: Op,
    pub client_id: ClientId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<MsgId>,
    /// Producer clock, epoch milliseconds
    pub ts: i64,
    #[serde(default)]
    pub payload: Value,
}

/// Frame decoding failures.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The text was not a valid JSON envelope at all.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Valid JSON envelope but an operation this version does not know.
    #[error("unknown op: {op}")]
    UnknownOp { op: String },
}

impl Frame {
    fn new(
        frame_type: FrameType,
        op: Op,
        client_id: ClientId,
        msg_id: Option<MsgId>,
        payload: Value,
    ) -> Self {
        Self {
            frame_type,
            op,
            client_id,
            msg_id,
            ts: epoch_ms(),
            payload,
        }
    }

    /// CONTROL frame with a typed payload.
    pub fn control<P: Serialize>(
        op: Op,
        client_id: ClientId,
        payload: &P,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            FrameType::Control,
            op,
            client_id,
            None,
            serde_json::to_value(payload)?,
        ))
    }

    /// MESSAGE frame (REQUEST/RESPONSE) carrying a correlation id.
    pub fn message<P: Serialize>(
        op: Op,
        client_id: ClientId,
        msg_id: MsgId,
        payload: &P,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            FrameType::Message,
            op,
            client_id,
            Some(msg_id),
            serde_json::to_value(payload)?,
        ))
    }

    /// ACK frame for a specific message.
    pub fn ack<P: Serialize>(
        client_id: ClientId,
        msg_id: MsgId,
        payload: &P,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            FrameType::Ack,
            Op::Ack,
            client_id,
            Some(msg_id),
            serde_json::to_value(payload)?,
        ))
    }

    /// ERROR frame, optionally tied to a message.
    pub fn error<P: Serialize>(
        client_id: ClientId,
        msg_id: Option<MsgId>,
        payload: &P,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            FrameType::Error,
            Op::Error,
            client_id,
            msg_id,
            serde_json::to_value(payload)?,
        ))
    }

    /// Serialize for transmission as one WebSocket text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a received text frame.
    ///
    /// Distinguishes a malformed envelope from an envelope whose `op` is
    /// merely unknown to this version, because the two have different
    /// handling (drop vs log-and-ignore).
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        match serde_json::from_str::<Frame>(text) {
            Ok(frame) => Ok(frame),
            Err(err) => {
                // Check whether only the op field failed to parse.
                if let Ok(raw) = serde_json::from_str::<Value>(text) {
                    if let Some(op) = raw.get("op").and_then(Value::as_str) {
                        if serde_json::from_value::<Op>(Value::String(op.to_string())).is_err() {
                            return Err(DecodeError::UnknownOp { op: op.to_string() });
                        }
                    }
                }
                Err(DecodeError::Malformed(err))
            }
        }
    }

    /// Deserialize the payload into a typed structure.
    pub fn parse_payload<P: for<'de> Deserialize<'de>>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::{PingPayload, RegisterPayload};

    #[test]
    fn frame_roundtrip() {
        let frame = Frame::control(
            Op::Register,
            ClientId::new("agent-1"),
            &RegisterPayload {
                auth_token: "secret".into(),
                version: PROTOCOL_VERSION.into(),
                local_ips: vec!["10.0.0.5".into()],
            },
        )
        .unwrap();

        let text = frame.encode().unwrap();
        let back = Frame::decode(&text).unwrap();
        assert_eq!(back.frame_type, FrameType::Control);
        assert_eq!(back.op, Op::Register);
        assert_eq!(back.client_id.as_str(), "agent-1");
        assert!(back.msg_id.is_none());

        let payload: RegisterPayload = back.parse_payload().unwrap();
        assert_eq!(payload.auth_token, "secret");
        assert_eq!(payload.local_ips, vec!["10.0.0.5"]);
    }

    #[test]
    fn wire_names_are_screaming_snake() {
        let frame = Frame::control(
            Op::Ping,
            ClientId::new("agent-1"),
            &PingPayload { timestamp: 42 },
        )
        .unwrap();
        let text = frame.encode().unwrap();
        assert!(text.contains("\"type\":\"CONTROL\""));
        assert!(text.contains("\"op\":\"PING\""));
    }

    #[test]
    fn unknown_op_is_distinguished_from_malformed() {
        let text = r#"{"type":"CONTROL","op":"TELEPORT","client_id":"a","ts":1}"#;
        match Frame::decode(text) {
            Err(DecodeError::UnknownOp { op }) => assert_eq!(op, "TELEPORT"),
            other => panic!("expected UnknownOp, got {other:?}"),
        }

        match Frame::decode("not json at all") {
            Err(DecodeError::Malformed(_)) => {}
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn missing_payload_defaults_to_null() {
        let text = r#"{"type":"CONTROL","op":"PING","client_id":"a","ts":1}"#;
        let frame = Frame::decode(text).unwrap();
        assert!(frame.payload.is_null());
    }
}
