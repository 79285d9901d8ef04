//! Wire-level types shared by the broker and its clients: the frame shapes,
//! the NUL-delimited codec, agent identity, and the numeric error codes.
//!
//! This crate has no I/O and no async runtime dependency — it only knows how
//! to turn bytes into frames and frames into bytes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod error_codes {
    pub const COMMAND_NOT_FOUND: u16 = 100;
    pub const MESSAGE_FORMAT: u16 = 101;
    pub const INVALID_DATA: u16 = 102;
    pub const INVALID_STATE: u16 = 103;
    pub const INVALID_AGENT: u16 = 200;
    pub const ACCESS_DENIED: u16 = 201;
    pub const CONNECTION_ERROR: u16 = 202;
    pub const INTERNAL_ERROR: u16 = 300;
}

/// 32-bit non-negative agent identifier. `0..7` are reserved for local
/// agents; `8..` is the range the broker assigns to inbound connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub u32);

impl AgentId {
    pub const ROOT: AgentId = AgentId(0);
    pub const USER: AgentId = AgentId(1);
    pub const EXPSVC: AgentId = AgentId(2);
    pub const FIRST_REMOTE: AgentId = AgentId(8);

    #[must_use]
    pub fn is_local(self) -> bool {
        self.0 < Self::FIRST_REMOTE.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outbound message-id, owned by whichever connection allocated it. Never
/// reused within a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MsgId(pub u64);

impl fmt::Display for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Short ASCII tag declaring what kind of peer a connection is. Unknown
/// tags are carried through as `Generic` rather than rejected, since the
/// wire format treats `agentType` as a free string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AgentType {
    Root,
    User,
    ExpSvc,
    Load,
    Web,
    Cli,
    Monitor,
    Generic(String),
}

impl AgentType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            AgentType::Root => "root",
            AgentType::User => "user",
            AgentType::ExpSvc => "expsvc",
            AgentType::Load => "load",
            AgentType::Web => "web",
            AgentType::Cli => "cli",
            AgentType::Monitor => "monitor",
            AgentType::Generic(s) => s,
        }
    }
}

impl From<&str> for AgentType {
    fn from(s: &str) -> Self {
        match s {
            "root" => AgentType::Root,
            "user" => AgentType::User,
            "expsvc" => AgentType::ExpSvc,
            "load" => AgentType::Load,
            "web" => AgentType::Web,
            "cli" => AgentType::Cli,
            "monitor" => AgentType::Monitor,
            other => AgentType::Generic(other.to_owned()),
        }
    }
}

impl Serialize for AgentType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AgentType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(AgentType::from(s.as_str()))
    }
}

/// One frame on the wire. The three shapes are discriminated by which keys
/// are present (`cmd`, `response`, or `error`) rather than by an explicit
/// tag field, matching the protocol's untagged wire format.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Command {
        agent_id: AgentId,
        id: MsgId,
        cmd: String,
        msg: Value,
    },
    Response {
        agent_id: AgentId,
        id: MsgId,
        response: Value,
    },
    Error {
        agent_id: AgentId,
        id: MsgId,
        error: String,
        code: u16,
    },
}

impl Frame {
    #[must_use]
    pub fn agent_id(&self) -> AgentId {
        match self {
            Frame::Command { agent_id, .. }
            | Frame::Response { agent_id, .. }
            | Frame::Error { agent_id, .. } => *agent_id,
        }
    }

    #[must_use]
    pub fn id(&self) -> MsgId {
        match self {
            Frame::Command { id, .. } | Frame::Response { id, .. } | Frame::Error { id, .. } => {
                *id
            }
        }
    }

    pub fn set_agent_id(&mut self, agent_id: AgentId) {
        match self {
            Frame::Command { agent_id: a, .. }
            | Frame::Response { agent_id: a, .. }
            | Frame::Error { agent_id: a, .. } => *a = agent_id,
        }
    }

    pub fn set_id(&mut self, id: MsgId) {
        match self {
            Frame::Command { id: i, .. } | Frame::Response { id: i, .. } | Frame::Error { id: i, .. } => {
                *i = id;
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireFrame {
    #[serde(rename = "agentId")]
    agent_id: AgentId,
    id: MsgId,
    #[serde(skip_serializing_if = "Option::is_none")]
    cmd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    msg: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<u16>,
}

impl Serialize for Frame {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let wire = match self {
            Frame::Command {
                agent_id,
                id,
                cmd,
                msg,
            } => WireFrame {
                agent_id: *agent_id,
                id: *id,
                cmd: Some(cmd.clone()),
                msg: Some(msg.clone()),
                response: None,
                error: None,
                code: None,
            },
            Frame::Response {
                agent_id,
                id,
                response,
            } => WireFrame {
                agent_id: *agent_id,
                id: *id,
                cmd: None,
                msg: None,
                response: Some(response.clone()),
                error: None,
                code: None,
            },
            Frame::Error {
                agent_id,
                id,
                error,
                code,
            } => WireFrame {
                agent_id: *agent_id,
                id: *id,
                cmd: None,
                msg: None,
                response: None,
                error: Some(error.clone()),
                code: Some(*code),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Frame {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = WireFrame::deserialize(deserializer)?;
        if let Some(cmd) = wire.cmd {
            let msg = wire.msg.ok_or_else(|| serde::de::Error::missing_field("msg"))?;
            Ok(Frame::Command {
                agent_id: wire.agent_id,
                id: wire.id,
                cmd,
                msg,
            })
        } else if let Some(response) = wire.response {
            Ok(Frame::Response {
                agent_id: wire.agent_id,
                id: wire.id,
                response,
            })
        } else if let Some(error) = wire.error {
            let code = wire.code.ok_or_else(|| serde::de::Error::missing_field("code"))?;
            Ok(Frame::Error {
                agent_id: wire.agent_id,
                id: wire.id,
                error,
                code,
            })
        } else {
            Err(serde::de::Error::custom(
                "frame has none of cmd, response, or error",
            ))
        }
    }
}

/// Errors produced by the wire layer: malformed frames, oversized buffers,
/// or a codec failure that should drop the connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("command not found: {0}")]
    CommandNotFound(String),
    #[error("message format: {0}")]
    MessageFormat(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid agent #{0}")]
    InvalidAgent(AgentId),
    #[error("access is denied")]
    AccessDenied,
    #[error("connection error: {0}")]
    ConnectionError(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl ProtocolError {
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            ProtocolError::CommandNotFound(_) => error_codes::COMMAND_NOT_FOUND,
            ProtocolError::MessageFormat(_) => error_codes::MESSAGE_FORMAT,
            ProtocolError::InvalidData(_) => error_codes::INVALID_DATA,
            ProtocolError::InvalidState(_) => error_codes::INVALID_STATE,
            ProtocolError::InvalidAgent(_) => error_codes::INVALID_AGENT,
            ProtocolError::AccessDenied => error_codes::ACCESS_DENIED,
            ProtocolError::ConnectionError(_) => error_codes::CONNECTION_ERROR,
            ProtocolError::InternalError(_) => error_codes::INTERNAL_ERROR,
        }
    }
}

/// Default cap on bytes buffered per connection before the codec reports a
/// connection error. The protocol has no size header, so this is the only
/// backstop against an unbounded frame.
pub const DEFAULT_MAX_BUFFERED_BYTES: usize = 1024 * 1024;

/// Splits a byte stream on `0x00` into complete frames, retaining any
/// trailing partial frame across calls. Pure and synchronous; the async
/// connection loop owns the actual socket reads.
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_buffered_bytes: usize,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_BUFFERED_BYTES)
    }

    #[must_use]
    pub fn with_limit(max_buffered_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_buffered_bytes,
        }
    }

    /// Feeds newly read bytes in and drains every complete frame found so
    /// far, in order. Returns `ProtocolError::ConnectionError` if the
    /// buffered-but-incomplete tail exceeds the configured limit.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, ProtocolError> {
        self.buf.extend_from_slice(bytes);

        let mut frames = Vec::new();
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == 0) else {
                break;
            };
            let payload = self.buf.drain(..=pos).collect::<Vec<u8>>();
            let payload = &payload[..payload.len() - 1];
            if payload.is_empty() {
                continue;
            }
            let frame: Frame = serde_json::from_slice(payload)
                .map_err(|e| ProtocolError::MessageFormat(e.to_string()))?;
            frames.push(frame);
        }

        if self.buf.len() > self.max_buffered_bytes {
            return Err(ProtocolError::ConnectionError(format!(
                "buffered frame exceeds {} bytes with no delimiter",
                self.max_buffered_bytes
            )));
        }

        Ok(frames)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes a frame and appends the NUL delimiter. One call produces one
/// complete, self-contained write — callers must not interleave partial
/// writes from two frames on the same stream.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
    let mut bytes =
        serde_json::to_vec(frame).map_err(|e| ProtocolError::MessageFormat(e.to_string()))?;
    bytes.push(0);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_round_trips_through_encode_and_decode() {
        let frame = Frame::Command {
            agent_id: AgentId(0),
            id: MsgId(1),
            cmd: "hello".to_owned(),
            msg: json!({"agentType": "cli", "agentUuid": "uuid-A"}),
        };
        let bytes = encode_frame(&frame).unwrap();
        assert_eq!(*bytes.last().unwrap(), 0);

        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&bytes).unwrap();
        assert_eq!(frames, vec![frame]);
    }

    #[test]
    fn decoder_buffers_a_frame_with_no_trailing_delimiter() {
        let mut decoder = FrameDecoder::new();
        let partial = br#"{"agentId":0,"id":1,"cmd":"hello","msg":{}}"#;
        let frames = decoder.push(partial).unwrap();
        assert!(frames.is_empty());

        let frames = decoder.push(&[0]).unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn decoder_splits_two_frames_delivered_in_one_read() {
        let a = encode_frame(&Frame::Response {
            agent_id: AgentId(8),
            id: MsgId(1),
            response: json!(null),
        })
        .unwrap();
        let b = encode_frame(&Frame::Error {
            agent_id: AgentId(8),
            id: MsgId(2),
            error: "boom".to_owned(),
            code: error_codes::INTERNAL_ERROR,
        })
        .unwrap();

        let mut combined = a;
        combined.extend_from_slice(&b);

        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&combined).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Frame::Response { .. }));
        assert!(matches!(frames[1], Frame::Error { .. }));
    }

    #[test]
    fn decoder_rejects_an_oversized_unterminated_buffer() {
        let mut decoder = FrameDecoder::with_limit(8);
        let err = decoder.push(b"0123456789").unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionError(_)));
    }

    #[test]
    fn protocol_error_codes_match_the_numeric_table() {
        assert_eq!(ProtocolError::CommandNotFound(String::new()).code(), 100);
        assert_eq!(ProtocolError::MessageFormat(String::new()).code(), 101);
        assert_eq!(ProtocolError::InvalidData(String::new()).code(), 102);
        assert_eq!(ProtocolError::InvalidState(String::new()).code(), 103);
        assert_eq!(ProtocolError::InvalidAgent(AgentId(99)).code(), 200);
        assert_eq!(ProtocolError::AccessDenied.code(), 201);
        assert_eq!(ProtocolError::ConnectionError(String::new()).code(), 202);
        assert_eq!(ProtocolError::InternalError(String::new()).code(), 300);
    }
}
