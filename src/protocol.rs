//! Frame formats for the Postman protocol
//!
//! Every frame is a single WebSocket text message made of an operation keyword,
//! one space, and a JSON payload. The server only ever sends `message` frames.
//! Field names are kept exactly as the server spells them, including
//! `extention`.

use crate::error::{PostmanError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix of every frame the server sends to a client.
pub const MESSAGE_PREFIX: &str = "message ";

/// Payload of the server's answer to `ping`.
pub const HEARTBEAT_PAYLOAD: &str = "\"pong\"";

/// `result` value of a refusal notice.
pub const RESULT_FAIL: &str = "fail";

/// A message published on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub channel: String,
    pub message: String,
    pub tag: String,
    pub extention: String,
}

impl Publication {
    /// A publication with empty tag and extention.
    pub fn new(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            message: message.into(),
            tag: String::new(),
            extention: String::new(),
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn extention(mut self, extention: impl Into<String>) -> Self {
        self.extention = extention.into();
        self
    }
}

/// Server answer to `status`: version plus the clients on each channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusReport {
    pub version: String,
    pub channels: BTreeMap<String, Vec<String>>,
}

/// Result notice: a refusal before the server drops a client, or the outcome
/// of a request such as `store`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerResult {
    pub result: String,
    #[serde(default)]
    pub error: String,
}

/// Frames sent from client to server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Join a channel
    Subscribe { channel: String, client_info: String },

    /// Leave a channel
    Unsubscribe { channel: String },

    /// Publish to a channel
    Publish(Publication),

    /// Ask for a heartbeat
    Ping,

    /// Ask for the server status
    Status,
}

#[derive(Serialize)]
struct SubscribePayload<'a> {
    channel: &'a str,
    client_info: &'a str,
}

#[derive(Serialize)]
struct UnsubscribePayload<'a> {
    channel: &'a str,
}

#[derive(Serialize)]
struct EmptyPayload {}

impl ClientFrame {
    /// Operation keyword that starts the frame.
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Publish(_) => "publish",
            Self::Ping => "ping",
            Self::Status => "status",
        }
    }

    /// Channel the frame targets, if any.
    pub fn channel(&self) -> Option<&str> {
        match self {
            Self::Subscribe { channel, .. } | Self::Unsubscribe { channel } => Some(channel),
            Self::Publish(publication) => Some(&publication.channel),
            Self::Ping | Self::Status => None,
        }
    }

    /// Render the frame as wire text.
    pub fn encode(&self) -> Result<String> {
        let payload = match self {
            Self::Subscribe {
                channel,
                client_info,
            } => serde_json::to_string(&SubscribePayload {
                channel,
                client_info,
            }),
            Self::Unsubscribe { channel } => {
                serde_json::to_string(&UnsubscribePayload { channel })
            }
            Self::Publish(publication) => serde_json::to_string(publication),
            Self::Ping | Self::Status => serde_json::to_string(&EmptyPayload {}),
        }
        .map_err(PostmanError::Encode)?;

        Ok(format!("{} {}", self.keyword(), payload))
    }
}

/// Frames received from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// Answer to `ping`
    Heartbeat,

    /// Message on a subscribed channel
    Publication(Publication),

    /// Answer to `status`
    Status(StatusReport),

    /// The server refused this client
    Rejected(ServerResult),

    /// Any other result notice
    Result(ServerResult),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MessagePayload {
    Text(String),
    Publication(Publication),
    Status(StatusReport),
    Result(ServerResult),
}

impl ServerFrame {
    /// Decode one inbound text frame.
    ///
    /// Returns `Ok(None)` for frames that are not `message` frames; those are
    /// dropped without any callback.
    pub fn parse(raw: &str) -> Result<Option<Self>> {
        let Some(payload) = raw.strip_prefix(MESSAGE_PREFIX) else {
            return Ok(None);
        };

        if payload == HEARTBEAT_PAYLOAD {
            return Ok(Some(Self::Heartbeat));
        }

        let frame = match serde_json::from_str(payload).map_err(PostmanError::Decode)? {
            // Refusals arrive JSON-encoded a second time, as a string.
            MessagePayload::Text(text) => {
                Self::from_result(serde_json::from_str(&text).map_err(PostmanError::Decode)?)
            }
            MessagePayload::Publication(publication) => Self::Publication(publication),
            MessagePayload::Status(report) => Self::Status(report),
            MessagePayload::Result(result) => Self::from_result(result),
        };
        Ok(Some(frame))
    }

    fn from_result(result: ServerResult) -> Self {
        if result.result == RESULT_FAIL {
            Self::Rejected(result)
        } else {
            Self::Result(result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_subscribe_encoding() {
        let frame = ClientFrame::Subscribe {
            channel: "TEST".to_string(),
            client_info: String::new(),
        };
        assert_eq!(
            frame.encode().unwrap(),
            r#"subscribe {"channel":"TEST","client_info":""}"#
        );
    }

    #[test]
    fn test_unsubscribe_encoding() {
        let frame = ClientFrame::Unsubscribe {
            channel: "TEST".to_string(),
        };
        assert_eq!(frame.encode().unwrap(), r#"unsubscribe {"channel":"TEST"}"#);
    }

    #[test]
    fn test_publish_keeps_empty_defaults() {
        let frame = ClientFrame::Publish(Publication::new("TEST", "@@@@"));
        assert_eq!(
            frame.encode().unwrap(),
            r#"publish {"channel":"TEST","message":"@@@@","tag":"","extention":""}"#
        );
    }

    #[test]
    fn test_publish_with_tag_and_extention() {
        let frame = ClientFrame::Publish(Publication::new("A", "hi").tag("t").extention("e"));
        assert_eq!(
            frame.encode().unwrap(),
            r#"publish {"channel":"A","message":"hi","tag":"t","extention":"e"}"#
        );
    }

    #[test]
    fn test_ping_and_status_encoding() {
        assert_eq!(ClientFrame::Ping.encode().unwrap(), "ping {}");
        assert_eq!(ClientFrame::Status.encode().unwrap(), "status {}");
    }

    #[test]
    fn test_payload_escaping() {
        let frame = ClientFrame::Publish(Publication::new("ch", "say \"hi\"\n"));
        let text = frame.encode().unwrap();
        let payload = text.strip_prefix("publish ").unwrap();
        let decoded: Publication = serde_json::from_str(payload).unwrap();
        assert_eq!(decoded.message, "say \"hi\"\n");
    }

    #[test]
    fn test_frame_channel() {
        assert_eq!(ClientFrame::Publish(Publication::new("A", "")).channel(), Some("A"));
        assert_eq!(ClientFrame::Ping.channel(), None);
    }

    #[test]
    fn test_parse_ignores_short_frames() {
        assert_eq!(ServerFrame::parse("").unwrap(), None);
        assert_eq!(ServerFrame::parse("message").unwrap(), None);
        assert_eq!(ServerFrame::parse("hi").unwrap(), None);
    }

    #[test]
    fn test_parse_ignores_other_prefixes() {
        assert_eq!(ServerFrame::parse("publish {\"channel\":\"A\"}").unwrap(), None);
        assert_eq!(ServerFrame::parse("Message \"pong\"").unwrap(), None);
        assert_eq!(ServerFrame::parse(" message \"pong\"").unwrap(), None);
    }

    #[test]
    fn test_parse_heartbeat() {
        assert_eq!(
            ServerFrame::parse("message \"pong\"").unwrap(),
            Some(ServerFrame::Heartbeat)
        );
    }

    #[test]
    fn test_parse_publication() {
        let frame =
            ServerFrame::parse(r#"message {"channel":"A","message":"hi","tag":"t","extention":"e"}"#)
                .unwrap();
        assert_eq!(
            frame,
            Some(ServerFrame::Publication(
                Publication::new("A", "hi").tag("t").extention("e")
            ))
        );
    }

    #[test]
    fn test_parse_status() {
        let frame = ServerFrame::parse(
            r#"message {"version":"1.2.0","channels":{"TEST":["cli@127.0.0.1"]}}"#,
        )
        .unwrap();
        let Some(ServerFrame::Status(report)) = frame else {
            panic!("expected status frame, got {:?}", frame);
        };
        assert_eq!(report.version, "1.2.0");
        assert_eq!(report.channels["TEST"], vec!["cli@127.0.0.1".to_string()]);
    }

    #[test]
    fn test_parse_rejection() {
        let frame = ServerFrame::parse(r#"message {"result":"fail","error":"security error"}"#)
            .unwrap();
        assert_eq!(
            frame,
            Some(ServerFrame::Rejected(ServerResult {
                result: "fail".to_string(),
                error: "security error".to_string(),
            }))
        );
    }

    #[test]
    fn test_parse_quoted_rejection() {
        let frame =
            ServerFrame::parse(r#"message "{\"error\":\"security error\",\"result\":\"fail\"}""#)
                .unwrap();
        assert_eq!(
            frame,
            Some(ServerFrame::Rejected(ServerResult {
                result: "fail".to_string(),
                error: "security error".to_string(),
            }))
        );
    }

    #[test]
    fn test_parse_non_fail_result() {
        let frame = ServerFrame::parse(r#"message {"result":"success","error":""}"#).unwrap();
        assert_eq!(
            frame,
            Some(ServerFrame::Result(ServerResult {
                result: "success".to_string(),
                error: String::new(),
            }))
        );
    }

    #[test]
    fn test_parse_malformed_payload() {
        let err = ServerFrame::parse("message {not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn test_parse_incomplete_publication() {
        let err = ServerFrame::parse(r#"message {"channel":"A","message":"hi"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn test_parse_unexpected_string_payload() {
        let err = ServerFrame::parse("message \"ping\"").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }
}
