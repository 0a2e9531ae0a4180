//! Wire protocol shared by the relay server and its clients.
//!
//! Every payload is a JSON object carrying a `type` discriminator. Field names
//! are part of the compatibility contract, unknown fields are ignored, and all
//! instants (`endTime`, `timestamp`) are milliseconds since the Unix epoch.

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_POLL_DURATION_MS: u64 = 30_000;

/// Player id used for messages sent on behalf of the show itself.
pub const SYSTEM_PLAYER_ID: &str = "0";

/// Chat payloads used as control signals and never shown to viewers.
pub const HIDDEN_MESSAGES: &[&str] = &["systemstart"];

pub const CUTSCENE_PREFIX: &str = "playCutscene|";

const CLIENT_MESSAGE_TYPES: &[&str] = &["join", "poll", "vote", "message"];
const SERVER_MESSAGE_TYPES: &[&str] = &["poll", "voteClosure"];

/// Current time in milliseconds since the Unix epoch
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

/// One selectable choice as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSpec {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,
    pub name: String,
}

/// Public view of a poll: sent by its creator and replayed to late joiners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollAnnouncement {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,
    pub title: String,
    pub options: Vec<OptionSpec>,
    pub end_time: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    #[serde(deserialize_with = "opaque_id")]
    pub player_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteCast {
    #[serde(deserialize_with = "opaque_id")]
    pub poll_id: String,
    #[serde(deserialize_with = "opaque_id")]
    pub option_id: String,
    #[serde(deserialize_with = "opaque_id")]
    pub player_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub message: String,
    #[serde(deserialize_with = "opaque_id")]
    pub player_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Join(JoinRequest),
    Poll(PollAnnouncement),
    Vote(VoteCast),
    Message(ChatMessage),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionResult {
    #[serde(deserialize_with = "opaque_id")]
    pub option_id: String,
    pub votes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteClosure {
    #[serde(deserialize_with = "opaque_id")]
    pub poll_id: String,
    pub results: Vec<OptionResult>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Poll(PollAnnouncement),
    VoteClosure(VoteClosure),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("payload has no type discriminator")]
    Untyped,

    #[error("unrecognized message type `{0}`")]
    UnknownType(String),

    #[error("`{kind}` message is missing or has invalid fields: {source}")]
    InvalidFields {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    /// True when the payload could not be read as a typed object at all
    pub fn is_opaque(&self) -> bool {
        matches!(
            self,
            DecodeError::Malformed(_) | DecodeError::NotAnObject | DecodeError::Untyped
        )
    }
}

pub fn decode_client_message(payload: &str) -> Result<ClientMessage, DecodeError> {
    decode_tagged(payload, CLIENT_MESSAGE_TYPES)
}

pub fn decode_server_message(payload: &str) -> Result<ServerMessage, DecodeError> {
    decode_tagged(payload, SERVER_MESSAGE_TYPES)
}

fn decode_tagged<T>(payload: &str, known: &[&str]) -> Result<T, DecodeError>
where
    T: for<'de> Deserialize<'de>,
{
    let value: Value = serde_json::from_str(payload).map_err(DecodeError::Malformed)?;
    let kind = match &value {
        Value::Object(fields) => fields
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::Untyped)?
            .to_owned(),
        _ => return Err(DecodeError::NotAnObject),
    };

    if !known.contains(&kind.as_str()) {
        return Err(DecodeError::UnknownType(kind));
    }

    serde_json::from_value(value).map_err(|source| DecodeError::InvalidFields { kind, source })
}

/// Accepts an identifier sent either as a JSON string or a JSON number.
///
/// Browser clients store player ids as numbers while other producers send
/// strings; both normalise to the same text so voter sets compare equal.
pub fn opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct OpaqueIdVisitor;

    impl<'de> Visitor<'de> for OpaqueIdVisitor {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a string or numeric identifier")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_owned())
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<String, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<String, E> {
            // Integral floats (e.g. `Math.floor(...)` results) keep their integer text
            if v.fract() == 0.0 && v.abs() < 9.0e15 {
                Ok((v as i64).to_string())
            } else {
                Ok(v.to_string())
            }
        }
    }

    deserializer.deserialize_any(OpaqueIdVisitor)
}
