use std::fmt;

use serde_json::Value;

pub const JOINED: &str = " joined the channel";
pub const LEFT: &str = " left the channel";

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Message,
    Control,
}

/// The record published on the relay channel and delivered to every browser.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub action: Action,
    pub user: String,
    pub msg: String,
}

impl ChatRecord {
    pub fn message(user: &str, msg: &str) -> Self {
        ChatRecord {
            action: Action::Message,
            user: user.to_string(),
            msg: msg.to_string(),
        }
    }

    pub fn joined(user: &str) -> Self {
        ChatRecord {
            action: Action::Control,
            user: user.to_string(),
            msg: JOINED.to_string(),
        }
    }

    pub fn left(user: &str) -> Self {
        ChatRecord {
            action: Action::Control,
            user: user.to_string(),
            msg: LEFT.to_string(),
        }
    }

    pub fn to_payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_payload(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}

/// Events a browser sends over its socket.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ClientEvent {
    Join,
    Chat { msg: String },
}

#[derive(Debug)]
pub enum EventError {
    Json(serde_json::Error),
    UnknownEvent(String),
    MissingMessage,
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Json(err)
    }
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::Json(err) => write!(f, "invalid event json : {}", err),
            EventError::UnknownEvent(name) => write!(f, "unknown event '{}'", name),
            EventError::MissingMessage => write!(f, "chat event without msg"),
        }
    }
}

#[derive(Deserialize)]
struct RawEvent {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct ChatData {
    msg: Option<String>,
}

impl ClientEvent {
    /// Parse a `{"event": ..., "data": ...}` text frame. Chat data is accepted either as an
    /// object or as a json document encoded in a string.
    pub fn parse(text: &str) -> Result<Self, EventError> {
        let raw: RawEvent = serde_json::from_str(text)?;

        match raw.event.as_str() {
            "join" => Ok(ClientEvent::Join),
            "chat" => {
                let data: ChatData = match raw.data {
                    Value::String(encoded) => serde_json::from_str(&encoded)?,
                    other => serde_json::from_value(other)?,
                };

                data.msg
                    .map(|msg| ClientEvent::Chat { msg })
                    .ok_or(EventError::MissingMessage)
            }
            other => Err(EventError::UnknownEvent(other.to_string())),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            ClientEvent::Join => "join",
            ClientEvent::Chat { .. } => "chat",
        }
    }
}

#[derive(Serialize)]
struct ServerEvent<'a> {
    event: &'static str,
    data: &'a str,
}

/// Wrap a relay payload in the text frame pushed to browsers.
pub fn chat_frame(payload: &str) -> serde_json::Result<String> {
    serde_json::to_string(&ServerEvent {
        event: "chat",
        data: payload,
    })
}
