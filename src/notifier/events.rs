//! Push-channel message types

use serde::{Deserialize, Serialize};

/// Server -> client events, sent as `{ "event": ..., "data": ... }`
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum PushEvent {
    Authenticated {
        #[serde(rename = "userId")]
        user_id: String,
    },
    #[serde(rename_all = "camelCase")]
    TaskEndingSoon {
        task_id: String,
        title: String,
        end_time: Option<String>,
        minutes_remaining: i64,
    },
    Pong,
    Error {
        message: String,
    },
}

impl PushEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"event":"error"}"#.to_string())
    }
}

/// Client -> server messages
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Authenticate {
        #[serde(default)]
        token: Option<String>,
        /// Accepted only in dev mode
        #[serde(default)]
        user_id: Option<String>,
    },
    Ping,
}
