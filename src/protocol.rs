//! Messages exchanged with the companion panel.
//!
//! Requests arrive tagged by `action` and get exactly one response; notifications go out
//! tagged the same way and get none.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::{MessageId, ScopeKey, SessionToken};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    Ping,
    GetTabId,
    ScanNow,
    LoadAllMessages,
    GetCurrentPosition,
    #[serde(rename_all = "camelCase")]
    HighlightMessage {
        message_id: MessageId,
        #[serde(default)]
        message_content: Option<String>,
        /// Sent by older panels; unused.
        #[serde(default)]
        message_index: Option<i64>,
    },
}

impl Request {
    /// Parse a raw inbound payload. Unknown actions and malformed payloads yield `None`.
    pub fn parse(payload: &Value) -> Option<Self> {
        match serde_json::from_value(payload.clone()) {
            Ok(request) => Some(request),
            Err(e) => {
                tracing::debug!(error = %e, "ignoring unrecognised request");
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    #[serde(rename_all = "camelCase")]
    Ready {
        success: bool,
        ready: bool,
        tab_id: SessionToken,
    },
    #[serde(rename_all = "camelCase")]
    TabId { tab_id: SessionToken },
    #[serde(rename_all = "camelCase")]
    Position {
        message_id: Option<MessageId>,
        tab_id: SessionToken,
    },
    #[serde(rename_all = "camelCase")]
    Done {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        tab_id: Option<SessionToken>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Notification {
    #[serde(rename_all = "camelCase")]
    UpdateProgress {
        message_id: MessageId,
        storage_key: ScopeKey,
        tab_id: SessionToken,
    },
    #[serde(rename_all = "camelCase")]
    ConversationRebuilt {
        storage_key: ScopeKey,
        tab_id: SessionToken,
    },
}
