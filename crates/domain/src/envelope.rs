//! Transport-neutral turn envelopes.
//!
//! An envelope is one turn's payload as it crosses a channel boundary
//! (telegram bridge, gateway client, schedule). The WAL persists the
//! envelope verbatim so a crashed turn can be replayed.

use serde::{Deserialize, Serialize};

/// Schema tag stamped on every envelope.
pub const TURN_SCHEMA: &str = "turn.v1";

/// What kind of turn the envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnKind {
    User,
    Assistant,
    Tool,
    Approval,
}

/// One content part of a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TurnPart {
    Text { text: String },
    Image {
        /// Either a data URI or a workspace-relative path.
        source: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mime: Option<String>,
    },
    File {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

/// Approval decision attached to `TurnKind::Approval` envelopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnApproval {
    pub request_id: String,
    pub approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// The transport-neutral representation of one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnEnvelope {
    pub schema: String,
    pub kind: TurnKind,
    pub session_id: String,
    pub turn_id: String,
    pub channel: String,
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Unix millis.
    pub timestamp: i64,
    pub parts: Vec<TurnPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval: Option<TurnApproval>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl TurnEnvelope {
    /// Build a plain-text user turn for the given conversation.
    pub fn user_text(
        session_id: &str,
        channel: &str,
        conversation_id: &str,
        text: &str,
    ) -> Self {
        Self {
            schema: TURN_SCHEMA.to_owned(),
            kind: TurnKind::User,
            session_id: session_id.to_owned(),
            turn_id: crate::ids::turn_id(),
            channel: channel.to_owned(),
            conversation_id: conversation_id.to_owned(),
            message_id: None,
            thread_id: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
            parts: vec![TurnPart::Text {
                text: text.to_owned(),
            }],
            approval: None,
            meta: None,
        }
    }

    /// Concatenate the text parts into one prompt string.
    pub fn prompt_text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                TurnPart::Text { text } => {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(text);
                }
                TurnPart::Image { source, .. } => {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(&format!("[image: {source}]"));
                }
                TurnPart::File { path, .. } => {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(&format!("[file: {path}]"));
                }
            }
        }
        out
    }
}
