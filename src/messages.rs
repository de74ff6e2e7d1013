//! Message vocabulary for the courier bus.
//!
//! These are the envelopes that cross between page agents and the router.
//! The wire names are historical and preserved exactly: `sendQuestionToChatGPT`
//! is sent toward the router whichever oracle is active, and the reply tags
//! stay per-oracle so the router can tell who answered.

use crate::oracle::OracleKind;
use crate::task::Task;
use crate::transport::ContextInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything that can travel across the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Study page asks the router to relay a question to the active oracle.
    #[serde(rename = "sendQuestionToChatGPT")]
    SendQuestion { question: Task },

    /// Router hands a question to an oracle page.
    #[serde(rename = "receiveQuestion")]
    ReceiveQuestion { question: Task },

    /// Oracle page reports a detected reply payload.
    #[serde(rename = "chatGPTResponse")]
    ChatGptResponse { response: String },
    #[serde(rename = "geminiResponse")]
    GeminiResponse { response: String },
    #[serde(rename = "deepseekResponse")]
    DeepseekResponse { response: String },

    /// Router hands a reply payload back to the study page.
    #[serde(rename = "processChatGPTResponse")]
    ProcessResponse { response: String },

    /// Router asks a page to surface a user-visible alert.
    #[serde(rename = "alertMessage")]
    Alert { message: String },

    /// A page asks for the settings surface to be opened.
    #[serde(rename = "openSettings")]
    OpenSettings,
}

impl Message {
    /// The reply variant matching an oracle kind.
    pub fn oracle_response(kind: OracleKind, payload: String) -> Self {
        match kind {
            OracleKind::ChatGpt => Message::ChatGptResponse { response: payload },
            OracleKind::Gemini => Message::GeminiResponse { response: payload },
            OracleKind::Deepseek => Message::DeepseekResponse { response: payload },
        }
    }

    /// If this is an oracle reply, which oracle produced it and the payload.
    pub fn as_oracle_response(&self) -> Option<(OracleKind, &str)> {
        match self {
            Message::ChatGptResponse { response } => Some((OracleKind::ChatGpt, response)),
            Message::GeminiResponse { response } => Some((OracleKind::Gemini, response)),
            Message::DeepseekResponse { response } => Some((OracleKind::Deepseek, response)),
            _ => None,
        }
    }

    /// Wire tag, for log lines.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Message::SendQuestion { .. } => "sendQuestionToChatGPT",
            Message::ReceiveQuestion { .. } => "receiveQuestion",
            Message::ChatGptResponse { .. } => "chatGPTResponse",
            Message::GeminiResponse { .. } => "geminiResponse",
            Message::DeepseekResponse { .. } => "deepseekResponse",
            Message::ProcessResponse { .. } => "processChatGPTResponse",
            Message::Alert { .. } => "alertMessage",
            Message::OpenSettings => "openSettings",
        }
    }
}

/// A message plus its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    /// Originating tab for agent-sent messages. Router-originated envelopes
    /// carry `None`, mirroring messages sent by the runtime itself.
    pub origin: Option<ContextInfo>,
    /// Creation time; retries reuse the envelope, so this is the first send.
    pub sent_at: DateTime<Utc>,
    pub message: Message,
}

impl Envelope {
    pub fn from_context(origin: ContextInfo, message: Message) -> Self {
        Self {
            id: Uuid::new_v4(),
            origin: Some(origin),
            sent_at: Utc::now(),
            message,
        }
    }

    pub fn from_router(message: Message) -> Self {
        Self {
            id: Uuid::new_v4(),
            origin: None,
            sent_at: Utc::now(),
            message,
        }
    }
}

/// Receipt returned by the target agent for one delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub received: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            received: true,
            detail: None,
        }
    }

    /// Accepted and the page is now working on it.
    pub fn processing() -> Self {
        Self {
            received: true,
            detail: Some("processing".to_string()),
        }
    }

    pub fn rejected(detail: impl Into<String>) -> Self {
        Self {
            received: false,
            detail: Some(detail.into()),
        }
    }
}
