//! Shared types for the help-desk ledger service and its RPC clients.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// =====================================================
// Ledger Types
// =====================================================

/// One ledger entry per normalized query text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub search_query: String,
    pub search_count: i64,
    pub created_on: String,
    pub last_searched: Option<String>,
    pub user_ids: Vec<String>,
    pub utterances: Vec<String>,
}

/// A single sighting of a query: who asked and how they phrased it.
///
/// Empty strings count as absent so that a blank user id never lands in the
/// ledger's lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub user_id: Option<String>,
    pub utterance: Option<String>,
}

impl Observation {
    pub fn new(user_id: Option<&str>, utterance: Option<&str>) -> Self {
        Self {
            user_id: user_id.map(str::to_string),
            utterance: utterance.map(str::to_string),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref().filter(|s| !s.is_empty())
    }

    pub fn utterance(&self) -> Option<&str> {
        self.utterance.as_deref().filter(|s| !s.is_empty())
    }
}

/// What a recorded observation did to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerWrite {
    Created,
    Updated,
    /// Ledger writes are turned off in config
    Skipped,
}

/// Aggregate ledger statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerStats {
    pub distinct_queries: i64,
    pub total_searches: i64,
    pub distinct_users: i64,
}

// =====================================================
// Dialog Action Protocol
// =====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FulfillmentState {
    Fulfilled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub content_type: String,
    pub content: String,
}

impl Message {
    pub fn plain(content: impl Into<String>) -> Self {
        Self {
            content_type: "PlainText".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardButton {
    pub text: String,
    pub value: String,
}

/// One generic attachment inside a response card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardAttachment {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_link_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<CardButton>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseCard {
    pub version: u32,
    pub content_type: String,
    pub generic_attachments: Vec<CardAttachment>,
}

pub type Slots = HashMap<String, Option<String>>;

/// Instruction returned to the conversational front-end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DialogAction {
    /// Ask the user to fill a slot, optionally offering choices
    #[serde(rename_all = "camelCase")]
    ElicitSlot {
        intent_name: String,
        slots: Slots,
        slot_to_elicit: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<Message>,
        #[serde(skip_serializing_if = "Option::is_none")]
        response_card: Option<ResponseCard>,
    },
    /// Hand control back to the orchestrator
    #[serde(rename_all = "camelCase")]
    Delegate { slots: Slots },
    #[serde(rename_all = "camelCase")]
    ConfirmIntent {
        intent_name: String,
        slots: Slots,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<Message>,
        #[serde(skip_serializing_if = "Option::is_none")]
        response_card: Option<ResponseCard>,
    },
    /// End the turn
    #[serde(rename_all = "camelCase")]
    Close {
        fulfillment_state: FulfillmentState,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<Message>,
        #[serde(skip_serializing_if = "Option::is_none")]
        response_card: Option<ResponseCard>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LexResponse {
    #[serde(default)]
    pub session_attributes: HashMap<String, String>,
    pub dialog_action: DialogAction,
}

// =====================================================
// RPC Request Types
// =====================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ObserveRequest {
    pub search_query: String,
    pub user_id: Option<String>,
    pub utterance: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AskRequest {
    pub query: String,
    pub user_id: Option<String>,
    /// Raw text the user typed, when it differs from the extracted query
    pub input_transcript: Option<String>,
    pub intent_name: Option<String>,
    #[serde(default)]
    pub slots: Slots,
    #[serde(default)]
    pub session_attributes: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetQueryRequest {
    pub search_query: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ListQueriesRequest {
    pub limit: Option<usize>,
}

// =====================================================
// RPC Response Types
// =====================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> RpcResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

// =====================================================
// Service Status
// =====================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub uptime_secs: u64,
    pub ledger_enabled: bool,
    pub table_name: String,
    pub knowledge_entries: usize,
    pub distinct_queries: i64,
    pub total_searches: i64,
}
