//! Queue message types
//!
//! Wire format of the remote queue's `/poll` payload plus per-message delivery results.

use serde::{Deserialize, Serialize};

/// A message waiting in the remote queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMessage {
    pub id: String,
    /// Destination address (phone number for SMS)
    #[serde(rename = "to")]
    pub destination: String,
    pub body: String,
}

impl PendingMessage {
    pub fn new(id: &str, destination: &str, body: &str) -> Self {
        Self {
            id: id.to_string(),
            destination: destination.to_string(),
            body: body.to_string(),
        }
    }

    /// First `max_chars` characters of the body, with an ellipsis when cut
    pub fn preview(&self, max_chars: usize) -> String {
        preview(&self.body, max_chars)
    }
}

/// Body of a 200 response from `GET /poll`.
///
/// The queue may attach extra fields (`status`, `created_at`); they are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct PollResponse {
    pub messages: Vec<PendingMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    Failed,
}

/// Outcome of dispatching one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub id: String,
    pub outcome: DeliveryOutcome,
    pub error: Option<String>,
}

impl DeliveryResult {
    pub fn sent(id: &str) -> Self {
        Self {
            id: id.to_string(),
            outcome: DeliveryOutcome::Sent,
            error: None,
        }
    }

    pub fn failed(id: &str, error: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            outcome: DeliveryOutcome::Failed,
            error: Some(error.into()),
        }
    }

    pub fn is_sent(&self) -> bool {
        self.outcome == DeliveryOutcome::Sent
    }
}

pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}
