//! Session lifecycle and per-participant conversation state

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::tools::ToolCall;

/// Lifecycle of the coordinator and of each participant's session
///
/// `Idle → AwaitingParticipant` when the coordinator starts;
/// `AwaitingParticipant → Active` when a participant's session opens;
/// `Active → Closing → Closed` on disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    AwaitingParticipant,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    /// Whether new tool calls may be dispatched
    #[must_use]
    pub const fn accepts_tool_calls(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::AwaitingParticipant => "awaiting_participant",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Conversation bookkeeping owned by one session task
#[derive(Debug)]
pub struct ConversationState {
    pub participant: String,
    pub session_id: Uuid,
    pub turn_id: u64,
    /// In-flight tool calls by call id
    pub pending: HashMap<String, ToolCall>,
}

impl ConversationState {
    #[must_use]
    pub fn new(participant: impl Into<String>) -> Self {
        Self {
            participant: participant.into(),
            session_id: Uuid::new_v4(),
            turn_id: 0,
            pending: HashMap::new(),
        }
    }

    /// Record a requested call; returns false if the call id is already pending
    pub fn track(&mut self, call: ToolCall) -> bool {
        if self.pending.contains_key(&call.call_id) {
            return false;
        }
        self.pending.insert(call.call_id.clone(), call);
        true
    }

    /// Remove a completed call
    pub fn complete(&mut self, call_id: &str) -> Option<ToolCall> {
        self.pending.remove(call_id)
    }

    pub fn advance_turn(&mut self) -> u64 {
        self.turn_id += 1;
        self.turn_id
    }
}
