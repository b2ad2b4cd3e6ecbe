//! Contract for the realtime conversational engine
//!
//! The engine is opaque: the coordinator sends it commands and reacts to the
//! events it streams back. Audio never passes through here.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;
use crate::tools::ToolDefinition;

/// Parameters for opening one conversational session
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub participant: String,
    pub instructions: String,
    pub tools: Vec<ToolDefinition>,
}

/// An item inserted into the conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationItem {
    /// Text the assistant should speak as its own turn
    AssistantMessage { text: String },
    /// Result of a function call, success or failure
    ToolOutput {
        call_id: String,
        output: String,
        is_error: bool,
    },
}

/// Command sent to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    CreateItem(ConversationItem),
    /// Ask the model to produce its next response
    CreateResponse,
}

/// Event streamed from the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The model wants a function invoked; `arguments` is raw JSON text
    ToolCallRequested {
        call_id: String,
        name: String,
        arguments: String,
    },
    /// Transcribed participant speech
    UserTranscript { text: String },
    /// The model finished a response
    ResponseDone { response_id: Option<String> },
    /// Engine-reported error; the session stays open
    Error { message: String },
    /// The engine connection ended
    Closed,
}

/// Command side of an open session
#[async_trait]
pub trait EngineSession: Send {
    async fn send(&mut self, command: EngineCommand) -> Result<()>;

    /// Close the session; idempotent
    async fn close(&mut self) -> Result<()>;
}

/// An open session and its event stream
pub struct EngineConnection {
    pub session: Box<dyn EngineSession>,
    pub events: mpsc::Receiver<EngineEvent>,
}

/// Opens conversational sessions
#[async_trait]
pub trait RealtimeEngine: Send + Sync {
    async fn connect(&self, request: SessionRequest) -> Result<EngineConnection>;
}
