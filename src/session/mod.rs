//! Conversational sessions

mod coordinator;
mod engine;
mod realtime;
mod state;

pub use coordinator::{SessionCoordinator, SessionHandle, SessionSettings};
pub use engine::{
    ConversationItem, EngineCommand, EngineConnection, EngineEvent, EngineSession, RealtimeEngine,
    SessionRequest,
};
pub use realtime::RealtimeWsEngine;
pub use state::{ConversationState, SessionState};
