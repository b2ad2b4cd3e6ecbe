//! Sightline Gateway - camera-aware gateway for realtime voice assistants
//!
//! Two independent flows run for every participant:
//! - Frames: sampled on a timer, fingerprinted with a perceptual hash,
//!   gated against the last transmitted frame, and streamed in bounded
//!   chunks over a topic-scoped channel
//! - Conversation: one realtime model session that can call tools
//!   mid-turn and always receives a result or failure back
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     HTTP API                          │
//! │  participants  │  frame ingest  │  stream socket      │
//! └───────────────────────┬──────────────────────────────┘
//!                         │
//! ┌───────────────────────▼──────────────────────────────┐
//! │                      Daemon                           │
//! │  Sampler → Hasher → Gate → Transmitter → Transport    │
//! │  SessionCoordinator ↔ ToolDispatcher                  │
//! └───────────────────────┬──────────────────────────────┘
//!                         │
//! ┌───────────────────────▼──────────────────────────────┐
//! │             Realtime engine (WebSocket)               │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod daemon;
pub mod error;
pub mod session;
pub mod tools;
pub mod transport;
pub mod vision;

pub use config::Config;
pub use daemon::{Daemon, ParticipantStatus};
pub use error::{Error, Result};
pub use session::{SessionCoordinator, SessionHandle, SessionState};
pub use tools::{ToolDispatcher, ToolFailure, ToolResult};
pub use transport::{StreamPacket, StreamTransport};
pub use vision::{ChangeGate, FramePipeline, GateDecision};
