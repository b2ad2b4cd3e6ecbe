//! Chunked byte-stream transport
//!
//! A frame is carried as one stream: an `Open` packet naming the topic, a
//! run of `Chunk` packets no larger than the negotiated chunk size, and a
//! `Close` packet with a status. Receivers only accept a payload once they
//! see `Close { status: complete }`.

pub mod chunking;
mod link;
mod packet;
mod reassembly;
mod stream;

pub use chunking::{chunk_count, split_chunks};
pub use link::{ChannelLink, RoutedPacket, StreamLink};
pub use packet::{CloseStatus, StreamPacket};
pub use reassembly::{ReassemblyError, ReceivedFrame, StreamReassembler};
pub use stream::{StreamReceipt, StreamState, StreamTransport, StreamWriter};
