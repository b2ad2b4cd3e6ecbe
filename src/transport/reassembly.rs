//! Receiver-side stream reassembly

use std::collections::HashMap;

use uuid::Uuid;

use super::packet::{CloseStatus, StreamPacket};

/// A payload delivered by a completed stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFrame {
    pub stream_id: Uuid,
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Protocol violations seen while reassembling
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReassemblyError {
    #[error("packet for unknown stream {0}")]
    UnknownStream(Uuid),

    #[error("stream {0} opened twice")]
    DuplicateOpen(Uuid),

    #[error("stream {stream_id}: expected chunk {expected}, got {got}")]
    OutOfOrder {
        stream_id: Uuid,
        expected: u32,
        got: u32,
    },

    #[error("stream {stream_id}: close reports {chunks} chunks/{bytes} bytes, received {received_chunks}/{received_bytes}")]
    LengthMismatch {
        stream_id: Uuid,
        chunks: u32,
        bytes: usize,
        received_chunks: u32,
        received_bytes: usize,
    },
}

#[derive(Debug)]
struct Partial {
    topic: String,
    next_seq: u32,
    data: Vec<u8>,
}

/// Rebuilds payloads from interleaved stream packets
///
/// A payload is only released on a `complete` close whose totals match
/// what was received. Aborted streams and streams that violate ordering
/// are discarded.
#[derive(Debug, Default)]
pub struct StreamReassembler {
    open: HashMap<Uuid, Partial>,
}

impl StreamReassembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one packet
    ///
    /// Returns the reassembled frame when `packet` completes a stream.
    ///
    /// # Errors
    ///
    /// Returns a `ReassemblyError` on a protocol violation; the offending
    /// stream is dropped
    pub fn accept(&mut self, packet: StreamPacket) -> Result<Option<ReceivedFrame>, ReassemblyError> {
        match packet {
            StreamPacket::Open { stream_id, topic } => {
                if self.open.contains_key(&stream_id) {
                    self.open.remove(&stream_id);
                    return Err(ReassemblyError::DuplicateOpen(stream_id));
                }
                self.open.insert(
                    stream_id,
                    Partial {
                        topic,
                        next_seq: 0,
                        data: Vec::new(),
                    },
                );
                Ok(None)
            }
            StreamPacket::Chunk {
                stream_id,
                seq,
                data,
            } => {
                let partial = self
                    .open
                    .get_mut(&stream_id)
                    .ok_or(ReassemblyError::UnknownStream(stream_id))?;
                if seq != partial.next_seq {
                    let expected = partial.next_seq;
                    self.open.remove(&stream_id);
                    return Err(ReassemblyError::OutOfOrder {
                        stream_id,
                        expected,
                        got: seq,
                    });
                }
                partial.next_seq += 1;
                partial.data.extend_from_slice(&data);
                Ok(None)
            }
            StreamPacket::Close {
                stream_id,
                status,
                chunks,
                bytes,
            } => {
                let partial = self
                    .open
                    .remove(&stream_id)
                    .ok_or(ReassemblyError::UnknownStream(stream_id))?;

                if status == CloseStatus::Aborted {
                    tracing::debug!(%stream_id, topic = %partial.topic, "discarding aborted stream");
                    return Ok(None);
                }
                if chunks != partial.next_seq || bytes != partial.data.len() {
                    return Err(ReassemblyError::LengthMismatch {
                        stream_id,
                        chunks,
                        bytes,
                        received_chunks: partial.next_seq,
                        received_bytes: partial.data.len(),
                    });
                }
                Ok(Some(ReceivedFrame {
                    stream_id,
                    topic: partial.topic,
                    payload: partial.data,
                }))
            }
        }
    }

    /// Number of streams opened but not yet closed
    #[must_use]
    pub fn pending(&self) -> usize {
        self.open.len()
    }

    /// Discard every unfinished stream, returning their ids
    pub fn drain_incomplete(&mut self) -> Vec<Uuid> {
        self.open.drain().map(|(id, _)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(id: Uuid) -> StreamPacket {
        StreamPacket::Open {
            stream_id: id,
            topic: "frames".into(),
        }
    }

    fn chunk(id: Uuid, seq: u32, data: &[u8]) -> StreamPacket {
        StreamPacket::Chunk {
            stream_id: id,
            seq,
            data: data.to_vec(),
        }
    }

    fn close(id: Uuid, status: CloseStatus, chunks: u32, bytes: usize) -> StreamPacket {
        StreamPacket::Close {
            stream_id: id,
            status,
            chunks,
            bytes,
        }
    }

    #[test]
    fn interleaved_streams_reassemble_independently() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut r = StreamReassembler::new();

        assert_eq!(r.accept(open(a)), Ok(None));
        assert_eq!(r.accept(open(b)), Ok(None));
        r.accept(chunk(a, 0, b"he")).unwrap();
        r.accept(chunk(b, 0, b"wo")).unwrap();
        r.accept(chunk(a, 1, b"llo")).unwrap();
        r.accept(chunk(b, 1, b"rld")).unwrap();
        assert_eq!(r.pending(), 2);

        let fa = r.accept(close(a, CloseStatus::Complete, 2, 5)).unwrap().unwrap();
        assert_eq!(fa.payload, b"hello");
        assert_eq!(fa.topic, "frames");
        let fb = r.accept(close(b, CloseStatus::Complete, 2, 5)).unwrap().unwrap();
        assert_eq!(fb.payload, b"world");
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn aborted_stream_is_discarded() {
        let id = Uuid::new_v4();
        let mut r = StreamReassembler::new();
        r.accept(open(id)).unwrap();
        r.accept(chunk(id, 0, b"partial")).unwrap();
        assert_eq!(r.accept(close(id, CloseStatus::Aborted, 1, 7)), Ok(None));
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn empty_payload_completes() {
        let id = Uuid::new_v4();
        let mut r = StreamReassembler::new();
        r.accept(open(id)).unwrap();
        let frame = r.accept(close(id, CloseStatus::Complete, 0, 0)).unwrap().unwrap();
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn out_of_order_chunk_drops_stream() {
        let id = Uuid::new_v4();
        let mut r = StreamReassembler::new();
        r.accept(open(id)).unwrap();
        let err = r.accept(chunk(id, 1, b"x")).unwrap_err();
        assert_eq!(
            err,
            ReassemblyError::OutOfOrder {
                stream_id: id,
                expected: 0,
                got: 1
            }
        );
        assert_eq!(
            r.accept(close(id, CloseStatus::Complete, 1, 1)),
            Err(ReassemblyError::UnknownStream(id))
        );
    }

    #[test]
    fn short_stream_fails_validation() {
        let id = Uuid::new_v4();
        let mut r = StreamReassembler::new();
        r.accept(open(id)).unwrap();
        r.accept(chunk(id, 0, b"abc")).unwrap();
        assert!(matches!(
            r.accept(close(id, CloseStatus::Complete, 2, 6)),
            Err(ReassemblyError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn drain_reports_unfinished_streams() {
        let id = Uuid::new_v4();
        let mut r = StreamReassembler::new();
        r.accept(open(id)).unwrap();
        assert_eq!(r.drain_incomplete(), vec![id]);
        assert_eq!(r.pending(), 0);
    }
}
