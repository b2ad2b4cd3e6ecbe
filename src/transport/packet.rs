//! Stream wire packets

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseStatus {
    /// Every chunk was written; the payload is whole
    Complete,
    /// Writing stopped early; the payload must be discarded
    Aborted,
}

/// One message on a topic-scoped stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamPacket {
    /// Start of a stream
    Open { stream_id: Uuid, topic: String },
    /// Next slice of the payload
    Chunk {
        stream_id: Uuid,
        seq: u32,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// End of a stream, with totals for validation
    Close {
        stream_id: Uuid,
        status: CloseStatus,
        chunks: u32,
        bytes: usize,
    },
}

impl StreamPacket {
    #[must_use]
    pub const fn stream_id(&self) -> Uuid {
        match self {
            Self::Open { stream_id, .. }
            | Self::Chunk { stream_id, .. }
            | Self::Close { stream_id, .. } => *stream_id,
        }
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_wire_format() {
        let id = Uuid::nil();
        let packet = StreamPacket::Chunk {
            stream_id: id,
            seq: 3,
            data: vec![0, 1, 2, 255],
        };
        let json = serde_json::to_value(&packet).unwrap();
        assert_eq!(json["type"], "chunk");
        assert_eq!(json["seq"], 3);
        assert_eq!(json["data"], "AAEC/w==");

        let back: StreamPacket = serde_json::from_value(json).unwrap();
        assert_eq!(back, packet);
    }

    #[test]
    fn close_wire_format() {
        let packet = StreamPacket::Close {
            stream_id: Uuid::nil(),
            status: CloseStatus::Aborted,
            chunks: 2,
            bytes: 20,
        };
        let json = serde_json::to_value(&packet).unwrap();
        assert_eq!(json["type"], "close");
        assert_eq!(json["status"], "aborted");
    }

    #[test]
    fn rejects_bad_base64() {
        let raw = r#"{"type":"chunk","stream_id":"00000000-0000-0000-0000-000000000000","seq":0,"data":"!!"}"#;
        assert!(serde_json::from_str::<StreamPacket>(raw).is_err());
    }
}
