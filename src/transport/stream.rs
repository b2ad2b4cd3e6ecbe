//! Topic-scoped stream sessions
//!
//! At most one stream is open per (participant, topic) pair. A second `open`
//! waits for the first stream to close; `try_open` rejects instead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::chunking::split_chunks;
use super::link::StreamLink;
use super::packet::{CloseStatus, StreamPacket};
use crate::config::TransportConfig;
use crate::{Error, Result};

type TopicKey = (String, String);

/// Lifecycle of a stream session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Opened,
    Writing,
    Closed(CloseStatus),
}

/// Summary of a closed stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamReceipt {
    pub stream_id: Uuid,
    pub status: CloseStatus,
    pub chunks: u32,
    pub bytes: usize,
}

/// Opens topic-scoped streams over a packet link
pub struct StreamTransport {
    link: Arc<dyn StreamLink>,
    chunk_size: usize,
    frame_timeout: Duration,
    topics: Mutex<HashMap<TopicKey, Arc<AsyncMutex<()>>>>,
}

impl StreamTransport {
    /// Create a transport
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the chunk size is zero
    pub fn new(link: Arc<dyn StreamLink>, config: &TransportConfig) -> Result<Self> {
        if config.chunk_size == 0 {
            return Err(Error::Config("chunk size must be greater than zero".to_string()));
        }
        Ok(Self {
            link,
            chunk_size: config.chunk_size,
            frame_timeout: config.frame_timeout,
            topics: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Open a stream, waiting for any open stream on the same topic to close
    ///
    /// # Errors
    ///
    /// Returns error if the `Open` packet cannot be sent
    pub async fn open(&self, participant: &str, topic: &str) -> Result<StreamWriter> {
        let permit = self.topic_lock(participant, topic).lock_owned().await;
        self.start(permit, participant, topic).await
    }

    /// Open a stream, failing fast if the topic is busy
    ///
    /// # Errors
    ///
    /// Returns `Error::TopicBusy` if a stream is already open for the pair,
    /// or an error if the `Open` packet cannot be sent
    pub async fn try_open(&self, participant: &str, topic: &str) -> Result<StreamWriter> {
        let permit = self
            .topic_lock(participant, topic)
            .try_lock_owned()
            .map_err(|_| Error::TopicBusy {
                participant: participant.to_string(),
                topic: topic.to_string(),
            })?;
        self.start(permit, participant, topic).await
    }

    /// Send `payload` as one complete stream
    ///
    /// The stream is always closed: `complete` when every chunk was written,
    /// `aborted` on a write failure or cancellation. The whole operation is
    /// bounded by the configured frame timeout.
    ///
    /// # Errors
    ///
    /// Returns error if any step fails, the timeout elapses, or `cancel` fires
    pub async fn send_frame(
        &self,
        participant: &str,
        topic: &str,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<StreamReceipt> {
        let transmission = async {
            let mut writer = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(Error::Cancelled(format!("stream open for {participant}/{topic}")));
                }
                writer = self.open(participant, topic) => writer?,
            };

            let written = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    Err(Error::Cancelled(format!("stream write for {participant}/{topic}")))
                }
                result = writer.write(payload) => result,
            };

            match written {
                Ok(()) => writer.close(CloseStatus::Complete).await,
                Err(e) => {
                    if let Err(close_err) = writer.close(CloseStatus::Aborted).await {
                        tracing::warn!(
                            participant,
                            topic,
                            error = %close_err,
                            "failed to signal stream abort"
                        );
                    }
                    Err(e)
                }
            }
        };

        // Dropping the transmission on timeout drops the writer, which
        // signals the abort in the background.
        tokio::time::timeout(self.frame_timeout, transmission)
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "frame transmission for {participant}/{topic} exceeded {:?}",
                    self.frame_timeout
                ))
            })?
    }

    /// Drop topic locks held for a departed participant
    pub fn forget_participant(&self, participant: &str) {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(p, _), _| p != participant);
    }

    fn topic_lock(&self, participant: &str, topic: &str) -> Arc<AsyncMutex<()>> {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            topics
                .entry((participant.to_string(), topic.to_string()))
                .or_default(),
        )
    }

    async fn start(
        &self,
        permit: OwnedMutexGuard<()>,
        participant: &str,
        topic: &str,
    ) -> Result<StreamWriter> {
        let stream_id = Uuid::new_v4();
        self.link
            .send(
                participant,
                StreamPacket::Open {
                    stream_id,
                    topic: topic.to_string(),
                },
            )
            .await?;

        tracing::debug!(participant, topic, %stream_id, "stream opened");

        Ok(StreamWriter {
            stream_id,
            participant: participant.to_string(),
            topic: topic.to_string(),
            link: Arc::clone(&self.link),
            chunk_size: self.chunk_size,
            chunks: 0,
            bytes: 0,
            state: StreamState::Opened,
            permit: Some(permit),
        })
    }
}

/// Handle to one open stream
///
/// Holds the topic lock until dropped. Dropping a writer that was never
/// closed sends an `aborted` close in the background and keeps the topic
/// locked until that close is out.
pub struct StreamWriter {
    stream_id: Uuid,
    participant: String,
    topic: String,
    link: Arc<dyn StreamLink>,
    chunk_size: usize,
    chunks: u32,
    bytes: usize,
    state: StreamState,
    /// Topic lock; released only after the stream's `Close` is sent
    permit: Option<OwnedMutexGuard<()>>,
}

impl StreamWriter {
    #[must_use]
    pub const fn stream_id(&self) -> Uuid {
        self.stream_id
    }

    #[must_use]
    pub const fn state(&self) -> StreamState {
        self.state
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Write `bytes` as ordered chunks
    ///
    /// # Errors
    ///
    /// Returns error if the stream is closed or a chunk send fails; the
    /// caller must then close the stream as aborted
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if let StreamState::Closed(_) = self.state {
            return Err(Error::Transport(format!("stream {} already closed", self.stream_id)));
        }
        self.state = StreamState::Writing;

        for chunk in split_chunks(bytes, self.chunk_size)? {
            let packet = StreamPacket::Chunk {
                stream_id: self.stream_id,
                seq: self.chunks,
                data: chunk.to_vec(),
            };
            self.link.send(&self.participant, packet).await.map_err(|e| {
                Error::Transport(format!(
                    "chunk {} of stream {} failed: {e}",
                    self.chunks, self.stream_id
                ))
            })?;
            self.chunks += 1;
            self.bytes += chunk.len();
        }
        Ok(())
    }

    /// Close the stream with `status`
    ///
    /// # Errors
    ///
    /// Returns error if the `Close` packet cannot be sent
    pub async fn close(mut self, status: CloseStatus) -> Result<StreamReceipt> {
        self.state = StreamState::Closed(status);
        let receipt = StreamReceipt {
            stream_id: self.stream_id,
            status,
            chunks: self.chunks,
            bytes: self.bytes,
        };

        self.link
            .send(&self.participant, self.close_packet(status))
            .await?;

        tracing::debug!(
            participant = %self.participant,
            topic = %self.topic,
            stream_id = %self.stream_id,
            ?status,
            chunks = self.chunks,
            bytes = self.bytes,
            "stream closed"
        );
        Ok(receipt)
    }

    fn close_packet(&self, status: CloseStatus) -> StreamPacket {
        StreamPacket::Close {
            stream_id: self.stream_id,
            status,
            chunks: self.chunks,
            bytes: self.bytes,
        }
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        if let StreamState::Closed(_) = self.state {
            return;
        }

        let link = Arc::clone(&self.link);
        let participant = self.participant.clone();
        let packet = self.close_packet(CloseStatus::Aborted);
        let stream_id = self.stream_id;
        let permit = self.permit.take();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = link.send(&participant, packet).await {
                        tracing::warn!(%stream_id, error = %e, "failed to signal stream abort");
                    }
                    drop(permit);
                });
            }
            Err(_) => {
                tracing::warn!(%stream_id, "stream dropped outside runtime; abort not signalled");
            }
        }
    }
}
