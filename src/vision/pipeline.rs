//! Digest → gate → transmit pipeline for one participant

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::digest::{Digest, FrameHasher};
use super::frame::Frame;
use super::gate::{ChangeGate, DropReason, GateDecision};
use crate::transport::StreamTransport;
use crate::{Error, Result};

/// A frame accepted by the gate, waiting to be streamed
#[derive(Debug)]
pub struct QueuedFrame {
    pub frame: Frame,
    pub digest: Digest,
}

/// Counters for one participant's pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub evaluated: u64,
    pub transmitted: u64,
    pub dropped: u64,
    pub undigestable: u64,
    pub failed: u64,
    pub backlog: usize,
}

#[derive(Debug, Default)]
struct Counters {
    evaluated: AtomicU64,
    transmitted: AtomicU64,
    dropped: AtomicU64,
    undigestable: AtomicU64,
    failed: AtomicU64,
    backlog: AtomicUsize,
}

/// Gate-side half of the pipeline
///
/// Frames judged novel are queued in a bounded backlog; when the backlog is
/// full, `submit` waits instead of discarding an accepted frame.
pub struct FramePipeline {
    participant: String,
    hasher: Arc<dyn FrameHasher>,
    gate: Arc<ChangeGate>,
    queue: mpsc::Sender<QueuedFrame>,
    counters: Arc<Counters>,
}

/// Transmit-side half of the pipeline; drains the backlog onto a stream
pub struct FrameTransmitter {
    participant: String,
    topic: String,
    gate: Arc<ChangeGate>,
    queue: mpsc::Receiver<QueuedFrame>,
    counters: Arc<Counters>,
}

impl FramePipeline {
    /// Build a pipeline and its transmitter
    #[must_use]
    pub fn new(
        participant: impl Into<String>,
        topic: impl Into<String>,
        hasher: Arc<dyn FrameHasher>,
        gate: Arc<ChangeGate>,
        max_backlog: usize,
    ) -> (Self, FrameTransmitter) {
        let participant = participant.into();
        let (tx, rx) = mpsc::channel(max_backlog.max(1));
        let counters = Arc::new(Counters::default());

        let transmitter = FrameTransmitter {
            participant: participant.clone(),
            topic: topic.into(),
            gate: Arc::clone(&gate),
            queue: rx,
            counters: Arc::clone(&counters),
        };
        let pipeline = Self {
            participant,
            hasher,
            gate,
            queue: tx,
            counters,
        };
        (pipeline, transmitter)
    }

    #[must_use]
    pub fn participant(&self) -> &str {
        &self.participant
    }

    #[must_use]
    pub fn gate(&self) -> &ChangeGate {
        &self.gate
    }

    /// Digest and gate one frame, queueing it for transmission if novel
    ///
    /// # Errors
    ///
    /// Returns `Error::Undigestable` if the payload cannot be digested, or a
    /// transport error if the transmitter has stopped
    pub async fn submit(&self, frame: Frame) -> Result<GateDecision> {
        let hasher = Arc::clone(&self.hasher);
        let payload = frame.payload.clone();
        let captured_at = frame.captured_at;
        let outcome = tokio::task::spawn_blocking(move || hasher.digest(&payload, captured_at))
            .await
            .map_err(|e| Error::Frame(format!("digest task failed: {e}")))?;

        self.counters.evaluated.fetch_add(1, Ordering::Relaxed);
        let decision = self.gate.evaluate_outcome(&outcome);

        match decision {
            GateDecision::Drop(DropReason::Undigestable) => {
                self.counters.undigestable.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(participant = %self.participant, "dropping undigestable frame");
                // evaluate_outcome only drops as undigestable on Err
                return outcome.map(|_| decision);
            }
            GateDecision::Drop(DropReason::Redundant { similarity }) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(participant = %self.participant, similarity, "dropping redundant frame");
                return Ok(decision);
            }
            GateDecision::Transmit { similarity } => {
                tracing::debug!(participant = %self.participant, ?similarity, "frame accepted");
            }
        }

        let digest = outcome?;
        self.counters.backlog.fetch_add(1, Ordering::Relaxed);
        if self.queue.send(QueuedFrame { frame, digest }).await.is_err() {
            self.counters.backlog.fetch_sub(1, Ordering::Relaxed);
            self.gate.revoke(&digest);
            return Err(Error::Transport(format!(
                "transmitter for {} has stopped",
                self.participant
            )));
        }
        Ok(decision)
    }

    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        PipelineStats {
            evaluated: c.evaluated.load(Ordering::Relaxed),
            transmitted: c.transmitted.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            undigestable: c.undigestable.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            backlog: c.backlog.load(Ordering::Relaxed),
        }
    }
}

impl FrameTransmitter {
    /// Stream queued frames until cancelled or the pipeline is dropped
    ///
    /// A failed transmission revokes the gate baseline so the next frame is
    /// compared against what the receiver last got. Frames still queued at
    /// shutdown are discarded.
    pub async fn run(mut self, transport: Arc<StreamTransport>, cancel: CancellationToken) {
        loop {
            let queued = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                next = self.queue.recv() => match next {
                    Some(queued) => queued,
                    None => break,
                },
            };
            self.counters.backlog.fetch_sub(1, Ordering::Relaxed);

            match transport
                .send_frame(&self.participant, &self.topic, &queued.frame.payload, &cancel)
                .await
            {
                Ok(receipt) => {
                    self.counters.transmitted.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        participant = %self.participant,
                        stream_id = %receipt.stream_id,
                        chunks = receipt.chunks,
                        bytes = receipt.bytes,
                        "frame transmitted"
                    );
                }
                Err(e) => {
                    self.gate.revoke(&queued.digest);
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(participant = %self.participant, error = %e, "frame transmission failed");
                }
            }
        }

        self.queue.close();
        let mut discarded = 0usize;
        while self.queue.try_recv().is_ok() {
            self.counters.backlog.fetch_sub(1, Ordering::Relaxed);
            discarded += 1;
        }
        tracing::debug!(participant = %self.participant, discarded, "transmitter stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use image::{Rgb, RgbImage};

    use super::*;
    use crate::config::TransportConfig;
    use crate::transport::{StreamLink, StreamPacket};
    use crate::vision::{RawFrame, hasher_for, HasherKind};

    struct NullLink;

    #[async_trait]
    impl StreamLink for NullLink {
        async fn send(&self, _participant: &str, _packet: StreamPacket) -> Result<()> {
            Ok(())
        }
    }

    fn frame(shade: u8) -> Frame {
        let pixels = RgbImage::from_fn(32, 32, |x, _| {
            let v = u8::try_from(x * 8).unwrap().saturating_add(shade);
            Rgb([v, v, v])
        });
        Frame::encode(&RawFrame::new(pixels), 90).unwrap()
    }

    fn pipeline(max_backlog: usize) -> (FramePipeline, FrameTransmitter) {
        FramePipeline::new(
            "alice",
            "frames",
            hasher_for(HasherKind::Difference),
            Arc::new(ChangeGate::new(0.9)),
            max_backlog,
        )
    }

    #[tokio::test]
    async fn redundant_frames_are_counted_not_queued() {
        let (pipeline, _transmitter) = pipeline(4);

        assert!(pipeline.submit(frame(0)).await.unwrap().is_transmit());
        assert!(!pipeline.submit(frame(0)).await.unwrap().is_transmit());

        let stats = pipeline.stats();
        assert_eq!(stats.evaluated, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.backlog, 1);
    }

    #[tokio::test]
    async fn undigestable_payload_is_reported() {
        let (pipeline, _transmitter) = pipeline(4);
        let result = pipeline.submit(Frame::from_encoded(Vec::new(), Utc::now())).await;
        assert!(matches!(result, Err(Error::Undigestable(_))));
        assert_eq!(pipeline.stats().undigestable, 1);
        assert!(pipeline.gate().baseline().is_none());
    }

    #[tokio::test]
    async fn stopped_transmitter_revokes_baseline() {
        let (pipeline, transmitter) = pipeline(4);
        drop(transmitter);

        let result = pipeline.submit(frame(0)).await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert!(pipeline.gate().baseline().is_none());
        assert_eq!(pipeline.stats().backlog, 0);
    }

    #[tokio::test]
    async fn transmitter_drains_backlog() {
        let (pipeline, transmitter) = pipeline(4);
        let transport = Arc::new(
            StreamTransport::new(
                Arc::new(NullLink),
                &TransportConfig {
                    chunk_size: 1024,
                    frame_timeout: Duration::from_secs(1),
                },
            )
            .unwrap(),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(transmitter.run(transport, cancel.clone()));

        pipeline.submit(frame(0)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while pipeline.stats().transmitted < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(pipeline.stats().backlog, 0);
    }
}
