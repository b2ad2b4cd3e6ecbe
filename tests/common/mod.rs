//! Shared test utilities

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use sightline_gateway::session::{
    EngineCommand, EngineConnection, EngineEvent, EngineSession, RealtimeEngine, SessionRequest,
};
use sightline_gateway::transport::{RoutedPacket, StreamLink, StreamPacket};
use sightline_gateway::{Error, Result};
use tokio::sync::{Mutex, mpsc};

/// Realtime engine double that records commands and lets tests inject events
#[derive(Default)]
pub struct MockEngine {
    commands: Arc<Mutex<Vec<(String, EngineCommand)>>>,
    events: Mutex<HashMap<String, mpsc::Sender<EngineEvent>>>,
    requests: Mutex<Vec<SessionRequest>>,
    closes: Arc<AtomicUsize>,
    failing: Mutex<HashSet<String>>,
}

impl MockEngine {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `connect` fail for `participant`
    pub async fn fail_for(&self, participant: &str) {
        self.failing.lock().await.insert(participant.to_string());
    }

    /// Commands sent on behalf of `participant`, in order
    pub async fn commands_for(&self, participant: &str) -> Vec<EngineCommand> {
        self.commands
            .lock()
            .await
            .iter()
            .filter(|(p, _)| p == participant)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub async fn requests(&self) -> Vec<SessionRequest> {
        self.requests.lock().await.clone()
    }

    #[must_use]
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Push an engine event into `participant`'s session
    pub async fn emit(&self, participant: &str, event: EngineEvent) {
        let tx = self
            .events
            .lock()
            .await
            .get(participant)
            .cloned()
            .expect("no session for participant");
        tx.send(event).await.expect("session event loop gone");
    }

    /// Push an event if the session is still listening
    pub async fn try_emit(&self, participant: &str, event: EngineEvent) -> bool {
        let tx = self.events.lock().await.get(participant).cloned();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Wait until `participant` has received `count` commands matching `pred`
    pub async fn wait_for_commands<F>(&self, participant: &str, count: usize, pred: F) -> Vec<EngineCommand>
    where
        F: Fn(&EngineCommand) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let matching: Vec<EngineCommand> = self
                    .commands_for(participant)
                    .await
                    .into_iter()
                    .filter(|c| pred(c))
                    .collect();
                if matching.len() >= count {
                    return matching;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for engine commands")
    }
}

#[async_trait]
impl RealtimeEngine for MockEngine {
    async fn connect(&self, request: SessionRequest) -> Result<EngineConnection> {
        if self.failing.lock().await.contains(&request.participant) {
            return Err(Error::Engine("connection refused".into()));
        }

        let (tx, rx) = mpsc::channel(16);
        self.events
            .lock()
            .await
            .insert(request.participant.clone(), tx);
        let participant = request.participant.clone();
        self.requests.lock().await.push(request);

        Ok(EngineConnection {
            session: Box::new(MockSession {
                participant,
                commands: Arc::clone(&self.commands),
                closes: Arc::clone(&self.closes),
                closed: false,
            }),
            events: rx,
        })
    }
}

struct MockSession {
    participant: String,
    commands: Arc<Mutex<Vec<(String, EngineCommand)>>>,
    closes: Arc<AtomicUsize>,
    closed: bool,
}

#[async_trait]
impl EngineSession for MockSession {
    async fn send(&mut self, command: EngineCommand) -> Result<()> {
        if self.closed {
            return Err(Error::Engine("session closed".into()));
        }
        self.commands
            .lock()
            .await
            .push((self.participant.clone(), command));
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Stream link that records packets, optionally failing or stalling
#[derive(Default)]
pub struct RecordingLink {
    packets: Mutex<Vec<RoutedPacket>>,
    sends: AtomicUsize,
    chunks: AtomicUsize,
    /// Zero-based send index that fails
    fail_on_send: Option<usize>,
    /// Delay applied to every chunk send
    chunk_delay: Option<Duration>,
    /// Number of leading chunk sends that never complete
    stalled_chunks: usize,
    /// `Close` sends never complete
    stalled_closes: bool,
}

impl RecordingLink {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Link whose `n`th send (zero-based) fails
    #[must_use]
    pub fn with_fail_on_send(n: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_on_send: Some(n),
            ..Self::default()
        })
    }

    /// Link that delays every chunk by `delay`
    #[must_use]
    pub fn with_chunk_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            chunk_delay: Some(delay),
            ..Self::default()
        })
    }

    /// Link whose first `n` chunk sends hang
    #[must_use]
    pub fn with_stalled_chunks(n: usize) -> Arc<Self> {
        Arc::new(Self {
            stalled_chunks: n,
            ..Self::default()
        })
    }

    /// Link that delays chunks by `delay` and never completes a `Close`
    #[must_use]
    pub fn with_stalled_closes(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            chunk_delay: Some(delay),
            stalled_closes: true,
            ..Self::default()
        })
    }

    pub async fn packets(&self) -> Vec<StreamPacket> {
        self.packets
            .lock()
            .await
            .iter()
            .map(|r| r.packet.clone())
            .collect()
    }

    pub async fn packets_for(&self, participant: &str) -> Vec<StreamPacket> {
        self.packets
            .lock()
            .await
            .iter()
            .filter(|r| r.participant == participant)
            .map(|r| r.packet.clone())
            .collect()
    }
}

#[async_trait]
impl StreamLink for RecordingLink {
    async fn send(&self, participant: &str, packet: StreamPacket) -> Result<()> {
        let n = self.sends.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_send == Some(n) {
            return Err(Error::Transport("link dropped".into()));
        }
        if self.stalled_closes && matches!(packet, StreamPacket::Close { .. }) {
            std::future::pending::<()>().await;
        }
        if let StreamPacket::Chunk { .. } = &packet {
            if self.chunks.fetch_add(1, Ordering::SeqCst) < self.stalled_chunks {
                std::future::pending::<()>().await;
            }
            if let Some(delay) = self.chunk_delay {
                tokio::time::sleep(delay).await;
            }
        }
        self.packets.lock().await.push(RoutedPacket {
            participant: participant.to_string(),
            packet,
        });
        Ok(())
    }
}

/// Horizontal gradient scene; `mirrored` flips it left-to-right
#[must_use]
pub fn scene(width: u32, height: u32, mirrored: bool) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let x = if mirrored { width - 1 - x } else { x };
        let v = u8::try_from((x * 255) / (width - 1)).unwrap();
        let g = u8::try_from((y * 255) / (height - 1)).unwrap() / 4;
        Rgb([v, v.saturating_sub(g), v / 2])
    })
}

/// Encode `image` as JPEG at `quality`
#[must_use]
pub fn jpeg(image: &RgbImage, quality: u8) -> Vec<u8> {
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(image)
        .unwrap();
    out
}

/// Encode `image` as PNG
#[must_use]
pub fn png(image: &RgbImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}
