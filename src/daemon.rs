//! Daemon - ties the frame pipeline and the conversational session together
//!
//! Each participant gets two independent flows: frames (sampler → gate →
//! transmitter) and a conversational session. They share only the
//! participant id, and leaving stops both through the same cancellation path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::session::{
    RealtimeEngine, SessionCoordinator, SessionHandle, SessionSettings, SessionState,
};
use crate::tools::{self, ToolDispatcher};
use crate::transport::{StreamLink, StreamTransport};
use crate::vision::{
    ChangeGate, Frame, FrameHasher, FramePipeline, FrameSampler, FrameSource, GateDecision,
    HttpSnapshotSource, PipelineStats, SamplerReport, hasher_for,
};
use crate::{Config, Error, Result};

/// Extra time allowed for frame tasks to wind down after cancellation
const STOP_SLACK: Duration = Duration::from_secs(1);

/// Snapshot of one participant
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantStatus {
    pub participant: String,
    pub session: Option<SessionState>,
    pub frames: Option<PipelineStats>,
    pub sampling: bool,
}

struct ParticipantRuntime {
    pipeline: Arc<FramePipeline>,
    cancel: CancellationToken,
    transmitter: JoinHandle<()>,
    sampler: Option<JoinHandle<SamplerReport>>,
}

/// The Sightline daemon
pub struct Daemon {
    config: Arc<Config>,
    coordinator: SessionCoordinator,
    transport: Arc<StreamTransport>,
    hasher: Arc<dyn FrameHasher>,
    participants: Mutex<HashMap<String, ParticipantRuntime>>,
}

impl Daemon {
    /// Create a daemon with the built-in tools
    ///
    /// # Errors
    ///
    /// Returns error if the tools or transport cannot be initialized
    pub fn new(
        config: Config,
        engine: Arc<dyn RealtimeEngine>,
        link: Arc<dyn StreamLink>,
    ) -> Result<Self> {
        let dispatcher = tools::default_dispatcher(&config.tools)?;
        Self::with_dispatcher(config, engine, link, dispatcher)
    }

    /// Create a daemon with a custom tool dispatcher
    ///
    /// # Errors
    ///
    /// Returns error if the transport cannot be initialized
    pub fn with_dispatcher(
        config: Config,
        engine: Arc<dyn RealtimeEngine>,
        link: Arc<dyn StreamLink>,
        dispatcher: Arc<ToolDispatcher>,
    ) -> Result<Self> {
        let transport = Arc::new(StreamTransport::new(link, &config.transport)?);
        let coordinator = SessionCoordinator::new(
            engine,
            dispatcher,
            SessionSettings::from_config(&config.realtime, &config.tools),
        );
        coordinator.start();

        tracing::info!(
            hasher = %config.frames.hasher,
            threshold = config.frames.similarity_threshold,
            chunk_size = config.transport.chunk_size,
            "daemon initialized"
        );

        Ok(Self {
            hasher: hasher_for(config.frames.hasher),
            config: Arc::new(config),
            coordinator,
            transport,
            participants: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    /// Join a participant, sampling the configured snapshot URL if any
    ///
    /// # Errors
    ///
    /// Returns error if the snapshot source or the session cannot be set up
    pub async fn join(&self, participant: &str) -> Result<SessionHandle> {
        let source = match &self.config.frames.snapshot_url {
            Some(url) => Some(Box::new(HttpSnapshotSource::new(
                url.clone(),
                self.config.frames.capture_timeout,
            )?) as Box<dyn FrameSource>),
            None => None,
        };
        self.join_with_source(participant, source).await
    }

    /// Join a participant with an explicit frame source
    ///
    /// Without a source, frames arrive only through [`Daemon::submit_frame`].
    ///
    /// # Errors
    ///
    /// Returns error if the conversational session cannot be opened
    pub async fn join_with_source(
        &self,
        participant: &str,
        source: Option<Box<dyn FrameSource>>,
    ) -> Result<SessionHandle> {
        let handle = self.coordinator.participant_joined(participant).await?;

        let frames = &self.config.frames;
        let (pipeline, transmitter) = FramePipeline::new(
            participant,
            frames.topic.clone(),
            Arc::clone(&self.hasher),
            Arc::new(ChangeGate::new(frames.similarity_threshold)),
            frames.max_backlog,
        );
        let pipeline = Arc::new(pipeline);
        let cancel = CancellationToken::new();

        let transmitter = tokio::spawn(transmitter.run(Arc::clone(&self.transport), cancel.clone()));
        let sampler = source.map(|source| {
            let sampler = FrameSampler::new(source, Arc::clone(&pipeline), frames);
            tokio::spawn(sampler.run(cancel.clone()))
        });

        let runtime = ParticipantRuntime {
            pipeline,
            cancel,
            transmitter,
            sampler,
        };

        // a previous frame flow can outlive a session the engine closed
        let replaced = self
            .participants
            .lock()
            .await
            .insert(participant.to_string(), runtime);
        if let Some(stale) = replaced {
            tracing::debug!(participant, "replacing stale frame flow");
            self.stop_frames(participant, stale).await;
        }

        tracing::info!(participant, "participant joined");
        Ok(handle)
    }

    /// Disconnect a participant
    ///
    /// Stops the frame flow and closes the session concurrently; the session
    /// stops taking tool calls as soon as the leave begins.
    ///
    /// # Errors
    ///
    /// Returns `UnknownParticipant` if the participant never joined
    pub async fn leave(&self, participant: &str) -> Result<SessionState> {
        let runtime = self.participants.lock().await.remove(participant);
        let had_frames = runtime.is_some();

        let frames = async {
            if let Some(runtime) = runtime {
                self.stop_frames(participant, runtime).await;
            }
            self.transport.forget_participant(participant);
        };
        let ((), left) = tokio::join!(frames, self.coordinator.participant_left(participant));

        let state = match left {
            Ok(state) => state,
            Err(Error::UnknownParticipant(_)) if had_frames => SessionState::Closed,
            Err(e) => return Err(e),
        };

        tracing::info!(participant, %state, "participant left");
        Ok(state)
    }

    /// Feed an already-encoded frame into a participant's pipeline
    ///
    /// # Errors
    ///
    /// Returns `UnknownParticipant` if the participant has no frame flow,
    /// `Undigestable` if the payload is not an image
    pub async fn submit_frame(&self, participant: &str, payload: Vec<u8>) -> Result<GateDecision> {
        let pipeline = self
            .participants
            .lock()
            .await
            .get(participant)
            .map(|runtime| Arc::clone(&runtime.pipeline))
            .ok_or_else(|| Error::UnknownParticipant(participant.to_string()))?;

        pipeline.submit(Frame::from_encoded(payload, Utc::now())).await
    }

    /// Status of one participant, if known
    pub async fn status(&self, participant: &str) -> Option<ParticipantStatus> {
        let session = self.coordinator.state_of(participant).await;
        let participants = self.participants.lock().await;
        let runtime = participants.get(participant);
        if session.is_none() && runtime.is_none() {
            return None;
        }

        Some(ParticipantStatus {
            participant: participant.to_string(),
            session,
            frames: runtime.map(|r| r.pipeline.stats()),
            sampling: runtime
                .and_then(|r| r.sampler.as_ref())
                .is_some_and(|s| !s.is_finished()),
        })
    }

    /// Disconnect every participant
    pub async fn shutdown(&self) {
        let mut everyone = self.coordinator.participants().await;
        everyone.extend(self.participants.lock().await.keys().cloned());
        everyone.sort();
        everyone.dedup();

        tracing::info!(participants = everyone.len(), "shutting down");
        for participant in everyone {
            if let Err(e) = self.leave(&participant).await {
                tracing::warn!(participant = %participant, error = %e, "leave during shutdown failed");
            }
        }
    }

    async fn stop_frames(&self, participant: &str, runtime: ParticipantRuntime) {
        runtime.cancel.cancel();
        let bound = self.config.transport.frame_timeout + STOP_SLACK;

        if let Some(mut sampler) = runtime.sampler {
            match tokio::time::timeout(bound, &mut sampler).await {
                Ok(Ok(report)) => {
                    tracing::debug!(participant, ticks = report.ticks, failures = report.failures, "sampler stopped");
                }
                Ok(Err(e)) => tracing::warn!(participant, error = %e, "sampler task failed"),
                Err(_) => {
                    tracing::warn!(participant, "sampler did not stop in time; aborting");
                    sampler.abort();
                }
            }
        }

        let mut transmitter = runtime.transmitter;
        if tokio::time::timeout(bound, &mut transmitter).await.is_err() {
            tracing::warn!(participant, "transmitter did not stop in time; aborting");
            transmitter.abort();
        }
    }
}
