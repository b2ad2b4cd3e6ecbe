//! One conversational session per participant
//!
//! Each session runs as its own task owning its `ConversationState`. Tool
//! calls are dispatched concurrently; every call delivers exactly one output
//! back into the conversation, matched by call id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::engine::{
    ConversationItem, EngineCommand, EngineConnection, EngineEvent, EngineSession, RealtimeEngine,
    SessionRequest,
};
use super::state::{ConversationState, SessionState};
use crate::config::{RealtimeConfig, ToolsConfig};
use crate::tools::{FailureKind, ToolCall, ToolDispatcher, ToolFailure, ToolResult};
use crate::{Error, Result};

/// Extra time allowed on top of the teardown grace before a session task is
/// aborted outright
const LEAVE_SLACK: Duration = Duration::from_secs(1);

type DispatchOutcome = (String, std::result::Result<ToolResult, ToolFailure>);

/// Session behavior shared by every participant
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub instructions: String,
    /// Opening utterance seeded into every new session
    pub greeting: String,
    pub open_timeout: Duration,
    /// How long in-flight tool calls may still deliver after closing begins
    pub teardown_grace: Duration,
}

impl SessionSettings {
    #[must_use]
    pub fn from_config(realtime: &RealtimeConfig, tools: &ToolsConfig) -> Self {
        Self {
            instructions: realtime.instructions.clone(),
            greeting: realtime.greeting.clone(),
            open_timeout: realtime.open_timeout,
            teardown_grace: tools.teardown_grace,
        }
    }
}

/// Observer for one participant's session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    participant: String,
    session_id: Uuid,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    #[must_use]
    pub fn participant(&self) -> &str {
        &self.participant
    }

    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Wait until the session reaches `target`
    ///
    /// Returns the last observed state if the session task is gone first.
    pub async fn wait_for(&mut self, target: SessionState) -> SessionState {
        let seen = self.state.wait_for(|s| *s == target).await.map(|s| *s);
        seen.unwrap_or_else(|_| *self.state.borrow())
    }
}

struct SessionSlot {
    session_id: Uuid,
    state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Opens, drives and tears down conversational sessions
pub struct SessionCoordinator {
    engine: Arc<dyn RealtimeEngine>,
    dispatcher: Arc<ToolDispatcher>,
    settings: SessionSettings,
    phase: Mutex<SessionState>,
    sessions: AsyncMutex<HashMap<String, SessionSlot>>,
}

impl SessionCoordinator {
    #[must_use]
    pub fn new(
        engine: Arc<dyn RealtimeEngine>,
        dispatcher: Arc<ToolDispatcher>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            engine,
            dispatcher,
            settings,
            phase: Mutex::new(SessionState::Idle),
            sessions: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Coordinator-level state: `Idle` until started
    #[must_use]
    pub fn phase(&self) -> SessionState {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin accepting participants
    pub fn start(&self) {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *phase == SessionState::Idle {
            *phase = SessionState::AwaitingParticipant;
            tracing::info!("session coordinator awaiting participants");
        }
    }

    /// Open a session for a newly joined participant
    ///
    /// Connects to the engine, seeds the opening utterance and requests the
    /// first response. A failure here affects only this participant.
    ///
    /// # Errors
    ///
    /// Returns `NotStarted` before `start`, `AlreadyActive` if the
    /// participant has a live session, `SessionOpen` if the engine cannot be
    /// reached in time, or `Cancelled` if the participant left meanwhile
    pub async fn participant_joined(&self, participant: &str) -> Result<SessionHandle> {
        if self.phase() == SessionState::Idle {
            return Err(Error::NotStarted);
        }

        let session_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(SessionState::AwaitingParticipant);

        {
            let mut sessions = self.sessions.lock().await;
            if let Some(existing) = sessions.get(participant)
                && *existing.state.borrow() != SessionState::Closed
            {
                return Err(Error::AlreadyActive(participant.to_string()));
            }
            sessions.insert(
                participant.to_string(),
                SessionSlot {
                    session_id,
                    state: state_rx.clone(),
                    cancel: cancel.clone(),
                    task: None,
                },
            );
        }

        tracing::info!(participant, %session_id, "opening session");

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled(format!("session open for {participant}"))),
            result = tokio::time::timeout(self.settings.open_timeout, self.open(participant)) => {
                match result {
                    Ok(Ok(connection)) => Ok(connection),
                    Ok(Err(e)) => Err(Error::SessionOpen {
                        participant: participant.to_string(),
                        reason: e.to_string(),
                    }),
                    Err(_) => Err(Error::SessionOpen {
                        participant: participant.to_string(),
                        reason: format!("no session within {:?}", self.settings.open_timeout),
                    }),
                }
            }
        };

        let connection = match opened {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(participant, %session_id, error = %e, "session open failed");
                let _ = state_tx.send(SessionState::Closed);
                self.release_slot(participant, session_id).await;
                return Err(e);
            }
        };

        let _ = state_tx.send(SessionState::Active);
        let task = SessionTask {
            conversation: ConversationState::new(participant),
            session: connection.session,
            events: connection.events,
            dispatcher: Arc::clone(&self.dispatcher),
            state: state_tx,
            cancel: cancel.clone(),
            teardown_grace: self.settings.teardown_grace,
            in_flight: JoinSet::new(),
        };
        let handle = tokio::spawn(task.run());

        {
            let mut sessions = self.sessions.lock().await;
            match sessions.get_mut(participant) {
                Some(slot) if slot.session_id == session_id => slot.task = Some(handle),
                // participant left while the session was opening; the task
                // observes the cancellation and tears itself down
                _ => return Err(Error::Cancelled(format!("participant {participant} left"))),
            }
        }

        tracing::info!(participant, %session_id, "session active");
        Ok(SessionHandle {
            participant: participant.to_string(),
            session_id,
            state: state_rx,
        })
    }

    /// Tear down a participant's session
    ///
    /// Stops new tool dispatches immediately, lets in-flight calls deliver
    /// within the teardown grace, then closes the engine session. Bounded in
    /// time: a task that does not finish is aborted.
    ///
    /// # Errors
    ///
    /// Returns `UnknownParticipant` if there is no session
    pub async fn participant_left(&self, participant: &str) -> Result<SessionState> {
        let slot = self
            .sessions
            .lock()
            .await
            .remove(participant)
            .ok_or_else(|| Error::UnknownParticipant(participant.to_string()))?;

        tracing::info!(participant, session_id = %slot.session_id, "closing session");
        slot.cancel.cancel();

        let Some(mut task) = slot.task else {
            return Ok(SessionState::Closed);
        };

        let bound = self.settings.teardown_grace + LEAVE_SLACK;
        if tokio::time::timeout(bound, &mut task).await.is_err() {
            tracing::warn!(participant, "session teardown overran; aborting");
            task.abort();
            return Ok(SessionState::Closed);
        }

        let state = *slot.state.borrow();
        Ok(state)
    }

    /// Current state of a participant's session
    pub async fn state_of(&self, participant: &str) -> Option<SessionState> {
        self.sessions
            .lock()
            .await
            .get(participant)
            .map(|slot| *slot.state.borrow())
    }

    /// Participants with a session slot
    pub async fn participants(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    async fn open(&self, participant: &str) -> Result<EngineConnection> {
        let request = SessionRequest {
            participant: participant.to_string(),
            instructions: self.settings.instructions.clone(),
            tools: self.dispatcher.definitions(),
        };
        let mut connection = self.engine.connect(request).await?;

        let seeded = async {
            connection
                .session
                .send(EngineCommand::CreateItem(ConversationItem::AssistantMessage {
                    text: self.settings.greeting.clone(),
                }))
                .await?;
            connection.session.send(EngineCommand::CreateResponse).await
        }
        .await;

        if let Err(e) = seeded {
            let _ = connection.session.close().await;
            return Err(e);
        }
        Ok(connection)
    }

    async fn release_slot(&self, participant: &str, session_id: Uuid) {
        let mut sessions = self.sessions.lock().await;
        if sessions
            .get(participant)
            .is_some_and(|slot| slot.session_id == session_id)
        {
            sessions.remove(participant);
        }
    }
}

enum Step {
    Cancelled,
    Completed(std::result::Result<DispatchOutcome, JoinError>),
    Event(Option<EngineEvent>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    Disconnected,
    EngineClosed,
}

struct SessionTask {
    conversation: ConversationState,
    session: Box<dyn EngineSession>,
    events: tokio::sync::mpsc::Receiver<EngineEvent>,
    dispatcher: Arc<ToolDispatcher>,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
    teardown_grace: Duration,
    in_flight: JoinSet<DispatchOutcome>,
}

impl SessionTask {
    async fn run(mut self) {
        let ending = loop {
            let step = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Step::Cancelled,
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    Step::Completed(joined)
                }
                event = self.events.recv() => Step::Event(event),
            };

            match step {
                Step::Cancelled => break Ending::Disconnected,
                Step::Completed(joined) => self.deliver(joined).await,
                Step::Event(None | Some(EngineEvent::Closed)) => break Ending::EngineClosed,
                Step::Event(Some(event)) => self.handle_event(event).await,
            }
        };

        self.teardown(ending).await;
    }

    fn participant(&self) -> &str {
        &self.conversation.participant
    }

    async fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::ToolCallRequested {
                call_id,
                name,
                arguments,
            } => self.request_tool(call_id, name, &arguments).await,
            EngineEvent::UserTranscript { text } => {
                tracing::info!(participant = %self.participant(), transcript = %text, "participant said");
            }
            EngineEvent::ResponseDone { response_id } => {
                let turn = self.conversation.advance_turn();
                tracing::debug!(participant = %self.participant(), ?response_id, turn, "response done");
            }
            EngineEvent::Error { message } => {
                tracing::warn!(participant = %self.participant(), error = %message, "engine reported error");
            }
            EngineEvent::Closed => {}
        }
    }

    async fn request_tool(&mut self, call_id: String, name: String, raw_arguments: &str) {
        if !self.state.borrow().accepts_tool_calls() {
            tracing::debug!(participant = %self.participant(), %call_id, "ignoring tool call while closing");
            return;
        }

        let call = ToolCall {
            call_id: call_id.clone(),
            name: name.clone(),
            arguments: Value::Null,
            turn_id: self.conversation.turn_id,
        };

        let arguments = match parse_arguments(raw_arguments) {
            Ok(arguments) => arguments,
            Err(reason) => {
                let failure = ToolFailure {
                    call_id: call_id.clone(),
                    tool: name,
                    kind: FailureKind::InvalidArguments,
                    reason,
                };
                if self.conversation.track(call) {
                    self.deliver_outcome((call_id, Err(failure))).await;
                }
                return;
            }
        };
        let call = ToolCall { arguments, ..call };

        if !self.conversation.track(call.clone()) {
            tracing::warn!(participant = %self.participant(), %call_id, "duplicate tool call ignored");
            return;
        }

        tracing::info!(
            participant = %self.participant(),
            tool = %name,
            %call_id,
            turn = call.turn_id,
            "dispatching tool call"
        );
        let dispatcher = Arc::clone(&self.dispatcher);
        self.in_flight.spawn(async move {
            let outcome = dispatcher.dispatch(call).await;
            (call_id, outcome)
        });
    }

    async fn deliver(&mut self, joined: std::result::Result<DispatchOutcome, JoinError>) {
        match joined {
            Ok(outcome) => self.deliver_outcome(outcome).await,
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                tracing::error!(participant = %self.participant(), error = %e, "tool dispatch task failed");
            }
        }
    }

    async fn deliver_outcome(&mut self, (call_id, outcome): DispatchOutcome) {
        if self.conversation.complete(&call_id).is_none() {
            tracing::debug!(participant = %self.participant(), %call_id, "discarding stale tool result");
            return;
        }

        let item = match outcome {
            Ok(result) => ConversationItem::ToolOutput {
                call_id,
                output: result.output,
                is_error: false,
            },
            Err(failure) => ConversationItem::ToolOutput {
                call_id,
                output: failure.to_model_output(),
                is_error: true,
            },
        };

        if let Err(e) = self.session.send(EngineCommand::CreateItem(item)).await {
            tracing::warn!(participant = %self.participant(), error = %e, "failed to deliver tool output");
            return;
        }

        // one response per batch of calls, once the last one is answered
        if self.conversation.pending.is_empty()
            && *self.state.borrow() == SessionState::Active
            && let Err(e) = self.session.send(EngineCommand::CreateResponse).await
        {
            tracing::warn!(participant = %self.participant(), error = %e, "failed to request response");
        }
    }

    async fn teardown(mut self, ending: Ending) {
        self.state.send_replace(SessionState::Closing);
        tracing::debug!(
            participant = %self.participant(),
            ?ending,
            in_flight = self.in_flight.len(),
            "session closing"
        );

        if ending == Ending::Disconnected && !self.in_flight.is_empty() {
            let deadline = Instant::now() + self.teardown_grace;
            while let Ok(Some(joined)) =
                tokio::time::timeout_at(deadline, self.in_flight.join_next()).await
            {
                self.deliver(joined).await;
            }
        }

        self.in_flight.abort_all();
        if !self.conversation.pending.is_empty() {
            tracing::info!(
                participant = %self.participant(),
                discarded = self.conversation.pending.len(),
                "discarding unfinished tool calls"
            );
            self.conversation.pending.clear();
        }

        if let Err(e) = self.session.close().await {
            tracing::debug!(participant = %self.participant(), error = %e, "engine close failed");
        }
        self.state.send_replace(SessionState::Closed);
        tracing::info!(
            participant = %self.participant(),
            session_id = %self.conversation.session_id,
            "session closed"
        );
    }
}

/// Parse engine-supplied argument text; empty text means no arguments
fn parse_arguments(raw: &str) -> std::result::Result<Value, String> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(raw).map_err(|e| format!("arguments are not valid JSON: {e}"))
}
