//! Realtime speech model over WebSocket
//!
//! Speaks the realtime event protocol: `session.update` on connect,
//! `conversation.item.create` / `response.create` as commands, and a small
//! subset of server events mapped to [`EngineEvent`].

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use url::Url;

use super::engine::{
    ConversationItem, EngineCommand, EngineConnection, EngineEvent, EngineSession, RealtimeEngine,
    SessionRequest,
};
use crate::config::RealtimeConfig;
use crate::{Error, Result};

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 64;

/// Connects sessions to a realtime model endpoint
pub struct RealtimeWsEngine {
    url: Url,
    voice: String,
    api_key: Option<SecretString>,
}

impl RealtimeWsEngine {
    /// Create an engine from configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the endpoint URL is invalid
    pub fn new(config: &RealtimeConfig) -> Result<Self> {
        let mut url = Url::parse(&config.url)
            .map_err(|e| Error::Config(format!("invalid realtime url {}: {e}", config.url)))?;
        url.query_pairs_mut().append_pair("model", &config.model);

        Ok(Self {
            url,
            voice: config.voice.clone(),
            api_key: config
                .api_key
                .as_ref()
                .map(|k| SecretString::from(k.expose_secret().to_owned())),
        })
    }
}

#[async_trait]
impl RealtimeEngine for RealtimeWsEngine {
    async fn connect(&self, request: SessionRequest) -> Result<EngineConnection> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| Error::Config("realtime API key not configured".to_string()))?;

        let mut ws_request = self.url.as_str().into_client_request()?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key.expose_secret()))
            .map_err(|e| Error::Config(format!("invalid realtime API key: {e}")))?;
        ws_request.headers_mut().insert("Authorization", auth);
        ws_request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        tracing::debug!(participant = %request.participant, "connecting to realtime engine");
        let (socket, _response) = tokio_tungstenite::connect_async(ws_request).await?;
        let (mut sink, mut stream) = socket.split();

        sink.send(Message::Text(session_update(&request, &self.voice).to_string()))
            .await?;

        let (command_tx, mut command_rx) = mpsc::channel::<Value>(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let participant = request.participant;

        let writer = tokio::spawn(async move {
            while let Some(payload) = command_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(payload.to_string())).await {
                    tracing::warn!(error = %e, "realtime send failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if let Some(event) = parse_server_event(&text)
                            && event_tx.send(event).await.is_err()
                        {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(participant = %participant, ?frame, "realtime engine closed");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(participant = %participant, error = %e, "realtime receive failed");
                        break;
                    }
                }
            }
            let _ = event_tx.send(EngineEvent::Closed).await;
        });

        Ok(EngineConnection {
            session: Box::new(RealtimeWsSession {
                commands: Some(command_tx),
                writer: Some(writer),
                reader,
            }),
            events: event_rx,
        })
    }
}

struct RealtimeWsSession {
    commands: Option<mpsc::Sender<Value>>,
    writer: Option<JoinHandle<()>>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl EngineSession for RealtimeWsSession {
    async fn send(&mut self, command: EngineCommand) -> Result<()> {
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| Error::Engine("session closed".to_string()))?;
        commands
            .send(encode_command(&command))
            .await
            .map_err(|_| Error::Engine("realtime connection lost".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        // dropping the sender lets the writer flush and close the socket
        self.commands = None;
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
        self.reader.abort();
        Ok(())
    }
}

impl Drop for RealtimeWsSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// `session.update` payload declaring instructions, voice and tools
fn session_update(request: &SessionRequest, voice: &str) -> Value {
    let tools: Vec<Value> = request
        .tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            })
        })
        .collect();

    json!({
        "type": "session.update",
        "session": {
            "instructions": request.instructions,
            "voice": voice,
            "tools": tools,
            "tool_choice": "auto",
            "input_audio_transcription": { "model": "whisper-1" },
        }
    })
}

fn encode_command(command: &EngineCommand) -> Value {
    match command {
        EngineCommand::CreateItem(ConversationItem::AssistantMessage { text }) => json!({
            "type": "conversation.item.create",
            "item": {
                "type": "message",
                "role": "assistant",
                "content": [{ "type": "text", "text": text }],
            }
        }),
        EngineCommand::CreateItem(ConversationItem::ToolOutput {
            call_id, output, ..
        }) => json!({
            "type": "conversation.item.create",
            "item": {
                "type": "function_call_output",
                "call_id": call_id,
                "output": output,
            }
        }),
        EngineCommand::CreateResponse => json!({ "type": "response.create" }),
    }
}

/// Map a server event to an engine event; unrecognized events are skipped
fn parse_server_event(text: &str) -> Option<EngineEvent> {
    let event: Value = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring malformed realtime event");
            return None;
        }
    };
    let str_field = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).map(str::to_string);

    match event.get("type").and_then(Value::as_str)? {
        "response.function_call_arguments.done" => Some(EngineEvent::ToolCallRequested {
            call_id: str_field(&event, "call_id")?,
            name: str_field(&event, "name")?,
            arguments: str_field(&event, "arguments").unwrap_or_default(),
        }),
        "conversation.item.input_audio_transcription.completed" => {
            Some(EngineEvent::UserTranscript {
                text: str_field(&event, "transcript")?,
            })
        }
        "response.done" => Some(EngineEvent::ResponseDone {
            response_id: event.get("response").and_then(|r| str_field(r, "id")),
        }),
        "error" => Some(EngineEvent::Error {
            message: event
                .get("error")
                .and_then(|e| str_field(e, "message"))
                .unwrap_or_else(|| "unknown engine error".to_string()),
        }),
        _ => None,
    }
}
