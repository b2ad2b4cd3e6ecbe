//! Configuration management for Sightline gateway
//!
//! Configuration is assembled once at startup from defaults, an optional TOML
//! file and environment variables, then passed by reference into the
//! components that need it.

pub mod file;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use self::file::SightlineConfigFile;
use crate::vision::HasherKind;
use crate::{Error, Result};

/// Default HTTP API port
pub const DEFAULT_PORT: u16 = 18790;

/// Default maximum chunk size for stream transport
pub const DEFAULT_CHUNK_SIZE: usize = 15_000;

/// Default opening utterance for a new conversation
pub const DEFAULT_GREETING: &str = "How can I help you today?";

/// Default system instructions for the assistant session
pub const DEFAULT_INSTRUCTIONS: &str = "You are a voice assistant that can both see and hear. \
Use short and concise responses, avoiding unpronounceable punctuation. \
When you receive an image of the user's surroundings, naturally incorporate what you see \
into your response. Keep visual descriptions brief but informative.";

/// Sightline gateway configuration
#[derive(Debug, Default)]
pub struct Config {
    /// HTTP API server configuration
    pub server: ServerConfig,

    /// Frame sampling and change gating
    pub frames: FrameConfig,

    /// Chunked stream transport
    pub transport: TransportConfig,

    /// Realtime conversational engine connection
    pub realtime: RealtimeConfig,

    /// Tool execution
    pub tools: ToolsConfig,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

/// Frame pipeline configuration
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Time between sampling ticks
    pub interval: Duration,

    /// JPEG encoding quality (1-100)
    pub jpeg_quality: u8,

    /// Similarity at or above which a frame is dropped as redundant
    pub similarity_threshold: f64,

    /// Perceptual hash family
    pub hasher: HasherKind,

    /// Stream topic frames are sent on
    pub topic: String,

    /// Frames allowed to queue behind an in-flight transmission
    pub max_backlog: usize,

    /// Still-image URL polled each tick; no sampler runs when unset
    pub snapshot_url: Option<String>,

    /// Bound on a single capture
    pub capture_timeout: Duration,
}

/// Stream transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum bytes per chunk
    pub chunk_size: usize,

    /// Bound on a whole frame transmission (open, chunks, close)
    pub frame_timeout: Duration,
}

/// Realtime engine configuration
///
/// The endpoint and credential are opaque connection parameters handed to the
/// engine; nothing else interprets them.
#[derive(Debug)]
pub struct RealtimeConfig {
    /// WebSocket endpoint
    pub url: String,

    /// Model identifier
    pub model: String,

    /// Output voice
    pub voice: String,

    /// Bearer credential
    pub api_key: Option<SecretString>,

    /// System instructions for every session
    pub instructions: String,

    /// Assistant utterance seeded into each new session
    pub greeting: String,

    /// Bound on opening a session
    pub open_timeout: Duration,
}

/// Tool execution configuration
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    /// Bound on a single tool execution
    pub timeout: Duration,

    /// Base URL of the weather text service
    pub weather_url: String,

    /// How long teardown waits for in-flight tool calls
    pub teardown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            jpeg_quality: 80,
            similarity_threshold: 0.9,
            hasher: HasherKind::default(),
            topic: "frames".to_string(),
            max_backlog: 4,
            snapshot_url: None,
            capture_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            frame_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.openai.com/v1/realtime".to_string(),
            model: "gpt-4o-realtime-preview".to_string(),
            voice: "alloy".to_string(),
            api_key: None,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            greeting: DEFAULT_GREETING.to_string(),
            open_timeout: Duration::from_secs(15),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            weather_url: "https://wttr.in".to_string(),
            teardown_grace: Duration::from_secs(2),
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the TOML file, then the environment
    ///
    /// # Errors
    ///
    /// Returns error if the config file is invalid, an environment value
    /// cannot be parsed, or the result fails validation
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let file = file::load_config_file(config_path)?;
        let mut config = Self::default();
        config.apply_file(file);
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from a parsed config file
    pub fn apply_file(&mut self, file: SightlineConfigFile) {
        let SightlineConfigFile {
            server,
            frames,
            transport,
            realtime,
            tools,
        } = file;

        if let Some(host) = server.host {
            self.server.host = host;
        }
        if let Some(port) = server.port {
            self.server.port = port;
        }

        if let Some(ms) = frames.interval_ms {
            self.frames.interval = Duration::from_millis(ms);
        }
        if let Some(q) = frames.jpeg_quality {
            self.frames.jpeg_quality = q;
        }
        if let Some(t) = frames.similarity_threshold {
            self.frames.similarity_threshold = t;
        }
        if let Some(h) = frames.hasher {
            self.frames.hasher = h;
        }
        if let Some(topic) = frames.topic {
            self.frames.topic = topic;
        }
        if let Some(n) = frames.max_backlog {
            self.frames.max_backlog = n;
        }
        if frames.snapshot_url.is_some() {
            self.frames.snapshot_url = frames.snapshot_url;
        }
        if let Some(ms) = frames.capture_timeout_ms {
            self.frames.capture_timeout = Duration::from_millis(ms);
        }

        if let Some(size) = transport.chunk_size {
            self.transport.chunk_size = size;
        }
        if let Some(ms) = transport.frame_timeout_ms {
            self.transport.frame_timeout = Duration::from_millis(ms);
        }

        if let Some(url) = realtime.url {
            self.realtime.url = url;
        }
        if let Some(model) = realtime.model {
            self.realtime.model = model;
        }
        if let Some(voice) = realtime.voice {
            self.realtime.voice = voice;
        }
        if let Some(key) = realtime.api_key {
            self.realtime.api_key = Some(SecretString::from(key));
        }
        if let Some(instructions) = realtime.instructions {
            self.realtime.instructions = instructions;
        }
        if let Some(greeting) = realtime.greeting {
            self.realtime.greeting = greeting;
        }
        if let Some(ms) = realtime.open_timeout_ms {
            self.realtime.open_timeout = Duration::from_millis(ms);
        }

        if let Some(ms) = tools.timeout_ms {
            self.tools.timeout = Duration::from_millis(ms);
        }
        if let Some(url) = tools.weather_url {
            self.tools.weather_url = url;
        }
        if let Some(ms) = tools.teardown_grace_ms {
            self.tools.teardown_grace = Duration::from_millis(ms);
        }
    }

    /// Overlay values from environment variables
    ///
    /// `lookup` resolves a variable name to its value.
    ///
    /// # Errors
    ///
    /// Returns error if a numeric or enum variable cannot be parsed
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("SIGHTLINE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_var(&lookup, "SIGHTLINE_PORT")? {
            self.server.port = port;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SIGHTLINE_FRAME_INTERVAL_MS")? {
            self.frames.interval = Duration::from_millis(ms);
        }
        if let Some(q) = parse_var(&lookup, "SIGHTLINE_JPEG_QUALITY")? {
            self.frames.jpeg_quality = q;
        }
        if let Some(t) = parse_var(&lookup, "SIGHTLINE_SIMILARITY_THRESHOLD")? {
            self.frames.similarity_threshold = t;
        }
        if let Some(h) = parse_var(&lookup, "SIGHTLINE_HASHER")? {
            self.frames.hasher = h;
        }
        if let Some(url) = lookup("SIGHTLINE_SNAPSHOT_URL") {
            self.frames.snapshot_url = Some(url);
        }
        if let Some(size) = parse_var(&lookup, "SIGHTLINE_CHUNK_SIZE")? {
            self.transport.chunk_size = size;
        }
        if let Some(url) = lookup("REALTIME_URL") {
            self.realtime.url = url;
        }
        if let Some(model) = lookup("REALTIME_MODEL") {
            self.realtime.model = model;
        }
        if let Some(key) = lookup("REALTIME_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.realtime.api_key = Some(SecretString::from(key));
        }
        if let Some(url) = lookup("SIGHTLINE_WEATHER_URL") {
            self.tools.weather_url = url;
        }
        Ok(())
    }

    /// Check value ranges and URL syntax
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        let threshold = self.frames.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Config(format!(
                "similarity threshold must be within [0, 1], got {threshold}"
            )));
        }
        if self.frames.interval.is_zero() {
            return Err(Error::Config("frame interval must be positive".to_string()));
        }
        if !(1..=100).contains(&self.frames.jpeg_quality) {
            return Err(Error::Config(format!(
                "jpeg quality must be within 1..=100, got {}",
                self.frames.jpeg_quality
            )));
        }
        if self.frames.topic.is_empty() {
            return Err(Error::Config("frame topic must not be empty".to_string()));
        }
        if self.frames.max_backlog == 0 {
            return Err(Error::Config("frame backlog must hold at least one frame".to_string()));
        }
        if self.transport.chunk_size == 0 {
            return Err(Error::Config("chunk size must be greater than zero".to_string()));
        }

        check_url("realtime.url", &self.realtime.url)?;
        check_url("tools.weather_url", &self.tools.weather_url)?;
        if let Some(url) = &self.frames.snapshot_url {
            check_url("frames.snapshot_url", url)?;
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("invalid {key}={raw:?}: {e}")))
        })
        .transpose()
}

fn check_url(field: &str, value: &str) -> Result<()> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| Error::Config(format!("invalid {field} {value:?}: {e}")))
}
