//! TOML configuration file loading
//!
//! Supports `~/.config/sightline/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;
use crate::vision::HasherKind;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct SightlineConfigFile {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Frame sampling and gating configuration
    #[serde(default)]
    pub frames: FramesFileConfig,

    /// Chunked stream transport configuration
    #[serde(default)]
    pub transport: TransportFileConfig,

    /// Realtime conversational engine configuration
    #[serde(default)]
    pub realtime: RealtimeFileConfig,

    /// Tool execution configuration
    #[serde(default)]
    pub tools: ToolsFileConfig,
}

/// Server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Frame pipeline configuration
#[derive(Debug, Default, Deserialize)]
pub struct FramesFileConfig {
    /// Sampling interval in milliseconds
    pub interval_ms: Option<u64>,
    /// JPEG quality (1-100)
    pub jpeg_quality: Option<u8>,
    /// Similarity at or above which a frame is considered redundant
    pub similarity_threshold: Option<f64>,
    /// Perceptual hash family ("dhash" or "ahash")
    pub hasher: Option<HasherKind>,
    /// Stream topic for frame payloads
    pub topic: Option<String>,
    /// Frames allowed to wait behind an in-flight transmission
    pub max_backlog: Option<usize>,
    /// Still-image URL polled on each sampling tick
    pub snapshot_url: Option<String>,
    /// Capture timeout in milliseconds
    pub capture_timeout_ms: Option<u64>,
}

/// Transport configuration
#[derive(Debug, Default, Deserialize)]
pub struct TransportFileConfig {
    /// Maximum chunk size in bytes
    pub chunk_size: Option<usize>,
    /// Per-frame transmission timeout in milliseconds
    pub frame_timeout_ms: Option<u64>,
}

/// Realtime engine configuration
#[derive(Debug, Default, Deserialize)]
pub struct RealtimeFileConfig {
    pub url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub api_key: Option<String>,
    pub instructions: Option<String>,
    /// Opening assistant utterance
    pub greeting: Option<String>,
    pub open_timeout_ms: Option<u64>,
}

/// Tool configuration
#[derive(Debug, Default, Deserialize)]
pub struct ToolsFileConfig {
    pub timeout_ms: Option<u64>,
    pub weather_url: Option<String>,
    /// Grace period for in-flight tool calls during teardown
    pub teardown_grace_ms: Option<u64>,
}

/// Load the TOML config file
///
/// An explicit path must exist and parse. The default path is optional:
/// returns `SightlineConfigFile::default()` if it doesn't exist.
///
/// # Errors
///
/// Returns error if an explicit file cannot be read, or any file fails to parse
pub fn load_config_file(explicit: Option<&Path>) -> Result<SightlineConfigFile> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match config_file_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(SightlineConfigFile::default()),
        },
    };

    let content = std::fs::read_to_string(&path)?;
    let config = parse_config_file(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the TOML is malformed or has unexpected types
pub fn parse_config_file(content: &str) -> Result<SightlineConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/sightline/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("sightline").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_file() {
        let file = parse_config_file(
            r#"
            [frames]
            interval_ms = 500
            hasher = "ahash"

            [transport]
            chunk_size = 4096
            "#,
        )
        .unwrap();

        assert_eq!(file.frames.interval_ms, Some(500));
        assert_eq!(file.frames.hasher, Some(HasherKind::Average));
        assert_eq!(file.transport.chunk_size, Some(4096));
        assert!(file.realtime.url.is_none());
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(parse_config_file("[frames]\ninterval_ms = \"fast\"").is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let path = Path::new("/nonexistent/sightline/config.toml");
        assert!(load_config_file(Some(path)).is_err());
    }
}
