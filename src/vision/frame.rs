//! Captured and encoded frames

use chrono::{DateTime, Utc};
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;

use crate::{Error, Result};

/// Raw pixels straight from a frame source
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub pixels: RgbImage,
    pub captured_at: DateTime<Utc>,
}

impl RawFrame {
    #[must_use]
    pub fn new(pixels: RgbImage) -> Self {
        Self {
            pixels,
            captured_at: Utc::now(),
        }
    }
}

/// An encoded frame, immutable once built
#[derive(Debug, Clone)]
pub struct Frame {
    pub captured_at: DateTime<Utc>,
    /// Compressed image bytes
    pub payload: Vec<u8>,
    /// JPEG quality used, or `None` when the payload arrived pre-encoded
    pub quality: Option<u8>,
}

impl Frame {
    /// Encode raw pixels as JPEG at `quality`
    ///
    /// # Errors
    ///
    /// Returns error if the frame has no pixels or encoding fails
    pub fn encode(raw: &RawFrame, quality: u8) -> Result<Self> {
        if raw.pixels.width() == 0 || raw.pixels.height() == 0 {
            return Err(Error::Frame("captured frame has no pixels".to_string()));
        }

        let mut payload = Vec::new();
        JpegEncoder::new_with_quality(&mut payload, quality).encode_image(&raw.pixels)?;

        Ok(Self {
            captured_at: raw.captured_at,
            payload,
            quality: Some(quality),
        })
    }

    /// Wrap a payload that is already encoded (e.g. an uploaded image)
    #[must_use]
    pub fn from_encoded(payload: Vec<u8>, captured_at: DateTime<Utc>) -> Self {
        Self {
            captured_at,
            payload,
            quality: None,
        }
    }
}
