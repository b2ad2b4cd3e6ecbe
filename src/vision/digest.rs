//! Perceptual frame digests
//!
//! A digest is a 64-bit fingerprint of a frame's coarse luminance structure.
//! Re-encoding an unchanged scene, or a small lighting shift, leaves most
//! bits untouched, so similarity is measured as the fraction of equal bits.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::DynamicImage;
use image::imageops::FilterType;
use serde::Deserialize;

use crate::{Error, Result};

/// Width of every fingerprint in bits
pub const DIGEST_BITS: u32 = 64;

/// Perceptual hash family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum HasherKind {
    /// Difference hash: compares horizontally adjacent pixels
    #[default]
    #[serde(rename = "dhash")]
    Difference,
    /// Average hash: compares each pixel against the mean
    #[serde(rename = "ahash")]
    Average,
}

impl fmt::Display for HasherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Difference => write!(f, "dhash"),
            Self::Average => write!(f, "ahash"),
        }
    }
}

impl FromStr for HasherKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dhash" | "difference" => Ok(Self::Difference),
            "ahash" | "average" => Ok(Self::Average),
            other => Err(format!("unknown hasher {other:?} (expected dhash or ahash)")),
        }
    }
}

/// Fixed-width perceptual fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Number of differing bits
    #[must_use]
    pub const fn distance(self, other: Self) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    /// Similarity in `[0, 1]`; identical fingerprints score 1
    #[must_use]
    pub fn similarity(self, other: Self) -> f64 {
        1.0 - f64::from(self.distance(other)) / f64::from(DIGEST_BITS)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Fingerprint of one evaluated frame plus its capture time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Digest {
    pub fingerprint: Fingerprint,
    pub captured_at: DateTime<Utc>,
}

impl Digest {
    #[must_use]
    pub const fn new(fingerprint: Fingerprint, captured_at: DateTime<Utc>) -> Self {
        Self {
            fingerprint,
            captured_at,
        }
    }
}

/// Similarity between two digests in `[0, 1]`
#[must_use]
pub fn similarity(a: &Digest, b: &Digest) -> f64 {
    a.fingerprint.similarity(b.fingerprint)
}

/// Computes perceptual digests from encoded frame bytes
pub trait FrameHasher: Send + Sync {
    /// Hash family implemented
    fn kind(&self) -> HasherKind;

    /// Fingerprint a decoded image
    fn fingerprint(&self, image: &DynamicImage) -> Fingerprint;

    /// Decode `bytes` and digest them
    ///
    /// # Errors
    ///
    /// Returns `Error::Undigestable` if `bytes` is empty or not a decodable
    /// image; never a zero digest
    fn digest(&self, bytes: &[u8], captured_at: DateTime<Utc>) -> Result<Digest> {
        if bytes.is_empty() {
            return Err(Error::Undigestable("empty frame payload".to_string()));
        }
        let image = image::load_from_memory(bytes)
            .map_err(|e| Error::Undigestable(format!("cannot decode frame: {e}")))?;
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::Undigestable("frame has no pixels".to_string()));
        }
        Ok(Digest::new(self.fingerprint(&image), captured_at))
    }
}

/// 64-bit difference hash over a 9x8 grayscale thumbnail
#[derive(Debug, Clone, Copy, Default)]
pub struct DifferenceHasher;

impl FrameHasher for DifferenceHasher {
    fn kind(&self) -> HasherKind {
        HasherKind::Difference
    }

    fn fingerprint(&self, image: &DynamicImage) -> Fingerprint {
        let thumb = image.resize_exact(9, 8, FilterType::Triangle).to_luma8();
        let mut bits = 0u64;
        for y in 0..8 {
            for x in 0..8 {
                let left = thumb.get_pixel(x, y)[0];
                let right = thumb.get_pixel(x + 1, y)[0];
                bits = (bits << 1) | u64::from(left > right);
            }
        }
        Fingerprint(bits)
    }
}

/// 64-bit average hash over an 8x8 grayscale thumbnail
#[derive(Debug, Clone, Copy, Default)]
pub struct AverageHasher;

impl FrameHasher for AverageHasher {
    fn kind(&self) -> HasherKind {
        HasherKind::Average
    }

    fn fingerprint(&self, image: &DynamicImage) -> Fingerprint {
        let thumb = image.resize_exact(8, 8, FilterType::Triangle).to_luma8();
        let sum: u32 = thumb.pixels().map(|p| u32::from(p[0])).sum();
        // Compare against the mean without dividing: p > sum/64 <=> 64p > sum
        let mut bits = 0u64;
        for pixel in thumb.pixels() {
            bits = (bits << 1) | u64::from(u32::from(pixel[0]) * 64 > sum);
        }
        Fingerprint(bits)
    }
}

/// Construct the hasher for a configured family
#[must_use]
pub fn hasher_for(kind: HasherKind) -> Arc<dyn FrameHasher> {
    match kind {
        HasherKind::Difference => Arc::new(DifferenceHasher),
        HasherKind::Average => Arc::new(AverageHasher),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::codecs::jpeg::JpegEncoder;
    use image::{ImageFormat, Rgb, RgbImage};

    use super::*;

    fn gradient(mirrored: bool, lift: u8) -> RgbImage {
        RgbImage::from_fn(64, 48, |x, _| {
            let x = if mirrored { 63 - x } else { x };
            #[allow(clippy::cast_possible_truncation)]
            let v = (x * 3) as u8 + lift;
            Rgb([v, v, v])
        })
    }

    fn jpeg(image: &RgbImage, quality: u8) -> Vec<u8> {
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode_image(image)
            .unwrap();
        out
    }

    fn png(image: &RgbImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn fingerprint_similarity_bounds() {
        let a = Fingerprint::from_bits(0);
        let b = Fingerprint::from_bits(u64::MAX);
        assert!((a.similarity(a) - 1.0).abs() < f64::EPSILON);
        assert!(a.similarity(b).abs() < f64::EPSILON);
        assert_eq!(a.distance(Fingerprint::from_bits(0b1011)), 3);
    }

    #[test]
    fn digest_is_deterministic() {
        let bytes = png(&gradient(false, 0));
        let now = Utc::now();
        let a = DifferenceHasher.digest(&bytes, now).unwrap();
        let b = DifferenceHasher.digest(&bytes, now).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn reencoding_unchanged_scene_stays_similar() {
        let scene = gradient(false, 0);
        let now = Utc::now();
        for hasher in [hasher_for(HasherKind::Difference), hasher_for(HasherKind::Average)] {
            let high = hasher.digest(&jpeg(&scene, 95), now).unwrap();
            let low = hasher.digest(&jpeg(&scene, 50), now).unwrap();
            assert!(similarity(&high, &low) >= 0.9, "{} not tolerant", hasher.kind());
        }
    }

    #[test]
    fn lighting_shift_stays_similar() {
        let now = Utc::now();
        let base = DifferenceHasher.digest(&png(&gradient(false, 0)), now).unwrap();
        let lifted = DifferenceHasher.digest(&png(&gradient(false, 20)), now).unwrap();
        assert!(similarity(&base, &lifted) >= 0.9);
    }

    #[test]
    fn different_scene_is_dissimilar() {
        let now = Utc::now();
        let a = DifferenceHasher.digest(&png(&gradient(false, 0)), now).unwrap();
        let b = DifferenceHasher.digest(&png(&gradient(true, 0)), now).unwrap();
        assert!(similarity(&a, &b) < 0.5);
    }

    #[test]
    fn empty_payload_is_undigestable() {
        let err = DifferenceHasher.digest(&[], Utc::now()).unwrap_err();
        assert!(matches!(err, Error::Undigestable(_)));
    }

    #[test]
    fn garbage_payload_is_undigestable() {
        let err = AverageHasher
            .digest(b"definitely not an image", Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::Undigestable(_)));
    }

    #[test]
    fn hasher_kind_parses() {
        assert_eq!("dhash".parse::<HasherKind>().unwrap(), HasherKind::Difference);
        assert_eq!("AHASH".parse::<HasherKind>().unwrap(), HasherKind::Average);
        assert!("phash".parse::<HasherKind>().is_err());
    }
}
