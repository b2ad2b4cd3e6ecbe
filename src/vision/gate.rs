//! Change gate: decides whether a frame is novel enough to transmit
//!
//! The baseline is the digest of the last frame chosen for transmission. It
//! moves only on a transmit decision, so the gate measures drift from what
//! the receiver last saw rather than from the last frame observed.

use std::sync::{Mutex, MutexGuard, PoisonError};

use super::digest::{Digest, similarity};
use crate::Result;

/// Why a frame was not transmitted
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DropReason {
    /// Too similar to the baseline
    Redundant { similarity: f64 },
    /// Payload could not be digested
    Undigestable,
}

/// Outcome of evaluating one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateDecision {
    /// Send the frame; `similarity` is `None` on cold start
    Transmit { similarity: Option<f64> },
    /// Discard the frame
    Drop(DropReason),
}

impl GateDecision {
    #[must_use]
    pub const fn is_transmit(&self) -> bool {
        matches!(self, Self::Transmit { .. })
    }
}

/// Stateful novel-vs-redundant frame filter
#[derive(Debug)]
pub struct ChangeGate {
    threshold: f64,
    baseline: Mutex<Option<Digest>>,
}

impl ChangeGate {
    /// Create a gate that drops frames with similarity `>= threshold`
    #[must_use]
    pub const fn new(threshold: f64) -> Self {
        Self {
            threshold,
            baseline: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Digest of the last frame chosen for transmission
    #[must_use]
    pub fn baseline(&self) -> Option<Digest> {
        *self.lock()
    }

    /// Evaluate a digest, updating the baseline on a transmit decision
    ///
    /// Read-compare-update happens under one lock, so two concurrent
    /// evaluations can never both transmit against the same stale baseline.
    pub fn evaluate(&self, digest: &Digest) -> GateDecision {
        let mut baseline = self.lock();
        match *baseline {
            None => {
                *baseline = Some(*digest);
                GateDecision::Transmit { similarity: None }
            }
            Some(previous) => {
                let score = similarity(&previous, digest);
                if score < self.threshold {
                    *baseline = Some(*digest);
                    GateDecision::Transmit {
                        similarity: Some(score),
                    }
                } else {
                    GateDecision::Drop(DropReason::Redundant { similarity: score })
                }
            }
        }
    }

    /// Evaluate a digest attempt; undigestable input always drops
    pub fn evaluate_outcome(&self, outcome: &Result<Digest>) -> GateDecision {
        match outcome {
            Ok(digest) => self.evaluate(digest),
            Err(_) => GateDecision::Drop(DropReason::Undigestable),
        }
    }

    /// Clear the baseline if it is still `digest`
    ///
    /// Called when the transmission chosen for `digest` failed, so the next
    /// frame is compared against what the receiver actually has. Returns
    /// whether the baseline was cleared.
    pub fn revoke(&self, digest: &Digest) -> bool {
        let mut baseline = self.lock();
        if baseline.as_ref() == Some(digest) {
            *baseline = None;
            true
        } else {
            false
        }
    }

    /// Forget the baseline entirely
    pub fn reset(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> MutexGuard<'_, Option<Digest>> {
        self.baseline.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
