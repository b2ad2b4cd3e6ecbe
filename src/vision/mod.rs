//! Frame pipeline: sampling, perceptual digests and change gating
//!
//! Frames flow `FrameSampler → FrameHasher → ChangeGate → FrameTransmitter`.
//! Only frames the gate judges novel reach the stream transport.

mod digest;
mod frame;
mod gate;
mod pipeline;
mod sampler;
mod source;

pub use digest::{
    AverageHasher, DIGEST_BITS, DifferenceHasher, Digest, Fingerprint, FrameHasher, HasherKind,
    hasher_for, similarity,
};
pub use frame::{Frame, RawFrame};
pub use gate::{ChangeGate, DropReason, GateDecision};
pub use pipeline::{FramePipeline, FrameTransmitter, PipelineStats, QueuedFrame};
pub use sampler::{FrameSampler, SamplerReport};
pub use source::{FrameSource, HttpSnapshotSource};
