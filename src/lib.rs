//! Argus streaming frame analysis.
//!
//! This crate ingests a continuous byte stream of JPEG-encoded video frames
//! over long-lived connections, reassembles discrete frames, and routes each
//! frame to an analysis handler selected by a per-chunk tag. Results are kept
//! in a bounded, most-recent-first buffer for retrospective retrieval.
//!
//! # Architecture
//!
//! - `demux`: incremental JPEG frame extraction from the tagged chunk stream
//! - `queue`: fixed-capacity FIFO with a blocking producer
//! - `pipeline`: single-drainer dispatch to the analysis handlers
//! - `analysis`: handler implementations plus the capability-provider traits
//!   (face detection, face recognition, background subtraction, emotion
//!   classification) the handlers call through
//! - `recognition`: recognizer model, identity counter, trained flag
//! - `store`: on-disk face corpus and pruned motion snapshot trees
//! - `snapshot`: bounded in-memory buffer of processed-frame snapshots
//! - `service`: per-connection stream handling and terminal responses
//! - `api`: TCP ingestion/retrieval server
//!
//! Vision algorithms are external collaborators behind the provider traits;
//! the built-in CPU providers are coarse heuristics that keep the daemon
//! runnable without any vision library installed.

use std::fmt;

pub mod analysis;
pub mod api;
pub mod config;
pub mod demux;
pub mod frame;
pub mod pipeline;
pub mod queue;
pub mod recognition;
pub mod service;
pub mod snapshot;
pub mod store;

pub use analysis::{
    BackgroundSubtractor, EmotionClassifier, FaceDetector, FaceRecognizer, LabeledSample,
    Outcome, Prediction, Region,
};
pub use config::StreamerConfig;
pub use demux::FrameDemuxer;
pub use frame::Frame;
pub use pipeline::{HandlerSet, Pipeline};
pub use recognition::{FaceMatch, RecognitionState};
pub use service::{StreamChunk, StreamService, StreamSummary};
pub use snapshot::{ProcessedSnapshot, ResultBuffer};
pub use store::ArtifactStore;

// -------------------- Analysis kinds --------------------

/// Analysis requested by a chunk's tag.
///
/// The tag applies to every frame extracted after it until the stream
/// declares a different tag. Tags that name no known analysis still carry
/// frames through the queue; dispatch turns them into empty results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AnalysisKind {
    FaceRecognition,
    MotionDetection,
    EmotionRecognition,
}

impl AnalysisKind {
    /// Parse a wire tag. Unknown tags are `None`, not an error.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "face_recognition" => Some(Self::FaceRecognition),
            "motion_detection" => Some(Self::MotionDetection),
            "emotion_recognition" => Some(Self::EmotionRecognition),
            _ => None,
        }
    }

    /// Wire tag for this kind.
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::FaceRecognition => "face_recognition",
            Self::MotionDetection => "motion_detection",
            Self::EmotionRecognition => "emotion_recognition",
        }
    }

    /// Human-readable handler name used in result and error messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::FaceRecognition => "Face recognition",
            Self::MotionDetection => "Motion detection",
            Self::EmotionRecognition => "Emotion recognition",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

// -------------------- Handler errors --------------------

/// Where a handler failure originated.
///
/// Capability failures come from the vision providers (detection,
/// recognition, classification); storage failures come from the artifact
/// trees. Both are local to one frame and never terminate the worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerErrorKind {
    Capability,
    Storage,
}

impl HandlerErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capability => "capability",
            Self::Storage => "storage",
        }
    }
}

/// A classified per-frame handler failure.
#[derive(Debug)]
pub struct HandlerError {
    pub kind: HandlerErrorKind,
    source: anyhow::Error,
}

impl HandlerError {
    pub fn capability(source: impl Into<anyhow::Error>) -> Self {
        Self {
            kind: HandlerErrorKind::Capability,
            source: source.into(),
        }
    }

    pub fn storage(source: impl Into<anyhow::Error>) -> Self {
        Self {
            kind: HandlerErrorKind::Storage,
            source: source.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure: {:#}", self.kind.as_str(), self.source)
    }
}

impl std::error::Error for HandlerError {}
