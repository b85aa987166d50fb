//! Capability-provider implementations.
//!
//! - `cpu`: built-in heuristic providers so the daemon runs end-to-end
//!   without any external vision library.
//! - `stub`: scripted providers for tests.

use crate::analysis::{BackgroundSubtractor, EmotionClassifier, FaceDetector, FaceRecognizer};

pub mod cpu;
pub mod stub;

pub use cpu::{
    BrightnessEmotionClassifier, ContrastWindowFaceDetector, HistogramRecognizer,
    RunningMeanSubtractor,
};
pub use stub::{
    FixedEmotionClassifier, ScriptedFaceDetector, ScriptedRecognizer, StaticMaskSubtractor,
};

/// One provider per capability, ready to wire into a pipeline.
///
/// The face and emotion handlers each own their detector, so two detector
/// instances are required even when both are the same implementation.
pub struct ProviderSet {
    pub face_detector: Box<dyn FaceDetector>,
    pub emotion_detector: Box<dyn FaceDetector>,
    pub recognizer: Box<dyn FaceRecognizer>,
    pub subtractor: Box<dyn BackgroundSubtractor>,
    pub emotion_classifier: Box<dyn EmotionClassifier>,
}

impl ProviderSet {
    /// The built-in CPU heuristics.
    pub fn cpu_defaults() -> Self {
        Self {
            face_detector: Box::new(ContrastWindowFaceDetector::new()),
            emotion_detector: Box::new(ContrastWindowFaceDetector::new()),
            recognizer: Box::new(HistogramRecognizer::new()),
            subtractor: Box::new(RunningMeanSubtractor::new()),
            emotion_classifier: Box::new(BrightnessEmotionClassifier::new()),
        }
    }
}
