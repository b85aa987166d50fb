//! Scripted providers for tests.
//!
//! Deterministic stand-ins for the capability traits: fixed detection
//! regions, queued predictions, constant foreground masks, and a fixed
//! emotion label. Also handy for wiring a pipeline without any vision
//! backend at all.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use image::GrayImage;

use crate::analysis::{
    BackgroundSubtractor, EmotionClassifier, FaceDetector, FaceRecognizer, LabeledSample,
    Prediction, Region,
};
use crate::store::write_atomic;

/// Returns the same configured regions on every call.
pub struct ScriptedFaceDetector {
    regions: Vec<Region>,
}

impl ScriptedFaceDetector {
    pub fn with_regions(regions: Vec<Region>) -> Self {
        Self { regions }
    }

    /// A detector that never finds a face.
    pub fn empty() -> Self {
        Self {
            regions: Vec::new(),
        }
    }
}

impl FaceDetector for ScriptedFaceDetector {
    fn name(&self) -> &'static str {
        "stub-scripted-detector"
    }

    fn detect(&mut self, _image: &GrayImage) -> Result<Vec<Region>> {
        Ok(self.regions.clone())
    }
}

/// Recognizer with queued predictions and counted training runs.
///
/// `predict` pops queued predictions first and falls back to the default;
/// `train` bumps a shared counter observable through [`train_counter`]
/// after the recognizer has been boxed into the pipeline.
///
/// [`train_counter`]: ScriptedRecognizer::train_counter
pub struct ScriptedRecognizer {
    queued: Mutex<VecDeque<Prediction>>,
    default: Prediction,
    train_calls: Arc<AtomicUsize>,
}

impl ScriptedRecognizer {
    pub fn new() -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            default: Prediction {
                identity: 1,
                confidence: 0.0,
            },
            train_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Replace the fallback prediction returned when the queue is empty.
    pub fn with_default(mut self, default: Prediction) -> Self {
        self.default = default;
        self
    }

    /// Queue one prediction; queued entries are returned in order.
    pub fn queue_prediction(&mut self, prediction: Prediction) {
        self.queued
            .lock()
            .expect("scripted recognizer queue")
            .push_back(prediction);
    }

    /// Shared count of completed training runs.
    pub fn train_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.train_calls)
    }
}

impl Default for ScriptedRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceRecognizer for ScriptedRecognizer {
    fn name(&self) -> &'static str {
        "stub-scripted-recognizer"
    }

    fn train(&mut self, samples: &[LabeledSample]) -> Result<()> {
        if samples.is_empty() {
            return Err(anyhow!("cannot train on an empty corpus"));
        }
        self.train_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn predict(&self, _face: &GrayImage) -> Result<Prediction> {
        let mut queued = self
            .queued
            .lock()
            .map_err(|_| anyhow!("scripted recognizer queue poisoned"))?;
        Ok(queued.pop_front().unwrap_or(self.default))
    }

    fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, b"{\"stub\":true}")?;
        Ok(())
    }
}

/// Constant-mask subtractor: uniform, or a single foreground block.
pub struct StaticMaskSubtractor {
    uniform: u8,
    block: Option<(Region, u8)>,
}

impl StaticMaskSubtractor {
    /// Mask filled with one value everywhere.
    pub fn uniform(value: u8) -> Self {
        Self {
            uniform: value,
            block: None,
        }
    }

    /// Zero mask except one foreground block.
    pub fn block(region: Region, value: u8) -> Self {
        Self {
            uniform: 0,
            block: Some((region, value)),
        }
    }
}

impl BackgroundSubtractor for StaticMaskSubtractor {
    fn name(&self) -> &'static str {
        "stub-static-mask"
    }

    fn apply(&mut self, frame: &GrayImage) -> Result<GrayImage> {
        let (width, height) = frame.dimensions();
        let mut mask = GrayImage::from_pixel(width, height, image::Luma([self.uniform]));
        if let Some((region, value)) = self.block {
            for y in region.y..(region.y + region.height).min(height) {
                for x in region.x..(region.x + region.width).min(width) {
                    mask.put_pixel(x, y, image::Luma([value]));
                }
            }
        }
        Ok(mask)
    }
}

/// Always returns the same emotion label.
pub struct FixedEmotionClassifier {
    label: String,
}

impl FixedEmotionClassifier {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl EmotionClassifier for FixedEmotionClassifier {
    fn name(&self) -> &'static str {
        "stub-fixed-emotion"
    }

    fn classify(&mut self, _face: &GrayImage) -> Result<String> {
        Ok(self.label.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_recognizer_drains_queue_then_falls_back() {
        let mut recognizer = ScriptedRecognizer::new().with_default(Prediction {
            identity: 9,
            confidence: 80.0,
        });
        recognizer.queue_prediction(Prediction {
            identity: 2,
            confidence: 10.0,
        });
        let face = GrayImage::from_pixel(4, 4, image::Luma([0u8]));
        assert_eq!(recognizer.predict(&face).unwrap().identity, 2);
        assert_eq!(recognizer.predict(&face).unwrap().identity, 9);
    }

    #[test]
    fn static_mask_block_is_painted() {
        let mut subtractor = StaticMaskSubtractor::block(Region::new(1, 1, 2, 2), 255);
        let mask = subtractor
            .apply(&GrayImage::from_pixel(4, 4, image::Luma([7u8])))
            .unwrap();
        assert_eq!(mask.get_pixel(0, 0)[0], 0);
        assert_eq!(mask.get_pixel(1, 1)[0], 255);
        assert_eq!(mask.get_pixel(2, 2)[0], 255);
        assert_eq!(mask.get_pixel(3, 3)[0], 0);
    }
}
