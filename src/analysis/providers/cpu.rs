//! Built-in CPU providers.
//!
//! These are coarse, dependency-free heuristics standing in for real vision
//! backends: they keep `argusd` runnable end-to-end and give the handlers
//! honest state to exercise. Production deployments are expected to plug in
//! real detectors behind the same traits.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::analysis::{
    BackgroundSubtractor, EmotionClassifier, FaceDetector, FaceRecognizer, LabeledSample,
    Prediction, Region,
};
use crate::store::write_atomic;

// ----------------------------------------------------------------------------
// Background subtraction
// ----------------------------------------------------------------------------

const DEFAULT_LEARNING_RATE: f32 = 0.05;
const DEFAULT_FOREGROUND_DELTA: f32 = 15.0;

/// Per-pixel running-mean background model.
///
/// The first frame (or any resolution change) seeds the background and
/// yields an all-zero mask; afterwards a pixel deviating from its running
/// mean by more than `foreground_delta` is marked foreground (255).
pub struct RunningMeanSubtractor {
    background: Vec<f32>,
    dimensions: (u32, u32),
    learning_rate: f32,
    foreground_delta: f32,
}

impl RunningMeanSubtractor {
    pub fn new() -> Self {
        Self {
            background: Vec::new(),
            dimensions: (0, 0),
            learning_rate: DEFAULT_LEARNING_RATE,
            foreground_delta: DEFAULT_FOREGROUND_DELTA,
        }
    }
}

impl Default for RunningMeanSubtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundSubtractor for RunningMeanSubtractor {
    fn name(&self) -> &'static str {
        "cpu-running-mean"
    }

    fn apply(&mut self, frame: &GrayImage) -> Result<GrayImage> {
        let dimensions = frame.dimensions();
        if self.dimensions != dimensions || self.background.is_empty() {
            self.background = frame.as_raw().iter().map(|&px| px as f32).collect();
            self.dimensions = dimensions;
            return Ok(GrayImage::from_pixel(
                dimensions.0,
                dimensions.1,
                image::Luma([0u8]),
            ));
        }

        let mut mask = vec![0u8; self.background.len()];
        for ((model, &pixel), out) in self
            .background
            .iter_mut()
            .zip(frame.as_raw().iter())
            .zip(mask.iter_mut())
        {
            let value = pixel as f32;
            if (value - *model).abs() > self.foreground_delta {
                *out = 255;
            }
            *model += self.learning_rate * (value - *model);
        }
        GrayImage::from_raw(dimensions.0, dimensions.1, mask)
            .ok_or_else(|| anyhow!("foreground mask size mismatch"))
    }
}

// ----------------------------------------------------------------------------
// Face detection
// ----------------------------------------------------------------------------

const DEFAULT_MIN_STDDEV: f32 = 24.0;

/// Contrast-window face locator.
///
/// Measures the intensity spread of the central half of the frame and
/// reports that window as a single face region when the spread clears the
/// threshold. A placeholder for a cascade or DNN detector, not a real one.
pub struct ContrastWindowFaceDetector {
    min_stddev: f32,
}

impl ContrastWindowFaceDetector {
    pub fn new() -> Self {
        Self {
            min_stddev: DEFAULT_MIN_STDDEV,
        }
    }

    pub fn with_min_stddev(min_stddev: f32) -> Self {
        Self { min_stddev }
    }
}

impl Default for ContrastWindowFaceDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceDetector for ContrastWindowFaceDetector {
    fn name(&self) -> &'static str {
        "cpu-contrast-window"
    }

    fn detect(&mut self, image: &GrayImage) -> Result<Vec<Region>> {
        let (width, height) = image.dimensions();
        if width < 4 || height < 4 {
            return Ok(Vec::new());
        }
        let window = Region::new(width / 4, height / 4, width / 2, height / 2);

        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        let mut count = 0u64;
        for y in window.y..window.y + window.height {
            for x in window.x..window.x + window.width {
                let value = image.get_pixel(x, y)[0] as f64;
                sum += value;
                sum_sq += value * value;
                count += 1;
            }
        }
        let mean = sum / count as f64;
        let variance = (sum_sq / count as f64 - mean * mean).max(0.0);
        if (variance.sqrt() as f32) >= self.min_stddev {
            Ok(vec![window])
        } else {
            Ok(Vec::new())
        }
    }
}

// ----------------------------------------------------------------------------
// Face recognition
// ----------------------------------------------------------------------------

const HISTOGRAM_BINS: usize = 64;
const MODEL_VERSION: u32 = 1;
// Maps chi-square distance (0..~2 for normalized histograms) onto the
// 0-100 lower-is-better confidence scale.
const CONFIDENCE_SCALE: f32 = 250.0;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct IdentityHistogram {
    identity: u32,
    histogram: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct ModelArtifact {
    version: u32,
    checksum: String,
    identities: Vec<IdentityHistogram>,
}

/// Intensity-histogram nearest-neighbour recognizer.
///
/// Each identity is the mean normalized 64-bin histogram of its samples;
/// prediction picks the identity with the smallest chi-square distance and
/// maps the distance onto the 0-100 confidence scale (lower is better).
/// The persisted artifact is JSON with an embedded SHA-256 checksum.
pub struct HistogramRecognizer {
    identities: Mutex<Vec<IdentityHistogram>>,
}

impl HistogramRecognizer {
    pub fn new() -> Self {
        Self {
            identities: Mutex::new(Vec::new()),
        }
    }
}

impl Default for HistogramRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceRecognizer for HistogramRecognizer {
    fn name(&self) -> &'static str {
        "cpu-histogram"
    }

    fn train(&mut self, samples: &[LabeledSample]) -> Result<()> {
        if samples.is_empty() {
            return Err(anyhow!("cannot train on an empty corpus"));
        }

        let mut sums: Vec<(u32, Vec<f32>, usize)> = Vec::new();
        for sample in samples {
            let histogram = intensity_histogram(&sample.image);
            match sums.iter_mut().find(|(id, _, _)| *id == sample.identity) {
                Some((_, sum, count)) => {
                    for (acc, value) in sum.iter_mut().zip(histogram.iter()) {
                        *acc += value;
                    }
                    *count += 1;
                }
                None => sums.push((sample.identity, histogram, 1)),
            }
        }

        let mut identities: Vec<IdentityHistogram> = sums
            .into_iter()
            .map(|(identity, sum, count)| IdentityHistogram {
                identity,
                histogram: sum.iter().map(|value| value / count as f32).collect(),
            })
            .collect();
        identities.sort_by_key(|entry| entry.identity);

        *self
            .identities
            .lock()
            .map_err(|_| anyhow!("recognizer model lock poisoned"))? = identities;
        Ok(())
    }

    fn predict(&self, face: &GrayImage) -> Result<Prediction> {
        let identities = self
            .identities
            .lock()
            .map_err(|_| anyhow!("recognizer model lock poisoned"))?;
        if identities.is_empty() {
            return Err(anyhow!("recognizer has no trained identities"));
        }

        let histogram = intensity_histogram(face);
        let mut best: Option<(u32, f32)> = None;
        for entry in identities.iter() {
            let distance = chi_square(&histogram, &entry.histogram);
            if best.map_or(true, |(_, current)| distance < current) {
                best = Some((entry.identity, distance));
            }
        }
        let (identity, distance) = best.expect("non-empty model");
        Ok(Prediction {
            identity,
            confidence: (distance * CONFIDENCE_SCALE).min(100.0),
        })
    }

    fn save(&self, path: &Path) -> Result<()> {
        let identities = self
            .identities
            .lock()
            .map_err(|_| anyhow!("recognizer model lock poisoned"))?
            .clone();
        let payload = serde_json::to_vec(&identities).context("serialize recognizer model")?;
        let artifact = ModelArtifact {
            version: MODEL_VERSION,
            checksum: hex::encode(Sha256::digest(&payload)),
            identities,
        };
        let encoded = serde_json::to_vec_pretty(&artifact).context("serialize model artifact")?;
        write_atomic(path, &encoded)
            .with_context(|| format!("write recognizer model {}", path.display()))?;
        Ok(())
    }
}

fn intensity_histogram(image: &GrayImage) -> Vec<f32> {
    let mut bins = vec![0.0f32; HISTOGRAM_BINS];
    let pixels = image.as_raw();
    if pixels.is_empty() {
        return bins;
    }
    let divisor = 256 / HISTOGRAM_BINS;
    for &pixel in pixels {
        bins[pixel as usize / divisor] += 1.0;
    }
    let total = pixels.len() as f32;
    for bin in bins.iter_mut() {
        *bin /= total;
    }
    bins
}

fn chi_square(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let denom = x + y;
            if denom > f32::EPSILON {
                (x - y) * (x - y) / denom
            } else {
                0.0
            }
        })
        .sum()
}

// ----------------------------------------------------------------------------
// Emotion classification
// ----------------------------------------------------------------------------

/// Brightness-band emotion labeler. A placeholder heuristic: dark crops
/// read "sad", mid-range "neutral", bright "happy".
pub struct BrightnessEmotionClassifier;

impl BrightnessEmotionClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BrightnessEmotionClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl EmotionClassifier for BrightnessEmotionClassifier {
    fn name(&self) -> &'static str {
        "cpu-brightness-band"
    }

    fn classify(&mut self, face: &GrayImage) -> Result<String> {
        let pixels = face.as_raw();
        if pixels.is_empty() {
            return Err(anyhow!("empty face crop"));
        }
        let mean =
            pixels.iter().map(|&px| px as u64).sum::<u64>() as f64 / pixels.len() as f64;
        let label = if mean < 85.0 {
            "sad"
        } else if mean < 170.0 {
            "neutral"
        } else {
            "happy"
        };
        Ok(label.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn flat(shade: u8) -> GrayImage {
        GrayImage::from_pixel(16, 16, Luma([shade]))
    }

    fn checkerboard() -> GrayImage {
        GrayImage::from_fn(16, 16, |x, y| {
            if (x + y) % 2 == 0 {
                Luma([255u8])
            } else {
                Luma([0u8])
            }
        })
    }

    #[test]
    fn subtractor_seeds_then_flags_change() {
        let mut subtractor = RunningMeanSubtractor::new();
        let first = subtractor.apply(&flat(50)).unwrap();
        assert!(first.as_raw().iter().all(|&px| px == 0));

        let second = subtractor.apply(&flat(200)).unwrap();
        assert!(second.as_raw().iter().all(|&px| px == 255));

        // Settled scene drops back out of the mask.
        let mut settled = subtractor.apply(&flat(200)).unwrap();
        for _ in 0..200 {
            settled = subtractor.apply(&flat(200)).unwrap();
        }
        assert!(settled.as_raw().iter().all(|&px| px == 0));
    }

    #[test]
    fn subtractor_reseeds_on_resolution_change() {
        let mut subtractor = RunningMeanSubtractor::new();
        subtractor.apply(&flat(10)).unwrap();
        let reseeded = subtractor
            .apply(&GrayImage::from_pixel(8, 8, Luma([240u8])))
            .unwrap();
        assert!(reseeded.as_raw().iter().all(|&px| px == 0));
    }

    #[test]
    fn detector_ignores_flat_frames_and_reports_textured_ones() {
        let mut detector = ContrastWindowFaceDetector::new();
        assert!(detector.detect(&flat(128)).unwrap().is_empty());

        let regions = detector.detect(&checkerboard()).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0], Region::new(4, 4, 8, 8));

        // An unreachable threshold suppresses even heavy texture.
        let mut strict = ContrastWindowFaceDetector::with_min_stddev(1000.0);
        assert!(strict.detect(&checkerboard()).unwrap().is_empty());
    }

    #[test]
    fn recognizer_matches_nearest_identity() {
        let mut recognizer = HistogramRecognizer::new();
        let samples = vec![
            LabeledSample {
                identity: 1,
                image: flat(40),
            },
            LabeledSample {
                identity: 2,
                image: flat(220),
            },
        ];
        recognizer.train(&samples).unwrap();

        let close = recognizer.predict(&flat(40)).unwrap();
        assert_eq!(close.identity, 1);
        assert!(close.confidence < 1.0);

        let far = recognizer.predict(&flat(220)).unwrap();
        assert_eq!(far.identity, 2);

        // A histogram unlike either identity scores as a poor match.
        let stranger = recognizer.predict(&checkerboard()).unwrap();
        assert!(stranger.confidence >= 50.0);
    }

    #[test]
    fn recognizer_rejects_empty_training_and_untrained_predict() {
        let mut recognizer = HistogramRecognizer::new();
        assert!(recognizer.train(&[]).is_err());
        assert!(recognizer.predict(&flat(10)).is_err());
    }

    #[test]
    fn model_artifact_carries_matching_checksum() {
        let tmp = tempfile::tempdir().unwrap();
        let mut recognizer = HistogramRecognizer::new();
        recognizer
            .train(&[LabeledSample {
                identity: 7,
                image: flat(90),
            }])
            .unwrap();
        let path = tmp.path().join("trainer.json");
        recognizer.save(&path).unwrap();

        let artifact: ModelArtifact =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(artifact.version, MODEL_VERSION);
        assert_eq!(artifact.identities.len(), 1);
        let payload = serde_json::to_vec(&artifact.identities).unwrap();
        assert_eq!(artifact.checksum, hex::encode(Sha256::digest(&payload)));
    }

    #[test]
    fn emotion_bands_cover_the_intensity_range() {
        let mut classifier = BrightnessEmotionClassifier::new();
        assert_eq!(classifier.classify(&flat(30)).unwrap(), "sad");
        assert_eq!(classifier.classify(&flat(120)).unwrap(), "neutral");
        assert_eq!(classifier.classify(&flat(230)).unwrap(), "happy");
    }
}
