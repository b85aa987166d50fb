//! Analysis handlers and the capability-provider traits they call through.
//!
//! The vision algorithms themselves (face detection, face recognition,
//! background subtraction, emotion classification) are external
//! collaborators. Handlers talk to them only through the traits below, so
//! the pipeline is testable with scripted providers and deployable against
//! any concrete implementation.
//!
//! # Provider contract
//!
//! Implementations receive borrowed pixel buffers and return plain result
//! structs. They must not retain the buffers beyond the call, and any
//! internal state (a running background model, a trained recognizer) is
//! theirs to manage behind `&mut self`.

use anyhow::Result;
use image::{imageops, GrayImage, Rgb, RgbImage};

pub mod emotion;
pub mod face;
pub mod motion;
pub mod providers;

pub use emotion::EmotionRecognitionHandler;
pub use face::FaceRecognitionHandler;
pub use motion::MotionDetectionHandler;

/// What a handler made of one frame.
///
/// `message` is the human-readable result (empty when there was nothing to
/// report); `retain` asks the pipeline to keep a snapshot of the processed
/// frame. Advisory results such as "no significant motion" carry a message
/// but no snapshot.
#[derive(Clone, Debug, Default)]
pub struct Outcome {
    pub message: String,
    pub retain: bool,
}

impl Outcome {
    /// Nothing to report; no snapshot.
    pub fn silent() -> Self {
        Self::default()
    }

    /// Report a result and retain a snapshot of the frame.
    pub fn retained(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retain: true,
        }
    }

    /// Report a result without retaining a snapshot.
    pub fn advisory(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retain: false,
        }
    }
}

/// Axis-aligned pixel region inside a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Identity prediction from a trained recognizer.
///
/// Confidence is a distance-like score on a 0-100 scale where lower is
/// better; the pipeline treats values below its match threshold as a match.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Prediction {
    pub identity: u32,
    pub confidence: f32,
}

/// A face crop labeled with the identity it belongs to, used for training.
#[derive(Clone, Debug)]
pub struct LabeledSample {
    pub identity: u32,
    pub image: GrayImage,
}

/// Locates faces in a grayscale frame.
pub trait FaceDetector: Send {
    /// Backend identifier for logs.
    fn name(&self) -> &'static str;

    /// Return the bounding regions of every detected face.
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<Region>>;
}

/// Trainable face recognizer.
pub trait FaceRecognizer: Send {
    fn name(&self) -> &'static str;

    /// Replace the model with one trained from the full labeled corpus.
    fn train(&mut self, samples: &[LabeledSample]) -> Result<()>;

    /// Predict the identity of a face crop against the trained model.
    fn predict(&self, face: &GrayImage) -> Result<Prediction>;

    /// Persist the trained model artifact.
    fn save(&self, path: &std::path::Path) -> Result<()>;
}

/// Running foreground/background model.
pub trait BackgroundSubtractor: Send {
    fn name(&self) -> &'static str;

    /// Update the background model with `frame` and return the foreground
    /// mask, one byte per pixel, higher meaning more foreground.
    fn apply(&mut self, frame: &GrayImage) -> Result<GrayImage>;
}

/// Classifies the dominant emotion of a face crop.
pub trait EmotionClassifier: Send {
    fn name(&self) -> &'static str;

    fn classify(&mut self, face: &GrayImage) -> Result<String>;
}

/// Crop a region out of a grayscale frame, clamped to the frame bounds.
pub(crate) fn crop_region(image: &GrayImage, region: &Region) -> GrayImage {
    let (width, height) = image.dimensions();
    let x = region.x.min(width.saturating_sub(1));
    let y = region.y.min(height.saturating_sub(1));
    let w = region.width.min(width - x).max(1);
    let h = region.height.min(height - y).max(1);
    imageops::crop_imm(image, x, y, w, h).to_image()
}

/// Draw a two-pixel hollow rectangle around `region`, clamped to bounds.
pub(crate) fn outline_region(image: &mut RgbImage, region: &Region, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || region.width == 0 || region.height == 0 {
        return;
    }
    let x0 = region.x.min(width - 1);
    let y0 = region.y.min(height - 1);
    let x1 = region.x.saturating_add(region.width).min(width) - 1;
    let y1 = region.y.saturating_add(region.height).min(height) - 1;

    for thickness in 0..2u32 {
        let top = (y0 + thickness).min(height - 1);
        let bottom = y1.saturating_sub(thickness);
        for x in x0..=x1 {
            image.put_pixel(x, top, color);
            image.put_pixel(x, bottom, color);
        }
        let left = (x0 + thickness).min(width - 1);
        let right = x1.saturating_sub(thickness);
        for y in y0..=y1 {
            image.put_pixel(left, y, color);
            image.put_pixel(right, y, color);
        }
    }
}
