//! Emotion recognition handler.
//!
//! Detects faces and classifies only the first one, annotating it and
//! naming the dominant emotion. Frames with no faces yield an empty result.

use image::{imageops, Rgb, RgbImage};

use super::{crop_region, outline_region, EmotionClassifier, FaceDetector, Outcome};
use crate::HandlerError;

const EMOTION_OUTLINE: Rgb<u8> = Rgb([255, 0, 0]);

pub struct EmotionRecognitionHandler {
    detector: Box<dyn FaceDetector>,
    classifier: Box<dyn EmotionClassifier>,
}

impl EmotionRecognitionHandler {
    pub fn new(detector: Box<dyn FaceDetector>, classifier: Box<dyn EmotionClassifier>) -> Self {
        Self {
            detector,
            classifier,
        }
    }

    pub fn process(&mut self, image: &mut RgbImage) -> Result<Outcome, HandlerError> {
        let gray = imageops::grayscale(image);
        let regions = self
            .detector
            .detect(&gray)
            .map_err(HandlerError::capability)?;

        // Only the first detected face is classified.
        let Some(region) = regions.first() else {
            return Ok(Outcome::silent());
        };
        let crop = crop_region(&gray, region);
        let emotion = self
            .classifier
            .classify(&crop)
            .map_err(HandlerError::capability)?;
        outline_region(image, region, EMOTION_OUTLINE);
        Ok(Outcome::retained(format!("Emotion \"{emotion}\" detected")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::providers::stub::{FixedEmotionClassifier, ScriptedFaceDetector};
    use crate::analysis::Region;

    fn frame() -> RgbImage {
        RgbImage::from_pixel(24, 24, Rgb([60, 60, 60]))
    }

    #[test]
    fn no_faces_yields_empty_result() {
        let mut handler = EmotionRecognitionHandler::new(
            Box::new(ScriptedFaceDetector::empty()),
            Box::new(FixedEmotionClassifier::new("happy")),
        );
        let outcome = handler.process(&mut frame()).unwrap();
        assert!(outcome.message.is_empty());
        assert!(!outcome.retain);
    }

    #[test]
    fn first_face_names_the_emotion() {
        let mut handler = EmotionRecognitionHandler::new(
            Box::new(ScriptedFaceDetector::with_regions(vec![
                Region::new(2, 2, 8, 8),
                Region::new(14, 14, 8, 8),
            ])),
            Box::new(FixedEmotionClassifier::new("surprised")),
        );
        let mut image = frame();
        let outcome = handler.process(&mut image).unwrap();
        assert_eq!(outcome.message, "Emotion \"surprised\" detected");
        assert!(outcome.retain);
        // The first face was annotated; the second never was.
        assert_eq!(*image.get_pixel(2, 2), EMOTION_OUTLINE);
        assert_eq!(*image.get_pixel(14, 14), Rgb([60, 60, 60]));
    }
}
