//! Face recognition handler.
//!
//! For each detected face: classify against the trained model when one
//! exists; confidence below the match threshold is a match. Anything else,
//! including an untrained model, enrolls the face as a new identity.
//! Enrollment returns its message immediately, skipping any remaining faces
//! in the frame; a frame whose faces all match reports the last match seen.

use anyhow::anyhow;
use image::{imageops, Rgb, RgbImage};
use std::sync::Arc;

use super::{crop_region, outline_region, FaceDetector, Outcome};
use crate::pipeline::SharedRecognition;
use crate::recognition::FaceMatch;
use crate::store::ArtifactStore;
use crate::HandlerError;

const FACE_OUTLINE: Rgb<u8> = Rgb([0, 0, 255]);

pub struct FaceRecognitionHandler {
    detector: Box<dyn FaceDetector>,
    state: SharedRecognition,
    store: Arc<ArtifactStore>,
}

impl FaceRecognitionHandler {
    pub fn new(
        detector: Box<dyn FaceDetector>,
        state: SharedRecognition,
        store: Arc<ArtifactStore>,
    ) -> Self {
        Self {
            detector,
            state,
            store,
        }
    }

    pub fn process(&mut self, image: &mut RgbImage) -> Result<Outcome, HandlerError> {
        let gray = imageops::grayscale(image);
        let regions = self
            .detector
            .detect(&gray)
            .map_err(HandlerError::capability)?;

        let mut last_seen: Option<(u32, f32)> = None;
        for region in &regions {
            outline_region(image, region, FACE_OUTLINE);
            let crop = crop_region(&gray, region);

            let mut state = self
                .state
                .lock()
                .map_err(|_| HandlerError::capability(anyhow!("recognition state lock poisoned")))?;

            if state.is_trained() {
                match state.classify(&crop).map_err(HandlerError::capability)? {
                    FaceMatch::Known {
                        identity,
                        confidence,
                    } => {
                        last_seen = Some((identity, confidence));
                        continue;
                    }
                    FaceMatch::Unknown { .. } => {}
                }
            }

            // Unknown face or untrained model: enroll and report right away,
            // leaving any remaining faces in this frame for later frames.
            let (_, sample_path) = state
                .enroll(&self.store, &crop)
                .map_err(HandlerError::storage)?;
            return Ok(Outcome::retained(format!(
                "New face detected and saved as {}",
                sample_path.display()
            )));
        }

        match last_seen {
            Some((identity, confidence)) => Ok(Outcome::retained(format!(
                "Face recognition completed: saw user User {} with confidence {}%",
                identity,
                (100.0 - confidence).round() as i32
            ))),
            None => Ok(Outcome::silent()),
        }
    }
}
