//! Recognition state: the trainable model, the identity counter, and the
//! trained flag.
//!
//! Enrollment mutates all three plus the on-disk corpus, so the whole state
//! lives behind one mutex in the pipeline and `enroll` runs as a single
//! atomic unit: assign the next identity, persist the samples, retrain from
//! the full corpus. Interleaving two enrollments could otherwise train a
//! model that has never seen a persisted identity.

use anyhow::{anyhow, Context, Result};
use image::GrayImage;

use crate::analysis::{FaceRecognizer, Prediction};
use crate::store::ArtifactStore;

/// Outcome of classifying one face crop against the trained model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FaceMatch {
    /// Confidence was below the match threshold.
    Known { identity: u32, confidence: f32 },
    /// Confidence at or above the threshold; the face needs enrollment.
    Unknown { confidence: f32 },
}

pub struct RecognitionState {
    recognizer: Box<dyn FaceRecognizer>,
    next_identity: u32,
    trained: bool,
    match_threshold: f32,
}

impl RecognitionState {
    pub fn new(recognizer: Box<dyn FaceRecognizer>, match_threshold: f32) -> Self {
        Self {
            recognizer,
            next_identity: 0,
            trained: false,
            match_threshold,
        }
    }

    /// True once at least one identity has been trained into the model.
    /// Always false while the corpus holds zero identities.
    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Highest identity assigned so far.
    pub fn last_identity(&self) -> u32 {
        self.next_identity
    }

    /// Train from the persisted corpus and advance the identity counter past
    /// every id already on disk, so a restart never reuses an identity.
    pub fn bootstrap(&mut self, store: &ArtifactStore) -> Result<()> {
        self.next_identity = self.next_identity.max(store.highest_identity()?);
        self.train_from_corpus(store)
    }

    /// Classify a face crop. Only valid once the model is trained.
    pub fn classify(&self, face: &GrayImage) -> Result<FaceMatch> {
        if !self.trained {
            return Err(anyhow!("recognizer is not trained"));
        }
        let Prediction {
            identity,
            confidence,
        } = self.recognizer.predict(face).context("predict face")?;
        if confidence < self.match_threshold {
            Ok(FaceMatch::Known {
                identity,
                confidence,
            })
        } else {
            Ok(FaceMatch::Unknown { confidence })
        }
    }

    /// Enroll a new identity from one face crop.
    ///
    /// Assigns the next identity id, persists the sample copies, and
    /// retrains from the full corpus. Returns the new id and the path of the
    /// last persisted sample. The caller holds the shared lock, making this
    /// atomic with respect to concurrent enrollments.
    pub fn enroll(
        &mut self,
        store: &ArtifactStore,
        face: &GrayImage,
    ) -> Result<(u32, std::path::PathBuf)> {
        self.next_identity += 1;
        let identity = self.next_identity;
        let sample_path = store.save_identity_samples(identity, face)?;
        self.train_from_corpus(store)?;
        log::info!("enrolled identity {identity}");
        Ok((identity, sample_path))
    }

    /// Retrain the model from every persisted sample. An empty corpus leaves
    /// the model untrained.
    pub fn train_from_corpus(&mut self, store: &ArtifactStore) -> Result<()> {
        let samples = store.load_face_corpus()?;
        if samples.is_empty() {
            log::info!("no face samples on disk; recognizer left untrained");
            self.trained = false;
            return Ok(());
        }

        let identities = {
            let mut ids: Vec<u32> = samples.iter().map(|sample| sample.identity).collect();
            ids.sort_unstable();
            ids.dedup();
            ids.len()
        };
        self.recognizer
            .train(&samples)
            .context("train recognizer")?;
        self.recognizer
            .save(store.model_path())
            .context("persist recognizer model")?;
        self.trained = true;
        log::info!(
            "trained recognizer with {} identity(ies) from {} sample(s)",
            identities,
            samples.len()
        );
        Ok(())
    }
}
