//! Frame dispatch pipeline.
//!
//! Frames enter a bounded FIFO and a single background worker drains it,
//! routing each frame to the handler its tag selects. Non-empty results are
//! re-encoded and retained in the bounded result buffer.
//!
//! # Worker lifecycle
//!
//! At most one worker drains the queue at any moment. The active slot is an
//! `AtomicBool` claimed by compare-exchange: the first submitter after idle
//! spawns the worker, later submitters only enqueue. When the worker
//! observes the queue empty it publishes idle and then re-checks the queue:
//! an item enqueued between the emptiness check and the idle store is picked
//! up by re-claiming the slot, or by the producer that raced us, whichever
//! wins the compare-exchange. Either way no frame is stranded.
//!
//! # Failure policy
//!
//! Handler failures are local to their frame: they are logged with their
//! classification (capability vs storage) and collapse to the handler's
//! error message, which is retained like any other non-empty result. The
//! worker and the stream readers never die with a frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Local;

use crate::analysis::providers::ProviderSet;
use crate::analysis::{
    EmotionRecognitionHandler, FaceRecognitionHandler, MotionDetectionHandler, Outcome,
};
use crate::config::StreamerConfig;
use crate::frame::Frame;
use crate::queue::FrameQueue;
use crate::recognition::RecognitionState;
use crate::snapshot::{encode_jpeg, ProcessedSnapshot, ResultBuffer};
use crate::store::ArtifactStore;
use crate::AnalysisKind;

/// Recognition state shared between the face handler and, as a pure
/// serialization gate, the motion handler's disk writes. One lock on
/// purpose: identity counter, corpus writes, retraining, and snapshot
/// pruning must never interleave.
pub type SharedRecognition = Arc<Mutex<RecognitionState>>;

/// The three analysis handlers, routed by tag.
pub struct HandlerSet {
    pub face: FaceRecognitionHandler,
    pub motion: MotionDetectionHandler,
    pub emotion: EmotionRecognitionHandler,
}

impl HandlerSet {
    /// Route one frame to its handler and return the outcome.
    ///
    /// Tags that no handler matches yield an empty outcome and no side
    /// effect. Handler failures collapse to the handler's error message,
    /// retained like any other result.
    fn dispatch(&mut self, frame: &mut Frame) -> Outcome {
        let Some(kind) = frame.kind else {
            return Outcome::silent();
        };
        let outcome = match kind {
            AnalysisKind::FaceRecognition => self.face.process(&mut frame.image),
            AnalysisKind::MotionDetection => self.motion.process(&mut frame.image),
            AnalysisKind::EmotionRecognition => self.emotion.process(&mut frame.image),
        };
        match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                log::error!("{} handler failed: {}", kind.as_tag(), err);
                Outcome::retained(format!("{} error", kind.label()))
            }
        }
    }
}

pub struct Pipeline {
    queue: FrameQueue,
    worker_active: AtomicBool,
    handlers: Mutex<HandlerSet>,
    results: RwLock<ResultBuffer>,
}

impl Pipeline {
    pub fn new(handlers: HandlerSet, queue_capacity: usize, retained_results: usize) -> Arc<Self> {
        Arc::new(Self {
            queue: FrameQueue::new(queue_capacity),
            worker_active: AtomicBool::new(false),
            handlers: Mutex::new(handlers),
            results: RwLock::new(ResultBuffer::new(retained_results)),
        })
    }

    /// Enqueue a frame for processing, blocking while the queue is full,
    /// and make sure a worker is draining.
    pub fn submit(self: &Arc<Self>, frame: Frame) -> Result<()> {
        self.queue.push_blocking(frame)?;
        self.ensure_worker();
        Ok(())
    }

    fn ensure_worker(self: &Arc<Self>) {
        if self
            .worker_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let pipeline = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("argus-worker".to_string())
            .spawn(move || pipeline.drain());
        if let Err(err) = spawned {
            self.worker_active.store(false, Ordering::SeqCst);
            log::error!("failed to spawn pipeline worker: {err}");
        }
    }

    fn drain(&self) {
        loop {
            while let Some(frame) = self.queue.pop() {
                self.process(frame);
            }
            self.worker_active.store(false, Ordering::SeqCst);

            // An item may have raced in between the empty pop and the idle
            // store. Re-claim the slot and keep draining, unless a producer
            // already claimed it for a fresh worker.
            if self.queue.is_empty()
                || self
                    .worker_active
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
            {
                break;
            }
        }
    }

    fn process(&self, mut frame: Frame) {
        let outcome = {
            let Ok(mut handlers) = self.handlers.lock() else {
                log::error!("handler lock poisoned; dropping frame");
                return;
            };
            handlers.dispatch(&mut frame)
        };
        if !outcome.message.is_empty() {
            log::info!("processed frame result: {}", outcome.message);
        }
        if !outcome.retain {
            return;
        }

        let jpeg = match encode_jpeg(&frame.image) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::error!("failed to re-encode processed frame: {err:#}");
                return;
            }
        };
        let snapshot = ProcessedSnapshot {
            jpeg,
            timestamp: Local::now().to_rfc3339(),
        };
        match self.results.write() {
            Ok(mut results) => results.push(snapshot),
            Err(_) => log::error!("result buffer lock poisoned; snapshot dropped"),
        }
    }

    /// Oldest-first copy of the retained snapshots.
    pub fn snapshots(&self) -> Vec<ProcessedSnapshot> {
        self.results
            .read()
            .map(|results| results.to_vec())
            .unwrap_or_default()
    }

    pub fn result_count(&self) -> usize {
        self.results.read().map(|results| results.len()).unwrap_or(0)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// True when the queue is empty and no worker is draining.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && !self.worker_active.load(Ordering::SeqCst)
    }

    /// Wait for the visible backlog to finish, up to `timeout`.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.is_idle() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        self.is_idle()
    }
}

/// Wire a complete pipeline from configuration and capability providers:
/// open the artifact trees, train recognition state from the persisted
/// corpus, and assemble the handlers.
pub fn bootstrap_pipeline(
    cfg: &StreamerConfig,
    providers: ProviderSet,
) -> Result<(Arc<Pipeline>, SharedRecognition, Arc<ArtifactStore>)> {
    let store = Arc::new(ArtifactStore::open(
        &cfg.face_corpus_dir,
        &cfg.motion_snapshot_dir,
        cfg.max_saved_images,
        cfg.samples_per_identity,
    )?);

    let mut state = RecognitionState::new(providers.recognizer, cfg.match_threshold);
    state
        .bootstrap(&store)
        .context("train recognizer from persisted corpus")?;
    let state: SharedRecognition = Arc::new(Mutex::new(state));

    let handlers = HandlerSet {
        face: FaceRecognitionHandler::new(
            providers.face_detector,
            Arc::clone(&state),
            Arc::clone(&store),
        ),
        motion: MotionDetectionHandler::new(
            providers.subtractor,
            Arc::clone(&store),
            Arc::clone(&state),
            cfg.mask_threshold,
            cfg.min_region_area,
        ),
        emotion: EmotionRecognitionHandler::new(
            providers.emotion_detector,
            providers.emotion_classifier,
        ),
    };

    let pipeline = Pipeline::new(handlers, cfg.queue_capacity, cfg.retained_results);
    Ok((pipeline, state, store))
}
