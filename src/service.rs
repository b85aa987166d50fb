//! Per-connection stream handling.
//!
//! One `handle_stream` call consumes one connection's ordered chunk
//! sequence: demux frames, submit them to the pipeline (blocking while the
//! queue is full), and produce exactly one terminal summary. Any
//! stream-level failure (a chunk read error, the demux ceiling, a poisoned
//! pipeline) collapses to a generic terminal error message; per-frame
//! handler failures never reach here.

use anyhow::{Context, Result};
use rand::RngCore;
use std::sync::Arc;

use crate::demux::FrameDemuxer;
use crate::pipeline::Pipeline;
use crate::AnalysisKind;

/// One unit of an incoming stream: a slice of encoded video plus the
/// analysis tag that applies from here on.
#[derive(Clone, Debug)]
pub struct StreamChunk {
    pub data: Vec<u8>,
    pub kind_tag: String,
}

/// The single terminal response of a stream.
#[derive(Clone, Debug)]
pub struct StreamSummary {
    pub message: String,
    pub task_id: String,
}

pub struct StreamService {
    pipeline: Arc<Pipeline>,
    max_pending_bytes: usize,
}

impl StreamService {
    pub fn new(pipeline: Arc<Pipeline>, max_pending_bytes: usize) -> Self {
        Self {
            pipeline,
            max_pending_bytes,
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Consume one stream to completion and return its terminal summary.
    pub fn handle_stream<I>(&self, chunks: I) -> StreamSummary
    where
        I: IntoIterator<Item = Result<StreamChunk>>,
    {
        let task_id = new_task_id();
        match self.run_stream(chunks, &task_id) {
            Ok(()) => StreamSummary {
                message: "Stream processing completed".to_string(),
                task_id,
            },
            Err(err) => {
                log::error!("stream {task_id} aborted: {err:#}");
                StreamSummary {
                    message: "Stream processing error".to_string(),
                    task_id,
                }
            }
        }
    }

    fn run_stream<I>(&self, chunks: I, task_id: &str) -> Result<()>
    where
        I: IntoIterator<Item = Result<StreamChunk>>,
    {
        let mut demuxer = FrameDemuxer::new(self.max_pending_bytes);
        let mut submitted = 0u64;
        for chunk in chunks {
            let chunk = chunk.context("read stream chunk")?;
            let kind = AnalysisKind::parse(&chunk.kind_tag);
            if kind.is_none() {
                log::debug!(
                    "stream {task_id}: unrecognized analysis tag {:?}",
                    chunk.kind_tag
                );
            }
            for frame in demuxer.ingest(&chunk.data, kind)? {
                self.pipeline
                    .submit(frame)
                    .context("submit frame to pipeline")?;
                submitted += 1;
            }
        }
        log::info!(
            "stream {task_id}: {submitted} frame(s) submitted, {} undecodable",
            demuxer.frames_dropped()
        );
        Ok(())
    }
}

/// Random id identifying one stream in logs and terminal responses.
pub fn new_task_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::providers::stub::{
        FixedEmotionClassifier, ScriptedFaceDetector, ScriptedRecognizer, StaticMaskSubtractor,
    };
    use crate::analysis::providers::ProviderSet;
    use crate::analysis::Region;
    use crate::pipeline::bootstrap_pipeline;
    use crate::snapshot::encode_jpeg;
    use crate::StreamerConfig;
    use anyhow::anyhow;
    use std::time::Duration;

    fn service(dir: &std::path::Path) -> StreamService {
        let mut cfg = StreamerConfig::default();
        cfg.face_corpus_dir = dir.join("dataset");
        cfg.motion_snapshot_dir = dir.join("motion");
        let providers = ProviderSet {
            face_detector: Box::new(ScriptedFaceDetector::empty()),
            emotion_detector: Box::new(ScriptedFaceDetector::with_regions(vec![Region::new(
                2, 2, 8, 8,
            )])),
            recognizer: Box::new(ScriptedRecognizer::new()),
            subtractor: Box::new(StaticMaskSubtractor::uniform(0)),
            emotion_classifier: Box::new(FixedEmotionClassifier::new("calm")),
        };
        let (pipeline, _, _) = bootstrap_pipeline(&cfg, providers).unwrap();
        StreamService::new(pipeline, cfg.max_pending_bytes)
    }

    fn jpeg_chunk(kind_tag: &str) -> StreamChunk {
        let image = image::RgbImage::from_pixel(16, 16, image::Rgb([90, 90, 90]));
        StreamChunk {
            data: encode_jpeg(&image).unwrap(),
            kind_tag: kind_tag.to_string(),
        }
    }

    #[test]
    fn completed_stream_reports_terminal_summary() {
        let tmp = tempfile::tempdir().unwrap();
        let service = service(tmp.path());
        let summary =
            service.handle_stream(vec![Ok(jpeg_chunk("emotion_recognition"))]);
        assert_eq!(summary.message, "Stream processing completed");
        assert_eq!(summary.task_id.len(), 16);

        assert!(service.pipeline().wait_idle(Duration::from_secs(5)));
        assert_eq!(service.pipeline().result_count(), 1);
    }

    #[test]
    fn chunk_error_aborts_with_generic_message() {
        let tmp = tempfile::tempdir().unwrap();
        let service = service(tmp.path());
        let summary = service.handle_stream(vec![
            Ok(jpeg_chunk("emotion_recognition")),
            Err(anyhow!("connection reset")),
        ]);
        assert_eq!(summary.message, "Stream processing error");
        assert!(!summary.task_id.is_empty());
    }

    #[test]
    fn task_ids_are_unique_per_stream() {
        let tmp = tempfile::tempdir().unwrap();
        let service = service(tmp.path());
        let first = service.handle_stream(Vec::new());
        let second = service.handle_stream(Vec::new());
        assert_ne!(first.task_id, second.task_id);
    }
}
