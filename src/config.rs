//! Daemon configuration.
//!
//! Layered the usual way: a JSON config file named by `ARGUS_CONFIG`,
//! field-by-field `ARGUS_*` environment overrides, then validation.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::demux::DEFAULT_MAX_PENDING_BYTES;

const DEFAULT_API_ADDR: &str = "127.0.0.1:7799";
const DEFAULT_FACE_CORPUS_DIR: &str = "dataset";
const DEFAULT_MOTION_DIR: &str = "img_motion_det";
const DEFAULT_QUEUE_CAPACITY: usize = 30;
const DEFAULT_RETAINED_RESULTS: usize = 50;
const DEFAULT_MAX_SAVED_IMAGES: usize = 50;
const DEFAULT_SAMPLES_PER_IDENTITY: u32 = 5;
const DEFAULT_MATCH_THRESHOLD: f32 = 50.0;
const DEFAULT_MASK_THRESHOLD: u8 = 200;
const DEFAULT_MIN_REGION_AREA: u32 = 100;

#[derive(Debug, Deserialize, Default)]
struct StreamerConfigFile {
    api_addr: Option<String>,
    storage: Option<StorageConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    analysis: Option<AnalysisConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    face_corpus_dir: Option<PathBuf>,
    motion_snapshot_dir: Option<PathBuf>,
    max_saved_images: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    queue_capacity: Option<usize>,
    retained_results: Option<usize>,
    max_pending_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct AnalysisConfigFile {
    samples_per_identity: Option<u32>,
    match_threshold: Option<f32>,
    mask_threshold: Option<u8>,
    min_region_area: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Listen address for the ingestion/retrieval API.
    pub api_addr: String,
    /// Face corpus tree; enrollment samples live here and are never pruned.
    pub face_corpus_dir: PathBuf,
    /// Motion snapshot tree, bucketed by date.
    pub motion_snapshot_dir: PathBuf,
    /// Frame queue capacity; producers block while it is full.
    pub queue_capacity: usize,
    /// Retained processed-frame snapshots.
    pub retained_results: usize,
    /// Per-date-bucket motion snapshot retention.
    pub max_saved_images: usize,
    /// Sample copies persisted per enrolled identity.
    pub samples_per_identity: u32,
    /// Recognition confidence threshold (0-100 scale, lower is better);
    /// values below it are matches.
    pub match_threshold: f32,
    /// Foreground mask threshold for motion segmentation.
    pub mask_threshold: u8,
    /// Minimum foreground region area, in pixels, that counts as motion.
    pub min_region_area: u32,
    /// Per-stream ceiling on bytes buffered awaiting a frame boundary.
    pub max_pending_bytes: usize,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            api_addr: DEFAULT_API_ADDR.to_string(),
            face_corpus_dir: PathBuf::from(DEFAULT_FACE_CORPUS_DIR),
            motion_snapshot_dir: PathBuf::from(DEFAULT_MOTION_DIR),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retained_results: DEFAULT_RETAINED_RESULTS,
            max_saved_images: DEFAULT_MAX_SAVED_IMAGES,
            samples_per_identity: DEFAULT_SAMPLES_PER_IDENTITY,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            mask_threshold: DEFAULT_MASK_THRESHOLD,
            min_region_area: DEFAULT_MIN_REGION_AREA,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
        }
    }
}

impl StreamerConfig {
    /// Load from `ARGUS_CONFIG` (if set), apply `ARGUS_*` overrides, then
    /// validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ARGUS_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Same layering with an explicit config file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => StreamerConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: StreamerConfigFile) -> Self {
        let defaults = Self::default();
        let storage = file.storage.unwrap_or_default();
        let pipeline = file.pipeline.unwrap_or_default();
        let analysis = file.analysis.unwrap_or_default();
        Self {
            api_addr: file.api_addr.unwrap_or(defaults.api_addr),
            face_corpus_dir: storage.face_corpus_dir.unwrap_or(defaults.face_corpus_dir),
            motion_snapshot_dir: storage
                .motion_snapshot_dir
                .unwrap_or(defaults.motion_snapshot_dir),
            queue_capacity: pipeline.queue_capacity.unwrap_or(defaults.queue_capacity),
            retained_results: pipeline
                .retained_results
                .unwrap_or(defaults.retained_results),
            max_saved_images: storage.max_saved_images.unwrap_or(defaults.max_saved_images),
            samples_per_identity: analysis
                .samples_per_identity
                .unwrap_or(defaults.samples_per_identity),
            match_threshold: analysis.match_threshold.unwrap_or(defaults.match_threshold),
            mask_threshold: analysis.mask_threshold.unwrap_or(defaults.mask_threshold),
            min_region_area: analysis.min_region_area.unwrap_or(defaults.min_region_area),
            max_pending_bytes: pipeline
                .max_pending_bytes
                .unwrap_or(defaults.max_pending_bytes),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("ARGUS_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(dir) = std::env::var("ARGUS_FACE_CORPUS_DIR") {
            if !dir.trim().is_empty() {
                self.face_corpus_dir = PathBuf::from(dir);
            }
        }
        if let Ok(dir) = std::env::var("ARGUS_MOTION_DIR") {
            if !dir.trim().is_empty() {
                self.motion_snapshot_dir = PathBuf::from(dir);
            }
        }
        if let Ok(capacity) = std::env::var("ARGUS_QUEUE_CAPACITY") {
            self.queue_capacity = capacity
                .parse()
                .map_err(|_| anyhow!("ARGUS_QUEUE_CAPACITY must be an integer"))?;
        }
        if let Ok(retained) = std::env::var("ARGUS_RETAINED_RESULTS") {
            self.retained_results = retained
                .parse()
                .map_err(|_| anyhow!("ARGUS_RETAINED_RESULTS must be an integer"))?;
        }
        if let Ok(max_saved) = std::env::var("ARGUS_MAX_SAVED_IMAGES") {
            self.max_saved_images = max_saved
                .parse()
                .map_err(|_| anyhow!("ARGUS_MAX_SAVED_IMAGES must be an integer"))?;
        }
        if let Ok(ceiling) = std::env::var("ARGUS_MAX_PENDING_BYTES") {
            self.max_pending_bytes = ceiling
                .parse()
                .map_err(|_| anyhow!("ARGUS_MAX_PENDING_BYTES must be an integer"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(anyhow!("queue_capacity must be greater than zero"));
        }
        if self.retained_results == 0 {
            return Err(anyhow!("retained_results must be greater than zero"));
        }
        if self.max_saved_images == 0 {
            return Err(anyhow!("max_saved_images must be greater than zero"));
        }
        if self.samples_per_identity == 0 {
            return Err(anyhow!("samples_per_identity must be greater than zero"));
        }
        if !(0.0..=100.0).contains(&self.match_threshold) {
            return Err(anyhow!("match_threshold must be within 0-100"));
        }
        if self.max_pending_bytes < 64 * 1024 {
            return Err(anyhow!("max_pending_bytes must be at least 64 KiB"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<StreamerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        StreamerConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_capacities_are_rejected() {
        let mut cfg = StreamerConfig::default();
        cfg.queue_capacity = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = StreamerConfig::default();
        cfg.retained_results = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = StreamerConfig::default();
        cfg.max_pending_bytes = 1024;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let mut cfg = StreamerConfig::default();
        cfg.match_threshold = 120.0;
        assert!(cfg.validate().is_err());
    }
}
