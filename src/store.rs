//! On-disk artifact trees.
//!
//! Two independently retained trees plus one model artifact:
//!
//! - Face corpus: `<face_root>/User_<id>/User.<id>.<n>.jpg`. Enrollment
//!   samples are never pruned automatically; the tree is the training
//!   input for every retrain and survives restarts.
//! - Motion snapshots: `<motion_root>/<YYYY-MM-DD>/frame_<stamp>.jpg`.
//!   Each date bucket keeps only the newest `max_saved_images` files,
//!   oldest-by-creation-time removed first.
//! - Recognizer model: `<face_root>/trainer.json`, rewritten on retrain.
//!
//! All writes go through a temp-file-plus-rename so readers never observe
//! a half-written artifact.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use image::{GrayImage, RgbImage};

use crate::analysis::LabeledSample;
use crate::snapshot::encode_jpeg;

const MODEL_FILE_NAME: &str = "trainer.json";

fn identity_dir_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^User_(\d+)$").unwrap())
}

/// Face corpus and motion snapshot storage.
pub struct ArtifactStore {
    face_root: PathBuf,
    motion_root: PathBuf,
    model_path: PathBuf,
    max_saved_images: usize,
    samples_per_identity: u32,
}

impl ArtifactStore {
    /// Open the store, creating both trees if needed.
    pub fn open(
        face_root: impl Into<PathBuf>,
        motion_root: impl Into<PathBuf>,
        max_saved_images: usize,
        samples_per_identity: u32,
    ) -> Result<Self> {
        let face_root = face_root.into();
        let motion_root = motion_root.into();
        fs::create_dir_all(&face_root)
            .with_context(|| format!("create face corpus dir {}", face_root.display()))?;
        fs::create_dir_all(&motion_root)
            .with_context(|| format!("create motion snapshot dir {}", motion_root.display()))?;
        let model_path = face_root.join(MODEL_FILE_NAME);
        Ok(Self {
            face_root,
            motion_root,
            model_path,
            max_saved_images,
            samples_per_identity,
        })
    }

    pub fn face_root(&self) -> &Path {
        &self.face_root
    }

    pub fn motion_root(&self) -> &Path {
        &self.motion_root
    }

    /// Path of the persisted recognizer model artifact.
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    // -------------------- Face corpus --------------------

    /// Persist the enrollment samples for a newly assigned identity.
    ///
    /// Writes `samples_per_identity` copies of the crop under a fresh
    /// `User_<id>` directory and returns the path of the last one written.
    pub fn save_identity_samples(&self, identity: u32, face: &GrayImage) -> Result<PathBuf> {
        let dir = self.face_root.join(format!("User_{identity}"));
        fs::create_dir_all(&dir)
            .with_context(|| format!("create identity dir {}", dir.display()))?;
        let encoded = encode_jpeg(face)?;

        let mut last_path = dir.clone();
        for sample in 1..=self.samples_per_identity {
            let path = dir.join(format!("User.{identity}.{sample}.jpg"));
            write_atomic(&path, &encoded)
                .with_context(|| format!("write face sample {}", path.display()))?;
            last_path = path;
        }
        Ok(last_path)
    }

    /// Load every sample in the corpus, labeled by its identity directory.
    ///
    /// Unreadable samples are skipped with a warning so one corrupt file
    /// cannot block retraining.
    pub fn load_face_corpus(&self) -> Result<Vec<LabeledSample>> {
        let mut samples = Vec::new();
        for (identity, dir) in self.identity_dirs()? {
            let mut entries: Vec<PathBuf> = fs::read_dir(&dir)
                .with_context(|| format!("read identity dir {}", dir.display()))?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| is_jpeg_file(path))
                .collect();
            entries.sort();
            for path in entries {
                match image::open(&path) {
                    Ok(decoded) => samples.push(LabeledSample {
                        identity,
                        image: decoded.to_luma8(),
                    }),
                    Err(err) => {
                        log::warn!("skipping unreadable face sample {}: {}", path.display(), err)
                    }
                }
            }
        }
        Ok(samples)
    }

    /// Highest identity id present in the corpus, or zero when empty.
    pub fn highest_identity(&self) -> Result<u32> {
        Ok(self
            .identity_dirs()?
            .into_iter()
            .map(|(identity, _)| identity)
            .max()
            .unwrap_or(0))
    }

    fn identity_dirs(&self) -> Result<Vec<(u32, PathBuf)>> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(&self.face_root)
            .with_context(|| format!("read face corpus {}", self.face_root.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(captures) = identity_dir_re().captures(name) {
                let identity: u32 = captures[1]
                    .parse()
                    .map_err(|_| anyhow!("identity dir {} out of range", name))?;
                dirs.push((identity, entry.path()));
            }
        }
        dirs.sort_by_key(|(identity, _)| *identity);
        Ok(dirs)
    }

    // -------------------- Motion snapshots --------------------

    /// Save an annotated motion frame into its date bucket, then prune the
    /// bucket to the newest `max_saved_images` files.
    ///
    /// Callers serialize on the shared pipeline lock; the store itself does
    /// not guard against concurrent pruning of one bucket.
    pub fn save_motion_snapshot(
        &self,
        image: &RgbImage,
        now: DateTime<Local>,
    ) -> Result<PathBuf> {
        let bucket = self.motion_root.join(now.format("%Y-%m-%d").to_string());
        fs::create_dir_all(&bucket)
            .with_context(|| format!("create motion bucket {}", bucket.display()))?;

        let path = bucket.join(format!("frame_{}.jpg", now.format("%Y-%m-%d_%H-%M-%S%.3f")));
        write_atomic(&path, &encode_jpeg(image)?)
            .with_context(|| format!("write motion snapshot {}", path.display()))?;

        let removed = self.prune_bucket(&bucket)?;
        if removed > 0 {
            log::info!(
                "pruned {} old motion snapshot(s) from {}",
                removed,
                bucket.display()
            );
        }
        Ok(path)
    }

    /// Remove the oldest files of a date bucket until at most
    /// `max_saved_images` remain. Returns how many were removed.
    pub fn prune_bucket(&self, bucket: &Path) -> Result<usize> {
        let mut files: Vec<(SystemTime, PathBuf)> = fs::read_dir(bucket)
            .with_context(|| format!("read motion bucket {}", bucket.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_jpeg_file(path))
            .map(|path| (creation_time(&path), path))
            .collect();
        if files.len() <= self.max_saved_images {
            return Ok(0);
        }

        // Name order breaks creation-time ties: snapshot names embed their
        // timestamp, so it matches chronological order.
        files.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        let excess = files.len() - self.max_saved_images;
        for (_, path) in files.into_iter().take(excess) {
            fs::remove_file(&path)
                .with_context(|| format!("remove old motion snapshot {}", path.display()))?;
        }
        Ok(excess)
    }
}

fn is_jpeg_file(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("jpg")
}

fn creation_time(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|meta| meta.created().or_else(|_| meta.modified()))
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Write a file through a temp sibling and rename so readers never see a
/// partial artifact.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn open_store(dir: &Path, max_saved: usize) -> ArtifactStore {
        ArtifactStore::open(dir.join("dataset"), dir.join("motion"), max_saved, 5).unwrap()
    }

    #[test]
    fn open_bootstraps_both_trees() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(tmp.path(), 50);
        assert!(store.face_root().is_dir());
        assert!(store.motion_root().is_dir());
        assert_eq!(store.model_path(), store.face_root().join("trainer.json"));
    }

    #[test]
    fn corpus_round_trip_and_highest_identity() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(tmp.path(), 50);
        assert_eq!(store.highest_identity().unwrap(), 0);

        let crop = GrayImage::from_pixel(12, 12, Luma([80u8]));
        let last = store.save_identity_samples(1, &crop).unwrap();
        assert!(last.ends_with("User_1/User.1.5.jpg"));
        store.save_identity_samples(3, &crop).unwrap();

        let corpus = store.load_face_corpus().unwrap();
        assert_eq!(corpus.len(), 10);
        assert_eq!(corpus.iter().filter(|s| s.identity == 1).count(), 5);
        assert_eq!(corpus.iter().filter(|s| s.identity == 3).count(), 5);
        assert_eq!(store.highest_identity().unwrap(), 3);
    }

    #[test]
    fn corpus_ignores_foreign_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(tmp.path(), 50);
        fs::create_dir_all(store.face_root().join("not_an_identity")).unwrap();
        fs::write(store.face_root().join("trainer.json"), b"{}").unwrap();
        assert!(store.load_face_corpus().unwrap().is_empty());
        assert_eq!(store.highest_identity().unwrap(), 0);
    }

    #[test]
    fn prune_keeps_newest_by_name_on_tied_timestamps() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(tmp.path(), 3);
        let bucket = store.motion_root().join("2026-08-06");
        fs::create_dir_all(&bucket).unwrap();
        for i in 0..6 {
            fs::write(bucket.join(format!("frame_2026-08-06_10-00-0{i}.000.jpg")), b"x").unwrap();
        }

        let removed = store.prune_bucket(&bucket).unwrap();
        assert_eq!(removed, 3);
        let mut kept: Vec<String> = fs::read_dir(&bucket)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        kept.sort();
        assert_eq!(
            kept,
            vec![
                "frame_2026-08-06_10-00-03.000.jpg",
                "frame_2026-08-06_10-00-04.000.jpg",
                "frame_2026-08-06_10-00-05.000.jpg",
            ]
        );
    }

    #[test]
    fn save_motion_snapshot_buckets_by_date_and_prunes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(tmp.path(), 2);
        let image = RgbImage::from_pixel(6, 6, image::Rgb([1, 2, 3]));
        let base = Local::now();
        for offset in 0..4 {
            let at = base + chrono::Duration::milliseconds(offset * 5);
            store.save_motion_snapshot(&image, at).unwrap();
        }
        let bucket = store.motion_root().join(base.format("%Y-%m-%d").to_string());
        let count = fs::read_dir(&bucket)
            .unwrap()
            .filter(|e| is_jpeg_file(&e.as_ref().unwrap().path()))
            .count();
        assert_eq!(count, 2);
    }
}
