//! Motion detection handler.
//!
//! The background subtractor yields a foreground mask; the mask is
//! thresholded and segmented into connected foreground regions, and any
//! region larger than the pixel-area floor counts as motion. Motion frames
//! are annotated, saved into the day's snapshot bucket, and the bucket is
//! pruned, all under the shared pipeline lock so corpus and snapshot disk
//! writes never interleave.

use anyhow::anyhow;
use chrono::Local;
use image::{imageops, GrayImage, Rgb, RgbImage};
use std::sync::Arc;

use super::{outline_region, BackgroundSubtractor, Outcome, Region};
use crate::pipeline::SharedRecognition;
use crate::store::ArtifactStore;
use crate::HandlerError;

const MOTION_OUTLINE: Rgb<u8> = Rgb([0, 255, 0]);

pub struct MotionDetectionHandler {
    subtractor: Box<dyn BackgroundSubtractor>,
    store: Arc<ArtifactStore>,
    gate: SharedRecognition,
    mask_threshold: u8,
    min_region_area: u32,
}

impl MotionDetectionHandler {
    pub fn new(
        subtractor: Box<dyn BackgroundSubtractor>,
        store: Arc<ArtifactStore>,
        gate: SharedRecognition,
        mask_threshold: u8,
        min_region_area: u32,
    ) -> Self {
        Self {
            subtractor,
            store,
            gate,
            mask_threshold,
            min_region_area,
        }
    }

    pub fn process(&mut self, image: &mut RgbImage) -> Result<Outcome, HandlerError> {
        let gray = imageops::grayscale(image);
        let mask = self
            .subtractor
            .apply(&gray)
            .map_err(HandlerError::capability)?;

        let regions = foreground_regions(&mask, self.mask_threshold, self.min_region_area);
        for region in &regions {
            outline_region(image, region, MOTION_OUTLINE);
        }
        if regions.is_empty() {
            // Reported but not retained: a quiet frame is not worth a
            // snapshot slot.
            return Ok(Outcome::advisory("No significant motion detected"));
        }

        // Same lock as enrollment: snapshot writes and pruning serialize
        // with face corpus mutations.
        let _guard = self
            .gate
            .lock()
            .map_err(|_| HandlerError::storage(anyhow!("pipeline state lock poisoned")))?;
        let path = self
            .store
            .save_motion_snapshot(image, Local::now())
            .map_err(HandlerError::storage)?;
        Ok(Outcome::retained(format!(
            "Motion detected and saved as {}",
            path.display()
        )))
    }
}

/// Segment a thresholded mask into 4-connected foreground regions and keep
/// those whose pixel count exceeds `min_area`.
fn foreground_regions(mask: &GrayImage, threshold: u8, min_area: u32) -> Vec<Region> {
    let (width, height) = mask.dimensions();
    let mut visited = vec![false; (width * height) as usize];
    let mut regions = Vec::new();
    let index = |x: u32, y: u32| (y * width + x) as usize;

    for start_y in 0..height {
        for start_x in 0..width {
            if visited[index(start_x, start_y)] || mask.get_pixel(start_x, start_y)[0] < threshold
            {
                continue;
            }

            let mut area = 0u32;
            let (mut min_x, mut min_y, mut max_x, mut max_y) =
                (start_x, start_y, start_x, start_y);
            let mut stack = vec![(start_x, start_y)];
            visited[index(start_x, start_y)] = true;

            while let Some((x, y)) = stack.pop() {
                area += 1;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);

                let mut visit = |nx: u32, ny: u32, stack: &mut Vec<(u32, u32)>| {
                    let idx = index(nx, ny);
                    if !visited[idx] && mask.get_pixel(nx, ny)[0] >= threshold {
                        visited[idx] = true;
                        stack.push((nx, ny));
                    }
                };
                if x > 0 {
                    visit(x - 1, y, &mut stack);
                }
                if x + 1 < width {
                    visit(x + 1, y, &mut stack);
                }
                if y > 0 {
                    visit(x, y - 1, &mut stack);
                }
                if y + 1 < height {
                    visit(x, y + 1, &mut stack);
                }
            }

            if area > min_area {
                regions.push(Region::new(
                    min_x,
                    min_y,
                    max_x - min_x + 1,
                    max_y - min_y + 1,
                ));
            }
        }
    }
    regions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::providers::stub::{ScriptedRecognizer, StaticMaskSubtractor};
    use crate::recognition::RecognitionState;
    use std::sync::Mutex;

    fn handler_with(
        subtractor: StaticMaskSubtractor,
        dir: &std::path::Path,
    ) -> (MotionDetectionHandler, Arc<ArtifactStore>) {
        let store = Arc::new(
            ArtifactStore::open(dir.join("dataset"), dir.join("motion"), 50, 5).unwrap(),
        );
        let gate: SharedRecognition = Arc::new(Mutex::new(RecognitionState::new(
            Box::new(ScriptedRecognizer::new()),
            50.0,
        )));
        let handler =
            MotionDetectionHandler::new(Box::new(subtractor), Arc::clone(&store), gate, 200, 100);
        (handler, store)
    }

    fn frame() -> RgbImage {
        RgbImage::from_pixel(64, 64, Rgb([30, 30, 30]))
    }

    #[test]
    fn quiet_mask_reports_no_motion_and_saves_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut handler, store) = handler_with(StaticMaskSubtractor::uniform(0), tmp.path());
        let outcome = handler.process(&mut frame()).unwrap();
        assert_eq!(outcome.message, "No significant motion detected");
        assert!(!outcome.retain);
        assert_eq!(std::fs::read_dir(store.motion_root()).unwrap().count(), 0);
    }

    #[test]
    fn sub_threshold_region_is_ignored() {
        // A 5x5 block is 25 pixels, under the 100-pixel area floor.
        let tmp = tempfile::tempdir().unwrap();
        let (mut handler, store) = handler_with(
            StaticMaskSubtractor::block(Region::new(10, 10, 5, 5), 255),
            tmp.path(),
        );
        let outcome = handler.process(&mut frame()).unwrap();
        assert_eq!(outcome.message, "No significant motion detected");
        assert_eq!(std::fs::read_dir(store.motion_root()).unwrap().count(), 0);
    }

    #[test]
    fn qualifying_region_saves_into_date_bucket() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut handler, store) = handler_with(
            StaticMaskSubtractor::block(Region::new(8, 8, 20, 20), 255),
            tmp.path(),
        );
        let outcome = handler.process(&mut frame()).unwrap();
        assert!(outcome.message.starts_with("Motion detected and saved as"));
        assert!(outcome.retain);

        let bucket = store
            .motion_root()
            .join(Local::now().format("%Y-%m-%d").to_string());
        assert_eq!(std::fs::read_dir(&bucket).unwrap().count(), 1);
    }

    #[test]
    fn dim_mask_stays_below_threshold() {
        // Foreground weaker than the 200 mask threshold is not motion.
        let tmp = tempfile::tempdir().unwrap();
        let (mut handler, _) = handler_with(
            StaticMaskSubtractor::block(Region::new(8, 8, 20, 20), 150),
            tmp.path(),
        );
        assert_eq!(
            handler.process(&mut frame()).unwrap().message,
            "No significant motion detected"
        );
    }

    #[test]
    fn segmentation_separates_disjoint_blobs() {
        let mut mask = GrayImage::from_pixel(40, 40, image::Luma([0u8]));
        for (ox, oy) in [(0u32, 0u32), (25, 25)] {
            for y in oy..oy + 12 {
                for x in ox..ox + 12 {
                    mask.put_pixel(x, y, image::Luma([255u8]));
                }
            }
        }
        let regions = foreground_regions(&mask, 200, 100);
        assert_eq!(regions.len(), 2);
        assert!(regions.contains(&Region::new(0, 0, 12, 12)));
        assert!(regions.contains(&Region::new(25, 25, 12, 12)));
    }
}
