//! Disk retention behavior: motion buckets are pruned to the newest
//! `max_saved_images`; the face corpus is never pruned.

use argus_stream::ArtifactStore;
use chrono::{Duration, Local, TimeZone};
use image::{GrayImage, Luma, Rgb, RgbImage};

#[test]
fn motion_bucket_never_exceeds_retention_and_drops_oldest() {
    let tmp = tempfile::tempdir().unwrap();
    let store = ArtifactStore::open(
        tmp.path().join("dataset"),
        tmp.path().join("motion"),
        50,
        5,
    )
    .unwrap();

    let image = RgbImage::from_pixel(8, 8, Rgb([5, 5, 5]));
    // Fixed midday base keeps every snapshot in one date bucket.
    let base = Local.with_ymd_and_hms(2026, 8, 6, 12, 0, 0).unwrap();
    for i in 0..55 {
        store
            .save_motion_snapshot(&image, base + Duration::seconds(i))
            .unwrap();
    }

    let bucket = store.motion_root().join("2026-08-06");
    let mut names: Vec<String> = std::fs::read_dir(&bucket)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".jpg"))
        .collect();
    names.sort();

    assert_eq!(names.len(), 50);
    // The five oldest snapshots (seconds 0-4) were removed first.
    assert_eq!(names[0], "frame_2026-08-06_12-00-05.000.jpg");
    assert_eq!(*names.last().unwrap(), "frame_2026-08-06_12-00-54.000.jpg");
}

#[test]
fn buckets_are_pruned_independently_per_date() {
    let tmp = tempfile::tempdir().unwrap();
    let store = ArtifactStore::open(
        tmp.path().join("dataset"),
        tmp.path().join("motion"),
        2,
        5,
    )
    .unwrap();

    let image = RgbImage::from_pixel(8, 8, Rgb([9, 9, 9]));
    let day_one = Local.with_ymd_and_hms(2026, 8, 5, 9, 0, 0).unwrap();
    let day_two = Local.with_ymd_and_hms(2026, 8, 6, 9, 0, 0).unwrap();
    for i in 0..3 {
        store
            .save_motion_snapshot(&image, day_one + Duration::seconds(i))
            .unwrap();
    }
    store.save_motion_snapshot(&image, day_two).unwrap();

    let count = |date: &str| {
        std::fs::read_dir(store.motion_root().join(date))
            .unwrap()
            .count()
    };
    // Day one was pruned to its cap; day two is untouched.
    assert_eq!(count("2026-08-05"), 2);
    assert_eq!(count("2026-08-06"), 1);
}

#[test]
fn face_corpus_is_never_pruned() {
    let tmp = tempfile::tempdir().unwrap();
    let store = ArtifactStore::open(
        tmp.path().join("dataset"),
        tmp.path().join("motion"),
        2, // aggressive motion retention must not touch the corpus
        5,
    )
    .unwrap();

    for identity in 1..=10u32 {
        let crop = GrayImage::from_pixel(8, 8, Luma([identity as u8 * 20]));
        store.save_identity_samples(identity, &crop).unwrap();
    }

    let corpus = store.load_face_corpus().unwrap();
    assert_eq!(corpus.len(), 50);
    assert_eq!(store.highest_identity().unwrap(), 10);
}
