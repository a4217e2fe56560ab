//! Common test utilities and constants for the Bunkatsu crate.
//!
//! Provides functions for setting up test directories, creating dummy images and
//! zip fixtures, and inspecting the archives a job produced.

use bunkatsu::prelude::*;
use image::{ImageFormat, Rgb, RgbImage};
use rand::{Rng, distributions::Alphanumeric};
use std::io::{Cursor, Read, Write};
use std::time::Duration;
use tokio::fs;

#[allow(dead_code)]
pub const TEST_TMP_DIR: &str = "tests/tmp";
#[allow(dead_code)]
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);
#[allow(dead_code)]
pub const LONG_TEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Directories used by one test.
#[allow(dead_code)]
pub struct TestDirs {
    pub base: PathBuf,
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
    pub buffer_dir: PathBuf,
}

/// Creates a unique test directory with source, target and buffer subdirectories.
#[allow(dead_code)]
pub async fn setup_test_dirs(sub_path: &str) -> TestDirs {
    let rand_string: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let base = PathBuf::from(TEST_TMP_DIR).join(format!("{}-{}", sub_path, rand_string));
    if base.exists() {
        fs::remove_dir_all(&base).await.unwrap();
    }
    let dirs = TestDirs {
        source_dir: base.join("source"),
        target_dir: base.join("target"),
        buffer_dir: base.join("buffer"),
        base,
    };
    fs::create_dir_all(&dirs.source_dir).await.unwrap();
    fs::create_dir_all(&dirs.target_dir).await.unwrap();
    dirs
}

/// Removes the directories of one test.
#[allow(dead_code)]
pub async fn cleanup_test_dirs(dirs: &TestDirs) {
    let _ = fs::remove_dir_all(&dirs.base).await;
}

/// Settings staging into the test's buffer directory.
#[allow(dead_code)]
pub fn test_settings(dirs: &TestDirs, performance: PerformanceProfile) -> Settings {
    Settings::builder()
        .buffer_directory(dirs.buffer_dir.clone())
        .performance(performance)
        .build()
        .unwrap()
}

/// Encodes a 100x100 single-color JPEG.
#[allow(dead_code)]
pub fn jpeg_bytes(color: Rgb<u8>) -> Vec<u8> {
    let img = RgbImage::from_pixel(100, 100, color);
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Jpeg)
        .unwrap();
    buffer
}

/// A distinct color per page so every page has different bytes.
#[allow(dead_code)]
pub fn page_color(index: usize) -> Rgb<u8> {
    Rgb([(index * 23 % 256) as u8, (index * 71 % 256) as u8, 128])
}

/// Creates a minimal dummy JPEG image at the given path.
#[allow(dead_code)]
pub async fn create_dummy_image(path: &Path, color: Rgb<u8>) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.unwrap();
    }
    fs::write(path, jpeg_bytes(color)).await.unwrap();
}

/// Writes a zip archive holding `entries` in the given order.
#[allow(dead_code)]
pub fn create_zip_fixture(archive: &Path, entries: &[(String, Vec<u8>)]) {
    if let Some(parent) = archive.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let file = std::fs::File::create(archive).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, bytes) in entries {
        zip.start_file(name.as_str(), options).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap();
}

/// Creates a comic archive with `pages` JPEG pages named `{prefix}1.jpg`, `{prefix}2.jpg`, ...
/// plus the given side files. Returns the page bytes in reading order.
#[allow(dead_code)]
pub fn create_comic_fixture(
    archive: &Path,
    prefix: &str,
    pages: usize,
    side_files: &[(&str, &str)],
) -> Vec<Vec<u8>> {
    let seed: usize = prefix.bytes().map(usize::from).sum();
    let mut entries = Vec::new();
    let mut page_bytes = Vec::new();
    // Stored in reverse so the archive order never matches reading order by accident.
    for i in (1..=pages).rev() {
        let bytes = jpeg_bytes(page_color(i * 3 + seed));
        entries.push((format!("{}{}.jpg", prefix, i), bytes.clone()));
        page_bytes.push(bytes);
    }
    page_bytes.reverse();
    for (name, content) in side_files {
        entries.push((name.to_string(), content.as_bytes().to_vec()));
    }
    create_zip_fixture(archive, &entries);
    page_bytes
}

/// Names of the entries of a zip archive, in stored order.
#[allow(dead_code)]
pub fn zip_entry_names(path: &Path) -> Vec<String> {
    let file = std::fs::File::open(path).unwrap();
    let mut zip = zip::ZipArchive::new(file).unwrap();
    (0..zip.len())
        .map(|i| zip.by_index(i).unwrap().name().to_string())
        .collect()
}

/// Content of one entry of a zip archive.
#[allow(dead_code)]
pub fn zip_entry_bytes(path: &Path, name: &str) -> Vec<u8> {
    let file = std::fs::File::open(path).unwrap();
    let mut zip = zip::ZipArchive::new(file).unwrap();
    let mut entry = zip.by_name(name).unwrap();
    let mut content = Vec::new();
    entry.read_to_end(&mut content).unwrap();
    content
}

/// Checks that a zip archive exists and contains at least one entry.
#[allow(dead_code)]
pub fn assert_valid_zip_file(path: &Path) {
    assert!(path.exists(), "Output archive does not exist: {:?}", path);
    assert!(path.is_file(), "Output archive is not a file: {:?}", path);
    assert!(
        !zip_entry_names(path).is_empty(),
        "Output archive is empty: {:?}",
        path
    );
}
