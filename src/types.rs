//! Core data types, enums, and reports for archive transformations.
//!
//! This module defines the fundamental data structures used throughout bunkatsu:
//! - Enumerated pages and their classification (`Page`, `PageKind`, `PageSet`)
//! - The parameters of one job (`ArchiveJobSpec`, `SplitStrategy`, `ResizeMode`, `OutputFormat`)
//! - The planner's output (`SplitPlan`, `GroupPlan`)
//! - Reporting types (`JobReport`, `GroupOutcome`, `PipelineStage`)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::path_utils::{decimal_digits, pad_index};

/// Extensions (lowercase, without dot) classified as pages. Everything else is a side file.
pub const IMAGE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff", "tif"];

/// Archive extensions picked up by batch processing (lowercase, without the dot).
pub const COMIC_EXTENSIONS: [&str; 5] = ["cb7", "cba", "cbr", "cbt", "cbz"];

/// Minimum decimal width used for group and page indices.
pub const MIN_INDEX_WIDTH: usize = 2;

/// Whether an enumerated file is a page or travels alongside the pages.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum PageKind {
    Image,
    SideFile,
}

/// One file found in an extracted archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Absolute (or extraction-root-joined) source path.
    pub path: PathBuf,
    /// Path relative to the root the page was enumerated from.
    pub relative_path: PathBuf,
    /// Original extension including the leading dot (e.g. `.jpg`), empty when there is none.
    pub extension: String,
    /// Size in bytes at enumeration time.
    pub len: u64,
    pub kind: PageKind,
}

impl Page {
    /// Creates a page, classifying it by extension.
    pub fn new(path: PathBuf, relative_path: PathBuf, len: u64) -> Self {
        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let kind = if is_image_file(&path) {
            PageKind::Image
        } else {
            PageKind::SideFile
        };
        Self {
            path,
            relative_path,
            extension,
            len,
            kind,
        }
    }

    pub fn is_image(&self) -> bool {
        self.kind == PageKind::Image
    }

    /// File name of the source, lossy converted.
    pub fn file_name(&self) -> String {
        crate::path_utils::get_file_name_lossy(&self.path)
    }
}

/// Ordered pages and side files of one (or several concatenated) extracted archives.
///
/// The order of `images` is the reading order seen in every output archive.
#[derive(Debug, Clone, Default)]
pub struct PageSet {
    pub root: PathBuf,
    pub images: Vec<Page>,
    pub side_files: Vec<Page>,
}

impl PageSet {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            ..Default::default()
        }
    }

    /// Number of image pages, the "total page count" every strategy works with.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn total_image_bytes(&self) -> u64 {
        self.images.iter().map(|p| p.len).sum()
    }

    /// The first image in natural order, used as the cover.
    pub fn cover(&self) -> Option<usize> {
        if self.images.is_empty() { None } else { Some(0) }
    }

    /// Index of the canonical metadata file: the first non-empty side file.
    pub fn metadata_file(&self) -> Option<usize> {
        self.side_files.iter().position(|f| f.len > 0)
    }

    /// Appends another set after this one, preserving both internal orders.
    pub fn append(&mut self, other: PageSet) {
        self.images.extend(other.images);
        self.side_files.extend(other.side_files);
    }

    /// Concatenates sets in the given order under a common root.
    pub fn concat(root: PathBuf, sets: impl IntoIterator<Item = PageSet>) -> Self {
        let mut merged = PageSet::new(root);
        for set in sets {
            merged.append(set);
        }
        merged
    }
}

/// Archive container written for each output group.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum OutputFormat {
    #[serde(rename = "CB7")]
    Cb7,
    #[serde(rename = "CBT")]
    Cbt,
    #[default]
    #[serde(rename = "CBZ")]
    Cbz,
}

impl OutputFormat {
    /// File extension without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Cb7 => "cb7",
            OutputFormat::Cbt => "cbt",
            OutputFormat::Cbz => "cbz",
        }
    }

    /// Container type understood by 7z's `-t` switch.
    pub fn container(&self) -> &'static str {
        match self {
            OutputFormat::Cb7 => "7z",
            OutputFormat::Cbt => "tar",
            OutputFormat::Cbz => "zip",
        }
    }
}

/// Optional resize applied to every page before re-encoding.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum ResizeMode {
    #[default]
    None,
    /// Resize to an absolute height in pixels, keeping the aspect ratio.
    ToHeight(u32),
    /// Resize by a percentage of the original dimensions.
    ToRatio(u32),
}

impl ResizeMode {
    /// Normalises no-op resizes: a 100% ratio is the same as no resize.
    pub fn effective(&self) -> ResizeMode {
        match self {
            ResizeMode::ToRatio(100) => ResizeMode::None,
            other => *other,
        }
    }

    pub fn is_none(&self) -> bool {
        self.effective() == ResizeMode::None
    }
}

/// Partitioning strategy and its numeric parameter.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum SplitStrategy {
    /// Exactly `n` output archives.
    ByCount(usize),
    /// At most `n` pages per output archive (cover included for non-first groups).
    ByMaxPages(usize),
    /// At most `n` MiB per output archive.
    ByMaxSize(u64),
    /// A single output group holding every page (compress and merge).
    #[default]
    Whole,
}

/// The parameters of one transformation, read-only during execution.
///
/// Use [`Settings::job_builder`](crate::settings::Settings::job_builder) to start from the
/// configured defaults, or [`ArchiveJobSpec::builder`] for a blank builder.
#[derive(Debug, Clone, Serialize, Deserialize, derive_builder::Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ArchiveJobSpec {
    /// Name template for output archives, staging directories and page files.
    pub comic_name: String,

    /// Directory receiving the produced archives.
    #[builder(default)]
    pub output_dir: PathBuf,

    #[builder(default)]
    pub strategy: SplitStrategy,

    /// Duplicate the cover into every group after the first.
    #[builder(default = "true")]
    pub include_cover: bool,

    /// Copy the canonical metadata side file into every group.
    #[builder(default = "true")]
    pub include_metadata: bool,

    /// Re-encoding quality (0-100). 100 without resize moves pages unchanged.
    #[builder(default = "100")]
    pub image_quality: u8,

    #[builder(default)]
    pub resize: ResizeMode,

    #[builder(default)]
    pub output_format: OutputFormat,
}

impl ArchiveJobSpec {
    pub fn builder() -> ArchiveJobSpecBuilder {
        ArchiveJobSpecBuilder::default()
    }

    /// True when pages can be moved without decoding.
    pub fn is_passthrough(&self) -> bool {
        self.resize.is_none() && self.image_quality == 100
    }
}

impl ArchiveJobSpecBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(name) = &self.comic_name {
            if name.trim().is_empty() {
                return Err("Comic name must not be empty".to_string());
            }
        }
        if let Some(quality) = self.image_quality {
            if quality > 100 {
                return Err("Image quality must be between 0 and 100.".to_string());
            }
        }
        match self.resize {
            Some(ResizeMode::ToHeight(0)) => {
                return Err("Resize height must be greater than 0.".to_string());
            }
            Some(ResizeMode::ToRatio(0)) => {
                return Err("Resize ratio must be greater than 0.".to_string());
            }
            _ => {}
        }
        Ok(())
    }
}

/// Pages (by index into [`PageSet::images`]) assigned to one output archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPlan {
    pub index: usize,
    pub pages: Vec<usize>,
    /// A copy of the cover goes in front of the pages.
    pub carries_cover: bool,
    pub carries_metadata: bool,
}

impl GroupPlan {
    /// Sequence number of the first assigned page; 1 is taken by the cover copy.
    pub fn first_sequence(&self) -> usize {
        if self.carries_cover { 2 } else { 1 }
    }

    /// Number of image entries written, cover copy included.
    pub fn entry_count(&self) -> usize {
        self.pages.len() + usize::from(self.carries_cover)
    }

    /// Zero-padding width for page sequence numbers of this group.
    pub fn sequence_width(&self) -> usize {
        decimal_digits(self.entry_count()).max(MIN_INDEX_WIDTH)
    }
}

/// Planner output, never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPlan {
    /// Declared number of groups, used for labels and index widths.
    pub group_count: usize,
    pub index_width: usize,
    pub groups: Vec<GroupPlan>,
    /// Cover source, index into [`PageSet::images`].
    pub cover: Option<usize>,
    /// Metadata source, index into [`PageSet::side_files`].
    pub metadata: Option<usize>,
}

impl SplitPlan {
    /// `{comic}_{index+1}` padded to the plan's index width.
    pub fn group_name(&self, comic_name: &str, group_index: usize) -> String {
        format!("{}_{}", comic_name, pad_index(group_index + 1, self.index_width))
    }
}

/// States a transformation moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStage {
    Idle,
    Validating,
    Extracting,
    Enumerating,
    Planning,
    MaterializingGroups,
    Compressing,
    CleaningUp,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupStatus {
    Completed,
    Failed(String),
    Cancelled,
}

/// What happened to one output group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupOutcome {
    pub index: usize,
    pub archive: Option<PathBuf>,
    /// Image entries written, cover copy included.
    pub page_count: usize,
    pub status: GroupStatus,
}

impl GroupOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == GroupStatus::Completed
    }
}

/// Result of one `split`/`merge`/`compress` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// Stage trail in the order the job went through it.
    pub stages: Vec<PipelineStage>,
    pub groups: Vec<GroupOutcome>,
}

impl JobReport {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            stages: vec![PipelineStage::Idle],
            groups: Vec::new(),
        }
    }

    /// Every group completed and the job reached `Done`.
    pub fn is_success(&self) -> bool {
        self.stages.last() == Some(&PipelineStage::Done)
            && !self.groups.is_empty()
            && self.groups.iter().all(GroupOutcome::is_completed)
    }

    /// Archives that were produced, in group order.
    pub fn outputs(&self) -> Vec<PathBuf> {
        self.groups
            .iter()
            .filter(|g| g.is_completed())
            .filter_map(|g| g.archive.clone())
            .collect()
    }
}

/// Utility function: whether a path has an image extension (case-insensitive).
///
/// # Supported formats
///
/// jpg, jpeg, png, gif, bmp, webp, tiff, tif
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}
