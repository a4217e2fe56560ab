//! Bunkatsu - Comic Archive Splitting, Merging and Recompression
//!
//! This crate provides an asynchronous, declarative API for re-materializing comic book
//! archives (CBZ, CB7, CBT): split one archive into several by output count, pages per output
//! or size per output; merge several archives into one; or recompress an archive with a new
//! image quality and size.
//!
//! # Getting Started
//!
//! Build a [`Settings`] snapshot, create a [`Toolbox`] from it, describe the job with an
//! [`ArchiveJobSpec`] and run it. Every entry point returns a [`JobReport`].
//!
//! ```rust,no_run
//! use bunkatsu::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> bunkatsu::error::Result<()> {
//!     // 1. Settings shared by every job of this toolbox
//!     let settings = Settings::builder()
//!         .buffer_directory(PathBuf::from("/tmp/bunkatsu"))
//!         .add_file_index_to_covers(true)
//!         .performance(PerformanceProfile::high_performance())
//!         .build()?;
//!     let toolbox = Toolbox::new(settings);
//!
//!     // Optional: drop buffers left behind by interrupted runs
//!     toolbox.purge_stale_buffers().await?;
//!
//!     // 2. Describe the job
//!     let spec = toolbox
//!         .settings()
//!         .job_builder()
//!         .comic_name("My Comic")
//!         .output_dir(PathBuf::from("./out"))
//!         .strategy(SplitStrategy::ByMaxPages(40))
//!         .image_quality(85u8)
//!         .resize(ResizeMode::ToHeight(1600))
//!         .build()?;
//!
//!     // 3. Run it
//!     let report = toolbox
//!         .split_archive(Path::new("./My Comic.cbz"), &spec, &CancellationToken::new())
//!         .await?;
//!     println!("Produced {} archives", report.outputs().len());
//!
//!     Ok(())
//! }
//! ```
//!
//! The archive backend defaults to the in-process [`ZipArchiver`](archiver::ZipArchiver);
//! use [`Toolbox::with_archiver`] with a [`SevenZipArchiver`](archiver::SevenZipArchiver) to
//! write CB7 or CBT archives.

pub mod archiver;
pub mod batch;
pub mod codec;
pub mod collector;
pub mod error;
pub mod materializer;
pub mod path_utils;
pub mod planner;
pub mod settings;
pub mod signal;
pub mod toolbox;
pub mod types;

// Publicly expose the entry point and its configuration
pub use settings::{PerformanceMode, PerformanceProfile, Settings, SettingsBuilder};
pub use toolbox::Toolbox;

// Re-export error and core types for direct access
pub use types::{
    ArchiveJobSpec, ArchiveJobSpecBuilder, GroupOutcome, GroupPlan, GroupStatus, JobReport,
    OutputFormat, Page, PageKind, PageSet, PipelineStage, ResizeMode, SplitPlan, SplitStrategy,
};

/// Prelude module for convenient imports.
///
/// This module re-exports the most commonly used types and traits, allowing you to
/// import everything you need with a single `use bunkatsu::prelude::*;` statement.
pub mod prelude {
    pub use super::{
        ArchiveJobSpec, ArchiveJobSpecBuilder, GroupOutcome, GroupPlan, GroupStatus, JobReport,
        OutputFormat, Page, PageKind, PageSet, PerformanceMode, PerformanceProfile,
        PipelineStage, ResizeMode, Settings, SettingsBuilder, SplitPlan, SplitStrategy, Toolbox,
        error, types,
    };
    pub use crate::archiver::{ArchiveTool, SevenZipArchiver, ZipArchiver};
    pub use crate::batch::BatchController;
    pub use crate::codec::{ImageCodec, ImageCrateCodec};
    pub use crate::collector::Collector;
    pub use crate::planner::PartitionStrategy;
    pub use crate::signal::{BusySignal, CancellationToken};
    pub use std::path::{Path, PathBuf};
    pub use std::sync::Arc;
}
