//! Read-only settings snapshot consumed by every job.
//!
//! A host persists and edits these values however it likes; the toolbox only ever sees an
//! immutable copy taken when it was constructed.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::path_utils::sanitize_filename;
use crate::types::{ArchiveJobSpecBuilder, OutputFormat, ResizeMode};

/// How aggressively the batch controller schedules units of work.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
pub enum PerformanceMode {
    /// One unit at a time, optional delay after each.
    LowResource,
    /// Fixed-size batches, concurrent inside a batch, optional delay between batches.
    #[default]
    Balanced,
    /// Everything at once, bounded only by `max_concurrency`.
    HighPerformance,
}

/// Scheduling parameters for the batch controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceProfile {
    pub mode: PerformanceMode,
    pub max_concurrency: usize,
    pub batch_size: usize,
    pub throttle_delay_ms: u64,
    pub enable_throttling: bool,
}

impl Default for PerformanceProfile {
    fn default() -> Self {
        Self::balanced()
    }
}

impl PerformanceProfile {
    pub fn low_resource() -> Self {
        Self {
            mode: PerformanceMode::LowResource,
            max_concurrency: 1,
            batch_size: 3,
            throttle_delay_ms: 100,
            enable_throttling: true,
        }
    }

    pub fn balanced() -> Self {
        Self {
            mode: PerformanceMode::Balanced,
            max_concurrency: (num_cpus::get() / 2).max(1),
            batch_size: 5,
            throttle_delay_ms: 50,
            enable_throttling: false,
        }
    }

    pub fn high_performance() -> Self {
        Self {
            mode: PerformanceMode::HighPerformance,
            max_concurrency: num_cpus::get().max(1),
            batch_size: 10,
            throttle_delay_ms: 0,
            enable_throttling: false,
        }
    }

    /// Slots of the admission gate. LowResource is always 1.
    pub fn effective_concurrency(&self) -> usize {
        match self.mode {
            PerformanceMode::LowResource => 1,
            _ => self.max_concurrency.max(1),
        }
    }

    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    /// Delay to apply, or `None` when throttling is disabled.
    pub fn throttle_delay(&self) -> Option<Duration> {
        if self.enable_throttling && self.throttle_delay_ms > 0 {
            Some(Duration::from_millis(self.throttle_delay_ms))
        } else {
            None
        }
    }
}

/// Settings snapshot, built declaratively with [`Settings::builder`].
///
/// ```rust,no_run
/// # use bunkatsu::prelude::*;
/// let settings = Settings::builder()
///     .buffer_directory(PathBuf::from("/tmp/bunkatsu"))
///     .output_format(OutputFormat::Cbz)
///     .performance(PerformanceProfile::high_performance())
///     .build()
///     .expect("Invalid settings");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_builder::Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct Settings {
    /// Shared directory holding one staging root per running job.
    #[builder(default = "std::env::temp_dir().join(\"bunkatsu-buffer\")")]
    pub buffer_directory: PathBuf,

    /// Stage next to the source archive instead of inside `buffer_directory`.
    #[builder(default = "false")]
    pub use_file_dir_as_buffer: bool,

    #[builder(default = "true")]
    pub include_cover: bool,

    #[builder(default = "true")]
    pub include_metadata: bool,

    #[builder(default)]
    pub output_format: OutputFormat,

    /// Stamp `"{index}/{total}"` onto cover copies.
    #[builder(default = "false")]
    pub add_file_index_to_covers: bool,

    /// Height used by [`Settings::default_resize`].
    #[builder(default = "2048")]
    pub default_image_height: u32,

    /// Put every copied file at the staging root instead of preserving subdirectories.
    #[builder(default = "false")]
    pub flatten_structure: bool,

    #[builder(default)]
    pub performance: PerformanceProfile,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            buffer_directory: std::env::temp_dir().join("bunkatsu-buffer"),
            use_file_dir_as_buffer: false,
            include_cover: true,
            include_metadata: true,
            output_format: OutputFormat::Cbz,
            add_file_index_to_covers: false,
            default_image_height: 2048,
            flatten_structure: false,
            performance: PerformanceProfile::default(),
        }
    }
}

impl Settings {
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    /// A job builder pre-filled with the configured defaults.
    pub fn job_builder(&self) -> ArchiveJobSpecBuilder {
        let mut builder = ArchiveJobSpecBuilder::default();
        builder
            .include_cover(self.include_cover)
            .include_metadata(self.include_metadata)
            .output_format(self.output_format);
        builder
    }

    /// Resize to the configured default height.
    pub fn default_resize(&self) -> ResizeMode {
        ResizeMode::ToHeight(self.default_image_height)
    }

    /// Staging root for a job named `name_template` working on `source`.
    pub fn buffer_root(&self, source: &Path, name_template: &str) -> PathBuf {
        let name = sanitize_filename(name_template);
        if self.use_file_dir_as_buffer {
            source
                .parent()
                .map(|p| p.join(&name))
                .unwrap_or_else(|| PathBuf::from(&name))
        } else {
            self.buffer_directory.join(name)
        }
    }
}

impl SettingsBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(dir) = &self.buffer_directory {
            if dir.as_os_str().is_empty() {
                return Err("Buffer directory must not be empty".to_string());
            }
        }
        if let Some(0) = self.default_image_height {
            return Err("Default image height must be greater than 0.".to_string());
        }
        if let Some(profile) = &self.performance {
            if profile.max_concurrency == 0 || profile.batch_size == 0 {
                return Err("Concurrency and batch size must be at least 1.".to_string());
            }
        }
        Ok(())
    }
}
