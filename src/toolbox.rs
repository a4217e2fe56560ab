//! Transform pipeline: the entry points of the crate.
//!
//! A [`Toolbox`] owns an immutable [`Settings`] snapshot and the two collaborators (archive tool
//! and image codec). Each entry point runs one job through
//! `Validating → Extracting → Enumerating → Planning → MaterializingGroups → Compressing →
//! CleaningUp → Done | Failed` inside its own staging root, which is always removed at the end.
//!
//! - [`Toolbox::split_archive`] plans several groups and runs one unit of work per group.
//!   A failing group does not stop its siblings.
//! - [`Toolbox::merge_archives`] and [`Toolbox::compress_archive`] produce a single group and run
//!   one unit of work per page. Any failure aborts the job.
//! - [`Toolbox::split_directory`] runs one split per archive of a folder.
//!
//! A staging root is always a directory the job created itself; an existing directory with the
//! same name is left alone and a numbered sibling is used instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::fs;
use tokio::sync::watch;

use crate::archiver::{ArchiveTool, ZipArchiver};
use crate::batch::BatchController;
use crate::codec::{ImageCodec, ImageCrateCodec};
use crate::collector::{Collector, natural_path_cmp};
use crate::error::{Error, Result};
use crate::materializer::GroupMaterializer;
use crate::path_utils::{
    CONFLICT_SUFFIX, clean_directory, create_unique_dir, decimal_digits,
    normalize_output_extension, pad_index, resolve_output_conflict,
};
use crate::planner::{self, PartitionStrategy, SingleGroup};
use crate::settings::{PerformanceMode, Settings};
use crate::signal::{BusySignal, CancellationToken};
use crate::types::{
    ArchiveJobSpec, COMIC_EXTENSIONS, GroupOutcome, GroupStatus, JobReport, MIN_INDEX_WIDTH,
    PageSet, PipelineStage, ResizeMode, SplitPlan, SplitStrategy,
};

/// Name of the directory (under the staging root) receiving extracted archives.
const EXTRACTED_DIR: &str = "extracted";
/// Side files pulled out by [`Toolbox::extract_side_files`].
const SIDE_FILE_PATTERNS: [&str; 2] = ["*.xml", "*.html"];

/// Entry point for split, merge and compress jobs.
///
/// ```rust,no_run
/// # use bunkatsu::prelude::*;
/// # #[tokio::main]
/// # async fn main() -> bunkatsu::error::Result<()> {
/// let toolbox = Toolbox::new(Settings::default());
/// let spec = toolbox
///     .settings()
///     .job_builder()
///     .comic_name("My Comic")
///     .output_dir(PathBuf::from("./out"))
///     .strategy(SplitStrategy::ByCount(3))
///     .build()?;
///
/// let report = toolbox
///     .split_archive(Path::new("./My Comic.cbz"), &spec, &CancellationToken::new())
///     .await?;
/// println!("Produced {:?}", report.outputs());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Toolbox {
    settings: Settings,
    archiver: Arc<dyn ArchiveTool>,
    codec: Arc<dyn ImageCodec>,
    busy: BusySignal,
}

impl std::fmt::Debug for Toolbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolbox")
            .field("settings", &self.settings)
            .field("archiver", &self.archiver.name())
            .field("busy", &self.busy.is_busy())
            .finish()
    }
}

/// Stage trail and timing of one running job.
struct JobRun {
    report: JobReport,
    started: Instant,
}

impl JobRun {
    fn new(job_name: &str) -> Self {
        Self {
            report: JobReport::new(job_name),
            started: Instant::now(),
        }
    }

    fn enter(&mut self, stage: PipelineStage) {
        log::debug!("[{}] {:?}", self.report.job_name, stage);
        self.report.stages.push(stage);
    }

    fn finish(mut self, stage: PipelineStage) -> JobReport {
        self.enter(stage);
        self.report.elapsed = self.started.elapsed();
        log::info!(
            "[{}] finished as {:?} in {:?}",
            self.report.job_name,
            stage,
            self.report.elapsed
        );
        self.report
    }
}

impl Toolbox {
    /// Creates a toolbox with the in-process zip backend and the `image` codec.
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            archiver: Arc::new(ZipArchiver::new()),
            codec: Arc::new(ImageCrateCodec),
            busy: BusySignal::new(),
        }
    }

    /// Replaces the archive backend (e.g. a [`SevenZipArchiver`](crate::archiver::SevenZipArchiver)).
    pub fn with_archiver(mut self, archiver: Arc<dyn ArchiveTool>) -> Self {
        self.archiver = archiver;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn ImageCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn busy_signal(&self) -> &BusySignal {
        &self.busy
    }

    /// Busy/idle stream: `true` while at least one job of this toolbox (or its clones) runs.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.busy.subscribe()
    }

    /// Splits one archive into several according to `spec.strategy`.
    ///
    /// Output archives are named `{comic}_{index}` (zero-padded) and written to
    /// `spec.output_dir`, or next to the source when it is empty.
    ///
    /// # Arguments
    ///
    /// * `source` - Archive to split
    /// * `spec` - Job parameters
    /// * `cancel` - Checked before every group and page
    ///
    /// # Returns
    ///
    /// * `Ok(JobReport)` - One outcome per group; failed groups are reported, not fatal
    /// * `Err(Error)` - Invalid parameters, missing source, extraction/planning failure or cancellation
    pub async fn split_archive(
        &self,
        source: &Path,
        spec: &ArchiveJobSpec,
        cancel: &CancellationToken,
    ) -> Result<JobReport> {
        let _busy = self.busy.begin();
        let mut run = JobRun::new(&spec.comic_name);

        run.enter(PipelineStage::Validating);
        let strategy = spec.strategy.planner();
        strategy.validate()?;
        Self::ensure_source(source)?;

        let staging_root = self
            .create_staging_root(&mut run, source, &spec.comic_name)
            .await?;
        let output_dir = Self::output_dir(spec, source);
        let result = self
            .run_split(&mut run, source, spec, strategy, &staging_root, &output_dir, cancel)
            .await;

        run.enter(PipelineStage::CleaningUp);
        clean_directory(&staging_root).await;

        let interrupted = run
            .report
            .groups
            .iter()
            .any(|g| g.status == GroupStatus::Cancelled);
        match result {
            Ok(()) if interrupted => {
                run.enter(PipelineStage::Failed);
                Err(Error::Cancelled)
            }
            Ok(()) => {
                let failed = run.report.groups.iter().any(|g| !g.is_completed());
                let stage = if failed {
                    PipelineStage::Failed
                } else {
                    PipelineStage::Done
                };
                Ok(run.finish(stage))
            }
            Err(e) => {
                log::error!("Split of {:?} failed: {}", source, e);
                run.enter(PipelineStage::Failed);
                Err(e)
            }
        }
    }

    /// Splits every comic archive found directly in `dir`, one unit of work per archive.
    ///
    /// Archives are picked by extension (`.cb7`, `.cba`, `.cbr`, `.cbt`, `.cbz`) and processed
    /// in natural order of their file names. Each job is named after its file stem, so output
    /// archives and staging roots of different files never collide; every other parameter comes
    /// from `spec`.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<(PathBuf, Result<JobReport>)>)` - One entry per archive, in processing order.
    ///   A failing archive does not stop the others.
    /// * `Err(Error)` - Invalid strategy parameters, or `dir` is not a directory
    pub async fn split_directory(
        &self,
        dir: &Path,
        spec: &ArchiveJobSpec,
        cancel: &CancellationToken,
    ) -> Result<Vec<(PathBuf, Result<JobReport>)>> {
        let _busy = self.busy.begin();
        spec.strategy.planner().validate()?;
        if !dir.is_dir() {
            return Err(Error::NotFound(format!(
                "Batch directory {:?} does not exist",
                dir
            )));
        }

        let mut archives = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_comic = path
                .extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
                .is_some_and(|ext| COMIC_EXTENSIONS.contains(&ext.as_str()));
            if is_comic && entry.file_type().await?.is_file() {
                archives.push(path);
            }
        }
        archives.sort_by(|a, b| natural_path_cmp(a, b));

        if archives.is_empty() {
            log::warn!("No comic archive found in {:?}", dir);
            return Ok(Vec::new());
        }
        log::info!(
            "Batch splitting {} archives from {:?}",
            archives.len(),
            dir
        );

        let toolbox = self.clone();
        let template = spec.clone();
        let job_cancel = cancel.clone();
        let results = self
            .controller(cancel)
            .run(archives.clone(), move |archive| {
                let toolbox = toolbox.clone();
                let mut spec = template.clone();
                let cancel = job_cancel.clone();
                async move {
                    spec.comic_name = archive
                        .file_stem()
                        .map(|s| s.to_string_lossy().to_string())
                        .unwrap_or_else(|| spec.comic_name.clone());
                    toolbox.split_archive(&archive, &spec, &cancel).await
                }
            })
            .await;

        for (archive, result) in archives.iter().zip(&results) {
            if let Err(e) = result {
                log::error!("Batch split of {:?} failed: {}", archive, e);
            }
        }
        Ok(archives.into_iter().zip(results).collect())
    }

    /// Merges several archives, in the given order, into `{output_dir}/{comic}.{ext}`.
    ///
    /// `spec.strategy` is ignored: a merge always produces a single group.
    pub async fn merge_archives(
        &self,
        sources: &[PathBuf],
        spec: &ArchiveJobSpec,
        cancel: &CancellationToken,
    ) -> Result<JobReport> {
        let _busy = self.busy.begin();
        let mut run = JobRun::new(&spec.comic_name);

        run.enter(PipelineStage::Validating);
        let Some(first) = sources.first() else {
            return Err(Error::InvalidParameter(
                "At least one archive is required to merge".to_string(),
            ));
        };
        for source in sources {
            Self::ensure_source(source)?;
        }

        let mut spec = spec.clone();
        spec.strategy = SplitStrategy::Whole;
        let output_dir = Self::output_dir(&spec, first);
        let output = output_dir.join(format!(
            "{}.{}",
            spec.comic_name,
            spec.output_format.extension()
        ));
        let staging_root = self
            .create_staging_root(&mut run, first, &spec.comic_name)
            .await?;

        self.single_group_job(run, sources, &spec, &output, &staging_root, cancel)
            .await
    }

    /// Re-encodes (and optionally resizes) every page of one archive into `output`.
    ///
    /// The output extension is forced to the configured output format; if the result would
    /// overwrite `source`, a `_processed` sibling is used instead.
    pub async fn compress_archive(
        &self,
        source: &Path,
        output: &Path,
        quality: u8,
        resize: ResizeMode,
        cancel: &CancellationToken,
    ) -> Result<JobReport> {
        let _busy = self.busy.begin();
        let output = normalize_output_extension(output, self.settings.output_format);
        let output = resolve_output_conflict(&output, source, CONFLICT_SUFFIX);
        let comic_name = output
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut run = JobRun::new(&comic_name);

        run.enter(PipelineStage::Validating);
        if quality > 100 {
            return Err(Error::InvalidParameter(format!(
                "Image quality must be between 0 and 100, got {}",
                quality
            )));
        }
        if matches!(resize, ResizeMode::ToHeight(0) | ResizeMode::ToRatio(0)) {
            return Err(Error::InvalidParameter(
                "Resize argument must be greater than 0".to_string(),
            ));
        }
        Self::ensure_source(source)?;

        let spec = self
            .settings
            .job_builder()
            .comic_name(comic_name.clone())
            .output_dir(output.parent().map(Path::to_path_buf).unwrap_or_default())
            .strategy(SplitStrategy::Whole)
            .image_quality(quality)
            .resize(resize)
            .build()?;
        let staging_root = self
            .create_staging_root(&mut run, source, &comic_name)
            .await?;

        self.single_group_job(
            run,
            &[source.to_path_buf()],
            &spec,
            &output,
            &staging_root,
            cancel,
        )
        .await
    }

    /// Removes everything left in the shared buffer directory by interrupted jobs.
    ///
    /// # Returns
    ///
    /// * `Result<usize>` - Number of entries removed
    pub async fn purge_stale_buffers(&self) -> Result<usize> {
        let buffer = &self.settings.buffer_directory;
        if !buffer.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        let mut entries = fs::read_dir(buffer).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let outcome = if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };
            match outcome {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("Unable to remove stale buffer {:?}: {}", path, e),
            }
        }
        log::info!("Purged {} stale entries from {:?}", removed, buffer);
        Ok(removed)
    }

    /// Extracts the `*.xml` and `*.html` side files of `archive` flat into `dest_dir`.
    pub async fn extract_side_files(&self, archive: &Path, dest_dir: &Path) -> Result<()> {
        let _busy = self.busy.begin();
        Self::ensure_source(archive)?;

        let archiver = Arc::clone(&self.archiver);
        let (source, dest) = (archive.to_path_buf(), dest_dir.to_path_buf());
        let controller =
            BatchController::new(self.settings.performance.clone(), CancellationToken::new());
        if controller.profile().mode == PerformanceMode::LowResource {
            log::debug!("Extracting side files of {:?} sequentially", archive);
        }
        controller
            .try_run(SIDE_FILE_PATTERNS.to_vec(), move |pattern| {
                let archiver = Arc::clone(&archiver);
                let (source, dest) = (source.clone(), dest.clone());
                async move { archiver.extract_by_pattern(&source, &dest, pattern).await }
            })
            .await?;
        Ok(())
    }

    /// Adds or replaces `file` at the root of `archive`.
    pub async fn update_side_file(&self, archive: &Path, file: &Path) -> Result<()> {
        let _busy = self.busy.begin();
        self.archiver.update_entry(archive, file).await
    }

    /// Removes the entries of `archive` whose file name matches `pattern` (`*` and `?`).
    pub async fn remove_entries(&self, archive: &Path, pattern: &str) -> Result<()> {
        let _busy = self.busy.begin();
        self.archiver.remove_entry(archive, pattern).await
    }

    // Helper methods

    fn ensure_source(source: &Path) -> Result<()> {
        if source.is_file() {
            Ok(())
        } else {
            Err(Error::NotFound(format!(
                "Source archive {:?} does not exist",
                source
            )))
        }
    }

    /// Creates a staging root owned by this job only. An existing directory with the same name
    /// (leftovers of an interrupted run, or a user folder next to the source) is never reused.
    async fn create_staging_root(
        &self,
        run: &mut JobRun,
        source: &Path,
        name_template: &str,
    ) -> Result<PathBuf> {
        let base = self.settings.buffer_root(source, name_template);
        match create_unique_dir(&base).await {
            Ok(root) => {
                log::debug!("[{}] staging in {:?}", run.report.job_name, root);
                Ok(root)
            }
            Err(e) => {
                log::error!("Unable to create a staging root from {:?}: {}", base, e);
                run.enter(PipelineStage::Failed);
                Err(e)
            }
        }
    }

    fn output_dir(spec: &ArchiveJobSpec, source: &Path) -> PathBuf {
        if spec.output_dir.as_os_str().is_empty() {
            source
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default()
        } else {
            spec.output_dir.clone()
        }
    }

    fn controller(&self, cancel: &CancellationToken) -> BatchController {
        BatchController::new(self.settings.performance.clone(), cancel.clone())
    }

    fn materializer(
        &self,
        pages: PageSet,
        plan: SplitPlan,
        spec: &ArchiveJobSpec,
        staging_root: &Path,
        cancel: &CancellationToken,
    ) -> GroupMaterializer {
        GroupMaterializer::new(
            Arc::clone(&self.codec),
            Arc::new(pages),
            Arc::new(plan),
            Arc::new(spec.clone()),
            staging_root,
            cancel.clone(),
        )
        .with_flatten(self.settings.flatten_structure)
        .with_cover_stamp(self.settings.add_file_index_to_covers)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_split(
        &self,
        run: &mut JobRun,
        source: &Path,
        spec: &ArchiveJobSpec,
        strategy: Box<dyn PartitionStrategy>,
        staging_root: &Path,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        cancel.check()?;
        run.enter(PipelineStage::Extracting);
        let extracted = staging_root.join(EXTRACTED_DIR);
        let timer = Instant::now();
        self.archiver.extract(source, &extracted).await?;
        log::info!("Extraction of {:?} took {:?}", source, timer.elapsed());

        run.enter(PipelineStage::Enumerating);
        let pages = Collector::new(&extracted).build().await?;

        run.enter(PipelineStage::Planning);
        let plan = planner::plan(strategy.as_ref(), &pages, spec)?;
        log::info!(
            "Splitting {:?} into {} archives ({} pages)",
            source,
            plan.groups.len(),
            pages.image_count()
        );

        run.enter(PipelineStage::MaterializingGroups);
        fs::create_dir_all(output_dir).await?;
        let mut materializer = self.materializer(pages, plan, spec, staging_root, cancel);
        materializer.stage_cover().await?;

        let group_indices: Vec<usize> = (0..materializer.plan().groups.len()).collect();
        let entry_counts: Vec<usize> = materializer
            .plan()
            .groups
            .iter()
            .map(|g| g.entry_count())
            .collect();

        let archiver = Arc::clone(&self.archiver);
        let output_dir = output_dir.to_path_buf();
        let comic_name = spec.comic_name.clone();
        let format = spec.output_format;
        let timer = Instant::now();
        let unit_materializer = materializer.clone();
        let results = self
            .controller(cancel)
            .run(group_indices, move |index| {
                let materializer = unit_materializer.clone();
                let archiver = Arc::clone(&archiver);
                let archive = output_dir.join(format!(
                    "{}.{}",
                    materializer.plan().group_name(&comic_name, index),
                    format.extension()
                ));
                async move {
                    let dir = materializer.materialize(index, None).await?;
                    let compressed = archiver.compress(&dir, &archive, format).await;
                    clean_directory(&dir).await;
                    compressed.map(|()| archive)
                }
            })
            .await;
        run.enter(PipelineStage::Compressing);
        log::info!("Groups of {:?} processed in {:?}", source, timer.elapsed());

        for (index, result) in results.into_iter().enumerate() {
            let status = match &result {
                Ok(_) => GroupStatus::Completed,
                Err(e) if e.is_cancelled() => GroupStatus::Cancelled,
                Err(e) => {
                    log::error!(
                        "Group {} of {:?} failed while materializing or compressing: {}",
                        index,
                        source,
                        e
                    );
                    GroupStatus::Failed(e.to_string())
                }
            };
            run.report.groups.push(GroupOutcome {
                index,
                archive: result.ok(),
                page_count: entry_counts[index],
                status,
            });
        }
        Ok(())
    }

    /// Shared body of merge and compress: every source is extracted into its own numbered
    /// subtree, the page sets are concatenated in input order and written as one archive.
    async fn single_group_job(
        &self,
        mut run: JobRun,
        sources: &[PathBuf],
        spec: &ArchiveJobSpec,
        output: &Path,
        staging_root: &Path,
        cancel: &CancellationToken,
    ) -> Result<JobReport> {
        let result = self
            .run_single_group(&mut run, sources, spec, output, staging_root, cancel)
            .await;

        run.enter(PipelineStage::CleaningUp);
        clean_directory(staging_root).await;

        match result {
            Ok(outcome) => {
                run.report.groups.push(outcome);
                Ok(run.finish(PipelineStage::Done))
            }
            Err(e) => {
                log::error!("Job '{}' failed: {}", spec.comic_name, e);
                run.enter(PipelineStage::Failed);
                if e.is_cancelled() {
                    Err(Error::Cancelled)
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn run_single_group(
        &self,
        run: &mut JobRun,
        sources: &[PathBuf],
        spec: &ArchiveJobSpec,
        output: &Path,
        staging_root: &Path,
        cancel: &CancellationToken,
    ) -> Result<GroupOutcome> {
        cancel.check()?;
        let controller = self.controller(cancel);

        run.enter(PipelineStage::Extracting);
        let extracted = staging_root.join(EXTRACTED_DIR);
        let width = decimal_digits(sources.len()).max(MIN_INDEX_WIDTH);
        let roots: Vec<PathBuf> = (0..sources.len())
            .map(|i| extracted.join(format!("archive_{}", pad_index(i + 1, width))))
            .collect();
        let archiver = Arc::clone(&self.archiver);
        let units: Vec<(PathBuf, PathBuf)> = sources.iter().cloned().zip(roots.clone()).collect();
        let timer = Instant::now();
        controller
            .try_run(units, move |(archive, dest)| {
                let archiver = Arc::clone(&archiver);
                async move { archiver.extract(&archive, &dest).await }
            })
            .await?;
        log::info!(
            "Extraction of {} archives took {:?}",
            sources.len(),
            timer.elapsed()
        );

        run.enter(PipelineStage::Enumerating);
        let pages = Collector::build_many(&extracted, roots).await?;

        run.enter(PipelineStage::Planning);
        let plan = planner::plan(&SingleGroup, &pages, spec)?;

        run.enter(PipelineStage::MaterializingGroups);
        let mut materializer = self.materializer(pages, plan, spec, staging_root, cancel);
        materializer.stage_cover().await?;
        let timer = Instant::now();
        let dir = materializer.materialize(0, Some(&controller)).await?;
        log::info!("Pages of '{}' processed in {:?}", spec.comic_name, timer.elapsed());

        run.enter(PipelineStage::Compressing);
        cancel.check()?;
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).await?;
        }
        let timer = Instant::now();
        let compressed = self
            .archiver
            .compress(&dir, output, spec.output_format)
            .await;
        clean_directory(&dir).await;
        compressed?;
        log::info!("Compression of {:?} took {:?}", output, timer.elapsed());

        Ok(GroupOutcome {
            index: 0,
            archive: Some(output.to_path_buf()),
            page_count: materializer.plan().groups[0].entry_count(),
            status: GroupStatus::Completed,
        })
    }
}
