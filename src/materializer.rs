//! Group materialization.
//!
//! Fills the staging directory of one output group: the metadata side file, the cover copy and
//! the assigned pages, each page going through the transcode-or-passthrough rule:
//!
//! - no resize and quality 100: the source file is moved unchanged;
//! - otherwise the page is rendered (resized when asked, re-encoded at the requested quality),
//!   written to its destination, and only then is the source deleted.
//!
//! Page files are renamed `{comic}_{sequence}{extension}`, sequences starting at 2 in groups
//! that carry a cover copy. A failure removes the group's staging directory and surfaces as
//! `Error::PartialWriteAbort`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::task::spawn_blocking;

use crate::batch::BatchController;
use crate::codec::{ImageCodec, render_page};
use crate::error::{Error, Result};
use crate::path_utils::{clean_directory, get_file_name_lossy, output_file_path, page_file_name};
use crate::signal::CancellationToken;
use crate::types::{ArchiveJobSpec, GroupPlan, PageSet, SplitPlan};

/// Directory (under the staging root) holding the pristine cover copy.
const COVER_DIR: &str = "cover";

/// Materializes the groups of one split plan.
///
/// Cheap to clone; every clone shares the same page set, plan and job parameters.
#[derive(Clone)]
pub struct GroupMaterializer {
    codec: Arc<dyn ImageCodec>,
    pages: Arc<PageSet>,
    plan: Arc<SplitPlan>,
    spec: Arc<ArchiveJobSpec>,
    staging_root: PathBuf,
    flatten: bool,
    stamp_covers: bool,
    cancel: CancellationToken,
    staged_cover: Option<PathBuf>,
}

impl GroupMaterializer {
    /// Creates a materializer writing group directories under `staging_root`.
    pub fn new(
        codec: Arc<dyn ImageCodec>,
        pages: Arc<PageSet>,
        plan: Arc<SplitPlan>,
        spec: Arc<ArchiveJobSpec>,
        staging_root: impl Into<PathBuf>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            codec,
            pages,
            plan,
            spec,
            staging_root: staging_root.into(),
            flatten: false,
            stamp_covers: false,
            cancel,
            staged_cover: None,
        }
    }

    /// Put the metadata file at the group root instead of its original subdirectory.
    pub fn with_flatten(mut self, flatten: bool) -> Self {
        self.flatten = flatten;
        self
    }

    /// Stamp `"{index}/{total}"` onto cover copies.
    pub fn with_cover_stamp(mut self, stamp: bool) -> Self {
        self.stamp_covers = stamp;
        self
    }

    pub fn plan(&self) -> &SplitPlan {
        &self.plan
    }

    /// Staging directory of group `group_index`.
    pub fn group_dir(&self, group_index: usize) -> PathBuf {
        self.staging_root
            .join(self.plan.group_name(&self.spec.comic_name, group_index))
    }

    /// Copies the cover source aside so later groups can still read it after group 0 has
    /// moved its pages. Must run before any group is materialized.
    pub async fn stage_cover(&mut self) -> Result<()> {
        let needs_cover = self.plan.groups.iter().any(|g| g.carries_cover);
        let Some(cover) = self.plan.cover.filter(|_| needs_cover) else {
            return Ok(());
        };
        let source = &self.pages.images[cover].path;
        let dir = self.staging_root.join(COVER_DIR);
        fs::create_dir_all(&dir).await?;
        let staged = dir.join(get_file_name_lossy(source));
        fs::copy(source, &staged).await?;
        log::debug!("Cover {:?} staged at {:?}", source, staged);
        self.staged_cover = Some(staged);
        Ok(())
    }

    /// Fills the staging directory of one group.
    ///
    /// # Arguments
    ///
    /// * `group_index` - Index of the group in the plan
    /// * `pages_controller` - Runs one unit of work per page when given; pages are processed
    ///   sequentially otherwise
    ///
    /// # Returns
    ///
    /// * `Result<PathBuf>` - The group's staging directory, ready for compression
    ///
    /// # Errors
    ///
    /// * `Error::PartialWriteAbort` - The group stopped midway; its directory was removed
    pub async fn materialize(
        &self,
        group_index: usize,
        pages_controller: Option<&BatchController>,
    ) -> Result<PathBuf> {
        let group = self.plan.groups.get(group_index).ok_or_else(|| {
            Error::InvalidParameter(format!("Group {} is not part of the plan", group_index))
        })?;
        let dir = self.group_dir(group_index);

        match self.fill(group, &dir, pages_controller).await {
            Ok(()) => {
                log::debug!(
                    "Group {} materialized in {:?} ({} entries)",
                    group_index,
                    dir,
                    group.entry_count()
                );
                Ok(dir)
            }
            Err(e) => {
                log::error!(
                    "Materializing group {} of '{}' failed: {}",
                    group_index,
                    self.spec.comic_name,
                    e
                );
                clean_directory(&dir).await;
                Err(Error::PartialWriteAbort {
                    group: group_index,
                    source: Box::new(e),
                })
            }
        }
    }

    async fn fill(
        &self,
        group: &GroupPlan,
        dir: &Path,
        pages_controller: Option<&BatchController>,
    ) -> Result<()> {
        self.cancel.check()?;
        fs::create_dir_all(dir).await?;

        if group.carries_metadata {
            self.copy_metadata(dir).await?;
        }

        let width = group.sequence_width();
        if group.carries_cover {
            self.write_cover(group, dir, width).await?;
        }

        let jobs: Vec<(PathBuf, PathBuf)> = group
            .pages
            .iter()
            .enumerate()
            .map(|(offset, &page)| {
                let page = &self.pages.images[page];
                let name = page_file_name(
                    &self.spec.comic_name,
                    group.first_sequence() + offset,
                    width,
                    &page.extension,
                );
                (page.path.clone(), dir.join(name))
            })
            .collect();

        match pages_controller {
            Some(controller) => {
                let this = self.clone();
                controller
                    .try_run(jobs, move |(source, dest)| {
                        let this = this.clone();
                        async move { this.process_page(&source, &dest).await }
                    })
                    .await?;
            }
            None => {
                for (source, dest) in jobs {
                    self.cancel.check()?;
                    self.process_page(&source, &dest).await?;
                }
            }
        }
        Ok(())
    }

    async fn copy_metadata(&self, dir: &Path) -> Result<()> {
        let Some(index) = self.plan.metadata else {
            return Ok(());
        };
        let metadata = &self.pages.side_files[index];
        let dest = output_file_path(dir, &metadata.relative_path, self.flatten);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&metadata.path, &dest).await?;
        Ok(())
    }

    /// Writes the cover copy as sequence 1 without touching its source.
    async fn write_cover(&self, group: &GroupPlan, dir: &Path, width: usize) -> Result<()> {
        let Some(cover) = self.plan.cover else {
            return Ok(());
        };
        let page = &self.pages.images[cover];
        let source = self.staged_cover.clone().unwrap_or_else(|| page.path.clone());
        let dest = dir.join(page_file_name(
            &self.spec.comic_name,
            1,
            width,
            &page.extension,
        ));
        let stamp = self
            .stamp_covers
            .then_some((group.index + 1, self.plan.group_count));

        if self.spec.is_passthrough() && stamp.is_none() {
            fs::copy(&source, &dest).await?;
        } else {
            let bytes = self.render(source, stamp).await?;
            fs::write(&dest, bytes).await?;
        }
        Ok(())
    }

    async fn process_page(&self, source: &Path, dest: &Path) -> Result<()> {
        if self.spec.is_passthrough() {
            move_file(source, dest).await?;
        } else {
            let bytes = self.render(source.to_path_buf(), None).await?;
            fs::write(dest, bytes).await?;
            fs::remove_file(source).await?;
        }
        log::debug!("{:?} -> {:?}", source, dest);
        Ok(())
    }

    async fn render(&self, source: PathBuf, stamp: Option<(usize, usize)>) -> Result<Vec<u8>> {
        let codec = Arc::clone(&self.codec);
        let quality = self.spec.image_quality;
        let resize = self.spec.resize;
        spawn_blocking(move || render_page(codec.as_ref(), &source, quality, resize, stamp))
            .await?
    }
}

/// Renames `source` to `dest`, falling back to copy-then-delete across filesystems.
async fn move_file(source: &Path, dest: &Path) -> Result<()> {
    if fs::rename(source, dest).await.is_ok() {
        return Ok(());
    }
    fs::copy(source, dest).await?;
    fs::remove_file(source).await?;
    Ok(())
}
