//! Partitioning of a page set into output groups.
//!
//! Every strategy implements [`PartitionStrategy`]; [`plan`] drives one through the shared
//! post-processing (index width, cover and metadata placement) and returns the immutable
//! [`SplitPlan`] the materializer consumes.
//!
//! The cover is always the first image in natural order. Group 0 already holds it as its first
//! page, every later group receives a copy in front of its own pages.

use crate::error::{Error, Result};
use crate::path_utils::decimal_digits;
use crate::types::{ArchiveJobSpec, GroupPlan, MIN_INDEX_WIDTH, PageSet, SplitPlan, SplitStrategy};

const BYTES_PER_MIB: u64 = 1_048_576;

/// Strategy hooks used by [`plan`].
///
/// `assign_pages` returns, per group, indices into [`PageSet::images`]. The union of all groups
/// must be the full `0..N` range, in order, without duplicates.
pub trait PartitionStrategy: Send + Sync {
    /// Name used in log lines.
    fn name(&self) -> &'static str;

    /// Rejects parameters below their minimum. Runs before any I/O.
    fn validate(&self) -> Result<()>;

    /// Number of groups, used for index widths and cover labels.
    fn compute_group_count(&self, pages: &PageSet, spec: &ArchiveJobSpec) -> Result<usize>;

    fn assign_pages(
        &self,
        pages: &PageSet,
        spec: &ArchiveJobSpec,
        group_count: usize,
    ) -> Result<Vec<Vec<usize>>>;
}

/// Exactly `target` groups, the remainder folded into the last one.
#[derive(Debug, Clone, Copy)]
pub struct ByCount {
    pub target: usize,
}

/// At most `max_per_group` entries per group, cover copy included.
#[derive(Debug, Clone, Copy)]
pub struct ByMaxPages {
    pub max_per_group: usize,
}

/// At most `max_mib` MiB per group; a single oversized page still gets its own group.
#[derive(Debug, Clone, Copy)]
pub struct ByMaxSize {
    pub max_mib: u64,
}

/// One group holding every page. Used by compress and merge.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleGroup;

impl SplitStrategy {
    /// The planner implementing this strategy.
    pub fn planner(&self) -> Box<dyn PartitionStrategy> {
        match *self {
            SplitStrategy::ByCount(target) => Box::new(ByCount { target }),
            SplitStrategy::ByMaxPages(max_per_group) => Box::new(ByMaxPages { max_per_group }),
            SplitStrategy::ByMaxSize(max_mib) => Box::new(ByMaxSize { max_mib }),
            SplitStrategy::Whole => Box::new(SingleGroup),
        }
    }
}

impl PartitionStrategy for ByCount {
    fn name(&self) -> &'static str {
        "by-count"
    }

    fn validate(&self) -> Result<()> {
        if self.target < 2 {
            return Err(Error::InvalidParameter(format!(
                "Output count must be at least 2, got {}",
                self.target
            )));
        }
        Ok(())
    }

    fn compute_group_count(&self, pages: &PageSet, _spec: &ArchiveJobSpec) -> Result<usize> {
        let available = pages.image_count();
        if self.target > available {
            return Err(Error::InsufficientPages {
                requested: self.target,
                available,
            });
        }
        Ok(self.target)
    }

    fn assign_pages(
        &self,
        pages: &PageSet,
        _spec: &ArchiveJobSpec,
        group_count: usize,
    ) -> Result<Vec<Vec<usize>>> {
        let total = pages.image_count();
        let per_group = total / group_count;
        let groups = (0..group_count)
            .map(|g| {
                let start = g * per_group;
                let end = if g + 1 == group_count {
                    total
                } else {
                    start + per_group
                };
                (start..end).collect()
            })
            .collect();
        Ok(groups)
    }
}

impl ByMaxPages {
    fn cover_slot(spec: &ArchiveJobSpec, pages: &PageSet) -> usize {
        usize::from(spec.include_cover && pages.cover().is_some())
    }
}

impl PartitionStrategy for ByMaxPages {
    fn name(&self) -> &'static str {
        "by-max-pages"
    }

    fn validate(&self) -> Result<()> {
        if self.max_per_group < 2 {
            return Err(Error::InvalidParameter(format!(
                "Maximum pages per output must be at least 2, got {}",
                self.max_per_group
            )));
        }
        Ok(())
    }

    fn compute_group_count(&self, pages: &PageSet, spec: &ArchiveJobSpec) -> Result<usize> {
        let total = pages.image_count();
        let count = if Self::cover_slot(spec, pages) == 1 {
            total.saturating_sub(1).div_ceil(self.max_per_group - 1)
        } else {
            total.div_ceil(self.max_per_group)
        };
        Ok(count.max(1))
    }

    fn assign_pages(
        &self,
        pages: &PageSet,
        spec: &ArchiveJobSpec,
        _group_count: usize,
    ) -> Result<Vec<Vec<usize>>> {
        let total = pages.image_count();
        let cover_slot = Self::cover_slot(spec, pages);
        let mut groups = Vec::new();
        let mut cursor = 0;

        while cursor < total {
            let cap = if groups.is_empty() {
                self.max_per_group
            } else {
                self.max_per_group - cover_slot
            };
            let end = (cursor + cap).min(total);
            groups.push((cursor..end).collect());
            cursor = end;
        }
        Ok(groups)
    }
}

impl ByMaxSize {
    fn max_bytes(&self) -> u64 {
        self.max_mib.saturating_mul(BYTES_PER_MIB)
    }
}

impl PartitionStrategy for ByMaxSize {
    fn name(&self) -> &'static str {
        "by-max-size"
    }

    fn validate(&self) -> Result<()> {
        if self.max_mib < 2 {
            return Err(Error::InvalidParameter(format!(
                "Maximum output size must be at least 2 MB, got {}",
                self.max_mib
            )));
        }
        Ok(())
    }

    fn compute_group_count(&self, pages: &PageSet, _spec: &ArchiveJobSpec) -> Result<usize> {
        Ok((pages.total_image_bytes() / self.max_bytes()) as usize + 1)
    }

    fn assign_pages(
        &self,
        pages: &PageSet,
        spec: &ArchiveJobSpec,
        _group_count: usize,
    ) -> Result<Vec<Vec<usize>>> {
        let max_bytes = self.max_bytes();
        let metadata_cost = if spec.include_metadata {
            pages
                .metadata_file()
                .map(|i| pages.side_files[i].len)
                .unwrap_or(0)
        } else {
            0
        };
        let cover_cost = if spec.include_cover {
            pages.cover().map(|i| pages.images[i].len).unwrap_or(0)
        } else {
            0
        };

        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut current: Vec<usize> = Vec::new();
        let mut running = metadata_cost;

        for (index, page) in pages.images.iter().enumerate() {
            if !current.is_empty() && running + page.len > max_bytes {
                groups.push(std::mem::take(&mut current));
                running = metadata_cost + cover_cost;
            }
            running += page.len;
            current.push(index);
        }
        if !current.is_empty() {
            groups.push(current);
        }
        Ok(groups)
    }
}

impl PartitionStrategy for SingleGroup {
    fn name(&self) -> &'static str {
        "whole"
    }

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn compute_group_count(&self, _pages: &PageSet, _spec: &ArchiveJobSpec) -> Result<usize> {
        Ok(1)
    }

    fn assign_pages(
        &self,
        pages: &PageSet,
        _spec: &ArchiveJobSpec,
        _group_count: usize,
    ) -> Result<Vec<Vec<usize>>> {
        Ok(vec![(0..pages.image_count()).collect()])
    }
}

/// Computes the split plan for `pages`.
///
/// # Arguments
///
/// * `strategy` - Partitioning strategy
/// * `pages` - Enumerated pages
/// * `spec` - Job parameters (cover and metadata flags)
///
/// # Returns
///
/// * `Result<SplitPlan>` - The plan, or `InvalidParameter` / `InsufficientPages`
pub fn plan(
    strategy: &dyn PartitionStrategy,
    pages: &PageSet,
    spec: &ArchiveJobSpec,
) -> Result<SplitPlan> {
    strategy.validate()?;

    if pages.image_count() == 0 {
        return Err(Error::InsufficientPages {
            requested: 1,
            available: 0,
        });
    }

    let estimated = strategy.compute_group_count(pages, spec)?;
    let assignments = strategy.assign_pages(pages, spec, estimated)?;
    let group_count = estimated.max(assignments.len());
    let index_width = decimal_digits(group_count).max(MIN_INDEX_WIDTH);

    let cover = if spec.include_cover {
        let cover = pages.cover();
        if cover.is_none() {
            log::warn!("No cover found in {:?}, cover step skipped", pages.root);
        }
        cover
    } else {
        None
    };

    let metadata = if spec.include_metadata {
        let metadata = pages.metadata_file();
        if metadata.is_none() {
            log::info!("No metadata file found in {:?}", pages.root);
        }
        metadata
    } else {
        None
    };

    let groups = assignments
        .into_iter()
        .enumerate()
        .map(|(index, pages)| GroupPlan {
            index,
            pages,
            carries_cover: cover.is_some() && index > 0,
            carries_metadata: metadata.is_some(),
        })
        .collect::<Vec<_>>();

    log::debug!(
        "Planned {} groups ({} declared) with {} for {} pages",
        groups.len(),
        group_count,
        strategy.name(),
        pages.image_count()
    );

    Ok(SplitPlan {
        group_count,
        index_width,
        groups,
        cover,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Page;
    use std::path::PathBuf;

    fn page_set(sizes: &[u64]) -> PageSet {
        let mut set = PageSet::new(PathBuf::from("/buffer/extracted"));
        for (i, len) in sizes.iter().enumerate() {
            let name = format!("p{:03}.jpg", i);
            set.images.push(Page::new(
                PathBuf::from("/buffer/extracted").join(&name),
                PathBuf::from(name),
                *len,
            ));
        }
        set
    }

    fn spec(strategy: SplitStrategy, include_cover: bool) -> ArchiveJobSpec {
        ArchiveJobSpec::builder()
            .comic_name("Comic")
            .strategy(strategy)
            .include_cover(include_cover)
            .include_metadata(false)
            .build()
            .unwrap()
    }

    fn plan_for(strategy: SplitStrategy, sizes: &[u64], include_cover: bool) -> Result<SplitPlan> {
        let job = spec(strategy, include_cover);
        plan(strategy.planner().as_ref(), &page_set(sizes), &job)
    }

    fn flattened(plan: &SplitPlan) -> Vec<usize> {
        plan.groups.iter().flat_map(|g| g.pages.clone()).collect()
    }

    #[test]
    fn test_every_strategy_covers_all_pages_once() {
        let sizes: Vec<u64> = (0..37).map(|i| 200_000 + i * 10_000).collect();
        for strategy in [
            SplitStrategy::ByCount(5),
            SplitStrategy::ByMaxPages(6),
            SplitStrategy::ByMaxSize(2),
            SplitStrategy::Whole,
        ] {
            for include_cover in [true, false] {
                let plan = plan_for(strategy, &sizes, include_cover).unwrap();
                assert_eq!(flattened(&plan), (0..37).collect::<Vec<_>>(), "{:?}", strategy);
                assert!(plan.group_count >= plan.groups.len());
            }
        }
    }

    #[test]
    fn test_by_count_exactness() {
        let plan = plan_for(SplitStrategy::ByCount(4), &[1; 23], false).unwrap();
        let sizes: Vec<usize> = plan.groups.iter().map(|g| g.pages.len()).collect();
        assert_eq!(sizes, vec![5, 5, 5, 8]);
        assert_eq!(plan.group_count, 4);
    }

    #[test]
    fn test_by_count_ten_pages_with_cover() {
        let plan = plan_for(SplitStrategy::ByCount(3), &[1; 10], true).unwrap();
        assert_eq!(plan.groups[0].pages, vec![0, 1, 2]);
        assert_eq!(plan.groups[1].pages, vec![3, 4, 5]);
        assert_eq!(plan.groups[2].pages, vec![6, 7, 8, 9]);
        let entries: Vec<usize> = plan.groups.iter().map(GroupPlan::entry_count).collect();
        assert_eq!(entries, vec![3, 4, 5]);
        assert!(!plan.groups[0].carries_cover);
        assert!(plan.groups[1].carries_cover);
        assert_eq!(plan.groups[1].first_sequence(), 2);
        assert_eq!(plan.cover, Some(0));
    }

    #[test]
    fn test_by_count_parameter_errors() {
        assert!(matches!(
            plan_for(SplitStrategy::ByCount(1), &[1; 10], true),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            plan_for(SplitStrategy::ByCount(5), &[1; 3], true),
            Err(Error::InsufficientPages {
                requested: 5,
                available: 3
            })
        ));
    }

    #[test]
    fn test_zero_pages_is_insufficient() {
        for strategy in [SplitStrategy::ByMaxPages(3), SplitStrategy::Whole] {
            assert!(matches!(
                plan_for(strategy, &[], true),
                Err(Error::InsufficientPages { available: 0, .. })
            ));
        }
    }

    #[test]
    fn test_by_max_pages_bound_and_count() {
        let plan = plan_for(SplitStrategy::ByMaxPages(4), &[1; 10], true).unwrap();
        assert_eq!(plan.group_count, 3);
        assert_eq!(plan.groups.len(), 3);
        for group in &plan.groups {
            assert!(group.entry_count() <= 4);
        }

        let plan = plan_for(SplitStrategy::ByMaxPages(4), &[1; 10], false).unwrap();
        assert_eq!(plan.group_count, 3);
        let sizes: Vec<usize> = plan.groups.iter().map(|g| g.pages.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);

        let plan = plan_for(SplitStrategy::ByMaxPages(4), &[1], true).unwrap();
        assert_eq!(plan.groups.len(), 1);

        assert!(matches!(
            plan_for(SplitStrategy::ByMaxPages(1), &[1; 10], true),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_by_max_size_lower_bound() {
        let huge = 5 * BYTES_PER_MIB;
        let plan = plan_for(SplitStrategy::ByMaxSize(2), &[huge, 10, 10, huge], false).unwrap();
        for group in &plan.groups {
            assert!(!group.pages.is_empty());
        }
        assert_eq!(plan.groups[0].pages, vec![0]);
        assert_eq!(plan.groups[1].pages, vec![1, 2]);
        assert_eq!(plan.groups[2].pages, vec![3]);
        // Estimate is 10 MiB / 2 MiB + 1.
        assert_eq!(plan.group_count, 6);

        assert!(matches!(
            plan_for(SplitStrategy::ByMaxSize(1), &[1; 10], true),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_by_max_size_counts_cover_in_later_groups() {
        let mib = BYTES_PER_MIB;
        // Cover is 1 MiB, so later groups only fit one more 1 MiB page.
        let plan = plan_for(SplitStrategy::ByMaxSize(2), &[mib, mib, mib, mib], true).unwrap();
        let sizes: Vec<usize> = plan.groups.iter().map(|g| g.pages.len()).collect();
        assert_eq!(sizes, vec![2, 1, 1]);
    }

    #[test]
    fn test_index_width() {
        let plan = plan_for(SplitStrategy::ByCount(7), &[1; 7], false).unwrap();
        assert_eq!(plan.index_width, 2);
        assert_eq!(plan.group_name("Comic", 0), "Comic_01");

        let plan = plan_for(SplitStrategy::ByCount(150), &[1; 150], false).unwrap();
        assert_eq!(plan.index_width, 3);
        assert_eq!(plan.group_name("Comic", 149), "Comic_150");
    }

    #[test]
    fn test_metadata_is_best_effort() {
        let mut pages = page_set(&[1; 4]);
        let job = ArchiveJobSpec::builder()
            .comic_name("Comic")
            .include_metadata(true)
            .build()
            .unwrap();
        let without = plan(&SingleGroup, &pages, &job).unwrap();
        assert_eq!(without.metadata, None);
        assert!(!without.groups[0].carries_metadata);

        pages.side_files.push(Page::new(
            PathBuf::from("/buffer/extracted/empty.xml"),
            PathBuf::from("empty.xml"),
            0,
        ));
        pages.side_files.push(Page::new(
            PathBuf::from("/buffer/extracted/ComicInfo.xml"),
            PathBuf::from("ComicInfo.xml"),
            120,
        ));
        let with = plan(&SingleGroup, &pages, &job).unwrap();
        assert_eq!(with.metadata, Some(1));
        assert!(with.groups[0].carries_metadata);
    }
}
