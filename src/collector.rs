//! Page enumeration and natural ordering.
//!
//! This module walks an extracted archive and produces a [`PageSet`]: image pages and side files,
//! each in natural (numeric-aware) order. Files of a directory come first, then its
//! subdirectories, depth-first in the same natural order as their names. Merging walks several
//! roots concurrently and concatenates the results in input order.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, try_join_all};
use lazy_static::lazy_static;
use rayon::prelude::*;
use regex::Regex;
use tokio::fs::read_dir;
use tokio::spawn;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::path_utils::get_file_name_lossy;
use crate::types::{Page, PageSet};

/// Limits the number of archive roots walked at the same time
const MAX_CONCURRENT_ROOTS: usize = 16;

lazy_static! {
    /// Splits a name into alternating digit / non-digit runs.
    pub static ref NATURAL_RUN_REGEX: Regex = Regex::new(r"\d+|\D+").unwrap();
}

/// Builds ordered page sets from extracted directory trees.
#[derive(Debug, Clone)]
pub struct Collector {
    root: PathBuf,
}

impl Collector {
    /// Creates a collector for `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Walks the root and classifies every file.
    ///
    /// # Returns
    ///
    /// * `Result<PageSet>` - Images and side files in natural order
    ///
    /// # Errors
    ///
    /// * `Error::NotFound` - The root does not exist
    /// * `Error::InvalidPath` - The root is not a directory
    ///
    /// Unreadable subdirectories are logged and skipped.
    pub async fn build(&self) -> Result<PageSet> {
        if !self.root.exists() {
            return Err(Error::NotFound(format!(
                "Extraction root {:?} does not exist",
                self.root
            )));
        }
        if !self.root.is_dir() {
            return Err(Error::InvalidPath(
                self.root.clone(),
                "not a directory".to_string(),
            ));
        }

        let mut pages = Vec::new();
        Self::walk(self.root.clone(), self.root.clone(), true, &mut pages).await?;

        let mut set = PageSet::new(self.root.clone());
        for page in pages {
            if page.is_image() {
                set.images.push(page);
            } else {
                set.side_files.push(page);
            }
        }
        log::debug!(
            "Enumerated {} pages and {} side files in {:?}",
            set.images.len(),
            set.side_files.len(),
            self.root
        );
        Ok(set)
    }

    /// Builds one page set per root concurrently and concatenates them in input order.
    ///
    /// Every root keeps its own natural order; results land in preallocated slots, so the
    /// order of completion does not matter.
    ///
    /// # Arguments
    ///
    /// * `common_root` - Root recorded on the merged set
    /// * `roots` - Extraction roots in the order their pages must appear
    pub async fn build_many(common_root: &Path, roots: Vec<PathBuf>) -> Result<PageSet> {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_ROOTS));
        let mut handles: Vec<JoinHandle<Result<(usize, PageSet)>>> = Vec::new();

        for (index, root) in roots.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            handles.push(spawn(async move {
                let _permit = semaphore.acquire().await?;
                let set = Collector::new(root).build().await?;
                Ok((index, set))
            }));
        }

        let results = try_join_all(handles).await.map_err(|e| {
            Error::AsyncTaskError(format!("Failed to join enumeration tasks: {}", e))
        })?;

        let mut slots: Vec<Option<PageSet>> = vec![None; results.len()];
        for res in results {
            let (index, set) = res?;
            slots[index] = Some(set);
        }

        Ok(PageSet::concat(
            common_root.to_path_buf(),
            slots.into_iter().flatten(),
        ))
    }

    /// Depth-first walk: files of `directory` first, then each subdirectory.
    fn walk<'a>(
        root: PathBuf,
        directory: PathBuf,
        is_root: bool,
        pages: &'a mut Vec<Page>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let (mut files, mut dirs) = match Self::read_entries(&directory).await {
                Ok(entries) => entries,
                Err(e) if !is_root => {
                    log::warn!("Skipping unreadable directory {:?}: {}", directory, e);
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            files.par_sort_by(|a, b| natural_path_cmp(&a.0, &b.0));
            dirs.par_sort_by(|a, b| natural_path_cmp(a, b));

            for (path, len) in files {
                let relative = path
                    .strip_prefix(&root)
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|_| PathBuf::from(get_file_name_lossy(&path)));
                pages.push(Page::new(path, relative, len));
            }

            for dir in dirs {
                Self::walk(root.clone(), dir, false, pages).await?;
            }
            Ok(())
        }
        .boxed()
    }

    /// Lists the files (with their length) and subdirectories of one directory.
    async fn read_entries(directory: &Path) -> Result<(Vec<(PathBuf, u64)>, Vec<PathBuf>)> {
        let mut files = Vec::new();
        let mut dirs = Vec::new();

        let mut entries = read_dir(directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                dirs.push(path);
            } else if file_type.is_file() {
                let len = entry.metadata().await?.len();
                files.push((path, len));
            }
        }
        Ok((files, dirs))
    }
}

/// Natural comparison of two file names.
///
/// Digit runs compare as integers (`page2` < `page10`), other runs compare case-insensitively.
/// Names that are equal under those rules fall back to plain string order so the sort is total.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut runs_a = NATURAL_RUN_REGEX.find_iter(a);
    let mut runs_b = NATURAL_RUN_REGEX.find_iter(b);

    loop {
        match (runs_a.next(), runs_b.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ra), Some(rb)) => {
                let (ra, rb) = (ra.as_str(), rb.as_str());
                let ordering = match (is_digit_run(ra), is_digit_run(rb)) {
                    (true, true) => compare_numeric_runs(ra, rb),
                    _ => ra.to_lowercase().cmp(&rb.to_lowercase()),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

/// Natural comparison of the file names of two paths.
pub fn natural_path_cmp(a: &Path, b: &Path) -> Ordering {
    natural_cmp(&get_file_name_lossy(a), &get_file_name_lossy(b))
}

fn is_digit_run(run: &str) -> bool {
    run.bytes().all(|b| b.is_ascii_digit())
}

// Compares arbitrarily long digit runs without parsing them.
fn compare_numeric_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rand::distributions::Alphanumeric;

    fn sorted(names: &[&str]) -> Vec<String> {
        let mut v: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        v.sort_by(|a, b| natural_cmp(a, b));
        v
    }

    fn temp_root() -> PathBuf {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        std::env::temp_dir().join(format!("bunkatsu-collector-{}", suffix))
    }

    #[test]
    fn test_natural_order_numeric_runs() {
        assert_eq!(
            sorted(&["p2.jpg", "p10.jpg", "p1.jpg"]),
            vec!["p1.jpg", "p2.jpg", "p10.jpg"]
        );
    }

    #[test]
    fn test_natural_order_case_insensitive() {
        assert_eq!(
            sorted(&["b.jpg", "A.jpg", "c.jpg"]),
            vec!["A.jpg", "b.jpg", "c.jpg"]
        );
        assert_eq!(natural_cmp("Page1", "page2"), Ordering::Less);
    }

    #[test]
    fn test_natural_order_leading_zeros_and_long_runs() {
        assert_eq!(compare_numeric_runs("007", "7"), Ordering::Equal);
        assert_eq!(natural_cmp("007", "7"), Ordering::Less);
        assert_eq!(natural_cmp("p007", "p8"), Ordering::Less);
        assert_eq!(
            natural_cmp("p99999999999999999999999", "p100000000000000000000000"),
            Ordering::Less
        );
        assert_eq!(
            sorted(&["ch10_p2", "ch2_p10", "ch2_p9"]),
            vec!["ch2_p9", "ch2_p10", "ch10_p2"]
        );
    }

    #[tokio::test]
    async fn test_build_missing_root() {
        let result = Collector::new(temp_root()).build().await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_build_orders_files_then_subdirectories() {
        let root = temp_root();
        std::fs::create_dir_all(root.join("chapter 10")).unwrap();
        std::fs::create_dir_all(root.join("chapter 2")).unwrap();
        for (path, content) in [
            ("p10.jpg", "x"),
            ("p2.JPG", "x"),
            ("ComicInfo.xml", "<xml/>"),
            ("chapter 2/a1.png", "x"),
            ("chapter 10/a1.png", "x"),
            ("chapter 2/notes.txt", ""),
        ] {
            std::fs::write(root.join(path), content).unwrap();
        }

        let set = Collector::new(&root).build().await.unwrap();
        let names: Vec<PathBuf> = set.images.iter().map(|p| p.relative_path.clone()).collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("p2.JPG"),
                PathBuf::from("p10.jpg"),
                PathBuf::from("chapter 2/a1.png"),
                PathBuf::from("chapter 10/a1.png"),
            ]
        );
        assert_eq!(set.side_files.len(), 2);
        assert_eq!(set.metadata_file(), Some(0));
        assert_eq!(set.images[0].extension, ".JPG");

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_build_skips_unreadable_subdirectory() {
        use std::os::unix::fs::PermissionsExt;

        let root = temp_root();
        let locked = root.join("locked");
        std::fs::create_dir_all(root.join("open")).unwrap();
        std::fs::create_dir_all(&locked).unwrap();
        std::fs::write(root.join("p1.jpg"), "x").unwrap();
        std::fs::write(root.join("open/p2.jpg"), "x").unwrap();
        std::fs::write(locked.join("p3.jpg"), "x").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
        // Privileged users can still list the directory.
        let listable = std::fs::read_dir(&locked).is_ok();

        let result = Collector::new(&root).build().await;
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

        let set = result.unwrap();
        let names: Vec<String> = set.images.iter().map(Page::file_name).collect();
        if listable {
            assert_eq!(names, vec!["p1.jpg", "p3.jpg", "p2.jpg"]);
        } else {
            assert_eq!(names, vec!["p1.jpg", "p2.jpg"]);
        }

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn test_build_many_keeps_input_order() {
        let base = temp_root();
        let a = base.join("archive_01");
        let b = base.join("archive_02");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        std::fs::write(b.join("b1.jpg"), "x").unwrap();
        std::fs::write(b.join("b2.jpg"), "x").unwrap();
        std::fs::write(a.join("a2.jpg"), "x").unwrap();
        std::fs::write(a.join("a1.jpg"), "x").unwrap();

        let set = Collector::build_many(&base, vec![a, b]).await.unwrap();
        let names: Vec<String> = set.images.iter().map(Page::file_name).collect();
        assert_eq!(names, vec!["a1.jpg", "a2.jpg", "b1.jpg", "b2.jpg"]);

        std::fs::remove_dir_all(&base).unwrap();
    }
}
