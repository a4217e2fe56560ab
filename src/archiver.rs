//! Archive tool collaborator.
//!
//! [`ArchiveTool`] abstracts the (de)compression backend. Two implementations are provided:
//!
//! - [`ZipArchiver`]: in-process, built on the `zip` crate. Writes CBZ only.
//! - [`SevenZipArchiver`]: drives an external `7z` executable and writes every output format.
//!
//! Every failure is logged by the tool and surfaced as `Error::ExternalToolFailure`.

use std::fmt::Display;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use memmap2::MmapOptions;
use tokio::process::Command;
use tokio::task::spawn_blocking;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::collector::natural_cmp;
use crate::error::{Error, Result};
use crate::path_utils::{get_file_name_lossy, glob_to_regex, path_to_string_lossy};
use crate::types::OutputFormat;

/// Contract of the archive (de)compression backend.
#[async_trait]
pub trait ArchiveTool: Send + Sync {
    /// Name used in log lines.
    fn name(&self) -> &'static str;

    /// Extracts the whole archive into `dest_dir`, preserving its directory structure.
    async fn extract(&self, archive: &Path, dest_dir: &Path) -> Result<()>;

    /// Extracts entries whose file name matches `pattern` flat into `dest_dir`.
    async fn extract_by_pattern(&self, archive: &Path, dest_dir: &Path, pattern: &str)
    -> Result<()>;

    /// Packs the content of `source_dir` into `archive`, replacing an existing file.
    async fn compress(&self, source_dir: &Path, archive: &Path, format: OutputFormat)
    -> Result<()>;

    /// Adds `file` to the archive root, replacing an entry with the same name.
    async fn update_entry(&self, archive: &Path, file: &Path) -> Result<()>;

    /// Removes every entry whose file name matches `pattern`.
    async fn remove_entry(&self, archive: &Path, pattern: &str) -> Result<()>;
}

fn failure(operation: &str, path: &Path, cause: impl Display) -> Error {
    log::error!("{} failed for {:?}: {}", operation, path, cause);
    Error::tool(operation, path, cause)
}

fn ensure_exists(archive: &Path) -> Result<()> {
    if archive.exists() {
        Ok(())
    } else {
        Err(Error::NotFound(format!(
            "Archive {:?} does not exist",
            archive
        )))
    }
}

/// In-process ZIP backend.
#[derive(Debug, Clone, Copy)]
pub struct ZipArchiver {
    options: SimpleFileOptions,
}

impl Default for ZipArchiver {
    fn default() -> Self {
        Self {
            options: SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .unix_permissions(0o755),
        }
    }
}

impl ZipArchiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files under `dir` as `(entry name, absolute path)`, in natural order of the entry name.
    fn collect_files(dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
        let mut files = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            for entry in std::fs::read_dir(&current)? {
                let entry = entry?;
                let path = entry.path();
                if entry.file_type()?.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(dir) {
                    let name = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().to_string())
                        .collect::<Vec<_>>()
                        .join("/");
                    files.push((name, path));
                }
            }
        }
        files.sort_by(|a, b| natural_cmp(&a.0, &b.0));
        Ok(files)
    }

    fn write_archive(&self, source_dir: &Path, archive: &Path) -> Result<usize> {
        let files = Self::collect_files(source_dir)?;
        if let Some(parent) = archive.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut zip = ZipWriter::new(File::create(archive)?);
        for (name, path) in &files {
            let file = File::open(path)?;
            zip.start_file(name.as_str(), self.options)?;
            if file.metadata()?.len() > 0 {
                // Safety: the staging tree is owned by the running job and not modified here.
                let mmap = unsafe { MmapOptions::new().map(&file)? };
                zip.write_all(&mmap[..])?;
            }
        }
        zip.finish()?;
        Ok(files.len())
    }

    fn extract_matching(archive: &Path, dest_dir: &Path, pattern: &str) -> Result<usize> {
        let matcher = glob_to_regex(pattern)?;
        let mut zip = ZipArchive::new(File::open(archive)?)?;
        std::fs::create_dir_all(dest_dir)?;

        let mut extracted = 0;
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let Some(name) = entry.enclosed_name() else {
                continue;
            };
            let file_name = get_file_name_lossy(&name);
            if !matcher.is_match(&file_name) {
                continue;
            }
            let mut out = File::create(dest_dir.join(&file_name))?;
            std::io::copy(&mut entry, &mut out)?;
            extracted += 1;
        }
        Ok(extracted)
    }

    /// Rewrites `archive` through a temporary sibling, keeping entries accepted by `keep`
    /// and appending `extra` (entry name, source path) at the end.
    fn rewrite<F>(&self, archive: &Path, keep: F, extra: Option<(String, PathBuf)>) -> Result<usize>
    where
        F: Fn(&str) -> bool,
    {
        let temp = archive.with_extension("bunkatsu-tmp");
        let written = self
            .write_filtered(archive, &temp, keep, extra)
            .and_then(|dropped| {
                std::fs::rename(&temp, archive)?;
                Ok(dropped)
            });
        if written.is_err() && temp.exists() {
            if let Err(e) = std::fs::remove_file(&temp) {
                log::warn!("Unable to remove temporary archive {:?}: {}", temp, e);
            }
        }
        written
    }

    fn write_filtered<F>(
        &self,
        archive: &Path,
        temp: &Path,
        keep: F,
        extra: Option<(String, PathBuf)>,
    ) -> Result<usize>
    where
        F: Fn(&str) -> bool,
    {
        let mut dropped = 0;
        let mut source = ZipArchive::new(File::open(archive)?)?;
        let mut zip = ZipWriter::new(File::create(temp)?);
        for i in 0..source.len() {
            let entry = source.by_index_raw(i)?;
            let file_name = get_file_name_lossy(Path::new(entry.name()));
            if keep(&file_name) {
                zip.raw_copy_file(entry)?;
            } else {
                dropped += 1;
            }
        }
        if let Some((name, path)) = extra {
            zip.start_file(name.as_str(), self.options)?;
            zip.write_all(&std::fs::read(&path)?)?;
        }
        zip.finish()?;
        Ok(dropped)
    }
}

#[async_trait]
impl ArchiveTool for ZipArchiver {
    fn name(&self) -> &'static str {
        "zip"
    }

    async fn extract(&self, archive: &Path, dest_dir: &Path) -> Result<()> {
        ensure_exists(archive)?;
        log::info!("Extracting {:?} into {:?}", archive, dest_dir);
        let (source, dest) = (archive.to_path_buf(), dest_dir.to_path_buf());
        spawn_blocking(move || -> Result<()> {
            std::fs::create_dir_all(&dest)?;
            let mut zip = ZipArchive::new(File::open(&source)?)?;
            zip.extract(&dest)?;
            Ok(())
        })
        .await?
        .map_err(|e| failure("extract", archive, e))
    }

    async fn extract_by_pattern(
        &self,
        archive: &Path,
        dest_dir: &Path,
        pattern: &str,
    ) -> Result<()> {
        ensure_exists(archive)?;
        let (source, dest, glob) = (
            archive.to_path_buf(),
            dest_dir.to_path_buf(),
            pattern.to_string(),
        );
        let count = spawn_blocking(move || Self::extract_matching(&source, &dest, &glob))
            .await?
            .map_err(|e| failure("extract_by_pattern", archive, e))?;
        log::info!(
            "Extracted {} entries matching '{}' from {:?}",
            count,
            pattern,
            archive
        );
        Ok(())
    }

    async fn compress(
        &self,
        source_dir: &Path,
        archive: &Path,
        format: OutputFormat,
    ) -> Result<()> {
        if format != OutputFormat::Cbz {
            return Err(Error::Unsupported(format!(
                "The zip backend cannot write .{} archives",
                format.extension()
            )));
        }
        if !source_dir.is_dir() {
            return Err(Error::NotFound(format!(
                "Directory {:?} does not exist",
                source_dir
            )));
        }
        let this = *self;
        let (source, target) = (source_dir.to_path_buf(), archive.to_path_buf());
        let count = spawn_blocking(move || this.write_archive(&source, &target))
            .await?
            .map_err(|e| failure("compress", archive, e))?;
        log::info!("Compressed {} files into {:?}", count, archive);
        Ok(())
    }

    async fn update_entry(&self, archive: &Path, file: &Path) -> Result<()> {
        ensure_exists(archive)?;
        if !file.is_file() {
            return Err(Error::NotFound(format!("File {:?} does not exist", file)));
        }
        let this = *self;
        let name = get_file_name_lossy(file);
        let target = archive.to_path_buf();
        let extra = (name.clone(), file.to_path_buf());
        spawn_blocking(move || {
            let wanted = name;
            this.rewrite(&target, |entry| entry != wanted, Some(extra))
        })
        .await?
        .map_err(|e| failure("update_entry", archive, e))?;
        log::info!("Updated {:?} in {:?}", file, archive);
        Ok(())
    }

    async fn remove_entry(&self, archive: &Path, pattern: &str) -> Result<()> {
        ensure_exists(archive)?;
        let matcher = glob_to_regex(pattern)?;
        let this = *self;
        let target = archive.to_path_buf();
        let removed = spawn_blocking(move || {
            this.rewrite(&target, |entry| !matcher.is_match(entry), None)
        })
        .await?
        .map_err(|e| failure("remove_entry", archive, e))?;
        log::info!(
            "Removed {} entries matching '{}' from {:?}",
            removed,
            pattern,
            archive
        );
        Ok(())
    }
}

/// Backend launching an external 7-Zip executable.
#[derive(Debug, Clone)]
pub struct SevenZipArchiver {
    executable: PathBuf,
}

impl Default for SevenZipArchiver {
    fn default() -> Self {
        Self::new("7z")
    }
}

impl SevenZipArchiver {
    /// Uses `executable` (a path or a name resolved through `PATH`).
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    async fn run(&self, operation: &str, archive: &Path, args: Vec<String>) -> Result<()> {
        log::debug!("{:?} {}", self.executable, args.join(" "));
        let output = Command::new(&self.executable)
            .args(&args)
            .output()
            .await
            .map_err(|e| failure(operation, archive, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failure(
                operation,
                archive,
                format!("{} ({})", stderr.trim(), output.status),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ArchiveTool for SevenZipArchiver {
    fn name(&self) -> &'static str {
        "7z"
    }

    async fn extract(&self, archive: &Path, dest_dir: &Path) -> Result<()> {
        ensure_exists(archive)?;
        log::info!("Extracting {:?} into {:?}", archive, dest_dir);
        let args = vec![
            "x".to_string(),
            "-aoa".to_string(),
            format!("-o{}", path_to_string_lossy(dest_dir)),
            path_to_string_lossy(archive),
        ];
        self.run("extract", archive, args).await
    }

    async fn extract_by_pattern(
        &self,
        archive: &Path,
        dest_dir: &Path,
        pattern: &str,
    ) -> Result<()> {
        ensure_exists(archive)?;
        let args = vec![
            "e".to_string(),
            path_to_string_lossy(archive),
            format!("-o{}", path_to_string_lossy(dest_dir)),
            "-aoa".to_string(),
            "-r".to_string(),
            pattern.to_string(),
        ];
        self.run("extract_by_pattern", archive, args).await
    }

    async fn compress(
        &self,
        source_dir: &Path,
        archive: &Path,
        format: OutputFormat,
    ) -> Result<()> {
        if !source_dir.is_dir() {
            return Err(Error::NotFound(format!(
                "Directory {:?} does not exist",
                source_dir
            )));
        }
        log::info!("Compressing {:?} into {:?}", source_dir, archive);
        let args = vec![
            "a".to_string(),
            "-aoa".to_string(),
            format!("-t{}", format.container()),
            path_to_string_lossy(archive),
            path_to_string_lossy(&source_dir.join("*")),
        ];
        self.run("compress", archive, args).await
    }

    async fn update_entry(&self, archive: &Path, file: &Path) -> Result<()> {
        ensure_exists(archive)?;
        let args = vec![
            "u".to_string(),
            path_to_string_lossy(archive),
            path_to_string_lossy(file),
        ];
        self.run("update_entry", archive, args).await
    }

    async fn remove_entry(&self, archive: &Path, pattern: &str) -> Result<()> {
        ensure_exists(archive)?;
        let args = vec![
            "d".to_string(),
            path_to_string_lossy(archive),
            pattern.to_string(),
            "-r".to_string(),
        ];
        self.run("remove_entry", archive, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_archive_is_not_found() {
        let tool = ZipArchiver::new();
        let result = tool
            .extract(Path::new("/nonexistent/book.cbz"), Path::new("/tmp"))
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_zip_backend_rejects_other_formats() {
        let tool = ZipArchiver::new();
        let result = tool
            .compress(&std::env::temp_dir(), Path::new("out.cb7"), OutputFormat::Cb7)
            .await;
        assert!(matches!(result, Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_failed_rewrite_removes_temporary_archive() {
        let dir = std::env::temp_dir().join(format!("bunkatsu-rewrite-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let archive = dir.join("book.cbz");
        {
            let mut zip = ZipWriter::new(File::create(&archive).unwrap());
            zip.start_file("p1.jpg", SimpleFileOptions::default()).unwrap();
            zip.write_all(b"page").unwrap();
            zip.finish().unwrap();
        }
        let original = std::fs::read(&archive).unwrap();

        // The replacement file vanished after the rewrite started.
        let extra = Some(("ComicInfo.xml".to_string(), dir.join("missing.xml")));
        let result = ZipArchiver::new().rewrite(&archive, |_| true, extra);
        assert!(result.is_err());
        assert!(!archive.with_extension("bunkatsu-tmp").exists());
        assert_eq!(std::fs::read(&archive).unwrap(), original);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_missing_seven_zip_executable_is_tool_failure() {
        let tool = SevenZipArchiver::new("/nonexistent/bin/7z");
        let dir = std::env::temp_dir();
        let result = tool
            .compress(&dir, &dir.join("bunkatsu-never.cbz"), OutputFormat::Cbz)
            .await;
        assert!(matches!(result, Err(Error::ExternalToolFailure { .. })));
    }
}
