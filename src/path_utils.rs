//! Path utilities for naming, padding and staging-tree handling.
//!
//! This module provides the small pieces of path arithmetic shared by the planner, the
//! materializer and the toolbox: zero-padded indices, page file names, output paths that
//! preserve (or flatten) the extracted directory structure, output-extension normalisation,
//! conflict resolution against the input path and glob matching for archive entries.

use crate::error::{Error, Result};
use crate::types::OutputFormat;

use regex::{Regex, RegexBuilder};
use std::path::{Component, Path, PathBuf};

/// Suffix appended when an output path would overwrite its input.
pub const CONFLICT_SUFFIX: &str = "_processed";

/// Gets the file name from a path with fallback to lossy conversion.
///
/// # Arguments
///
/// * `path` - The path to extract the file name from
///
/// # Returns
///
/// * `String` - The file name, using lossy conversion if necessary
pub fn get_file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Converts a path to a string with fallback to lossy conversion.
pub fn path_to_string_lossy(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Sanitizes a filename by replacing invalid characters with safe alternatives.
///
/// # Arguments
///
/// * `filename` - The filename to sanitize
///
/// # Returns
///
/// * `String` - The sanitized filename
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | '"' | '|' | '?' | '*' => '-',
            ':' => '-',
            '/' | '\\' => '-',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Number of decimal digits of `n` (`0` has one digit).
pub fn decimal_digits(n: usize) -> usize {
    let mut digits = 1;
    let mut rest = n / 10;
    while rest > 0 {
        digits += 1;
        rest /= 10;
    }
    digits
}

/// Left-pads `n` with zeros to `width` digits.
pub fn pad_index(n: usize, width: usize) -> String {
    format!("{:0width$}", n, width = width)
}

/// Destination name of a page: `{comic}_{sequence}{extension}`, spaces replaced by underscores.
pub fn page_file_name(comic_name: &str, sequence: usize, width: usize, extension: &str) -> String {
    format!("{}_{}{}", comic_name, pad_index(sequence, width), extension).replace(' ', "_")
}

/// Where a file enumerated at `relative_path` lands inside `staging_dir`.
///
/// Subdirectories are preserved unless `flatten` is set. Relative paths that would climb out
/// of the staging directory are flattened.
///
/// # Arguments
///
/// * `staging_dir` - Root of the group's staging directory
/// * `relative_path` - Path of the file relative to its extraction root
/// * `flatten` - Drop every directory component
///
/// # Returns
///
/// * `PathBuf` - Destination path; parent directories are not created
pub fn output_file_path(staging_dir: &Path, relative_path: &Path, flatten: bool) -> PathBuf {
    let file_name = get_file_name_lossy(relative_path);
    let escapes = relative_path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if flatten || escapes {
        return staging_dir.join(file_name);
    }
    staging_dir.join(relative_path)
}

/// Forces the extension of `output` to match the configured output format.
///
/// A missing extension is appended, a different one replaced.
pub fn normalize_output_extension(output: &Path, format: OutputFormat) -> PathBuf {
    let wanted = format.extension();
    match output.extension().map(|e| e.to_string_lossy().to_string()) {
        Some(ext) if ext == wanted => output.to_path_buf(),
        Some(ext) => {
            log::info!("Incorrect extension .{} replaced with .{}", ext, wanted);
            output.with_extension(wanted)
        }
        None => {
            log::info!("Adding extension .{} to {:?}", wanted, output);
            output.with_extension(wanted)
        }
    }
}

/// Compares two paths after making them absolute.
///
/// Case is ignored only where the default filesystems are case-insensitive (Windows, macOS).
pub fn paths_are_equal(a: &Path, b: &Path) -> bool {
    if a.as_os_str().is_empty() || b.as_os_str().is_empty() {
        return false;
    }
    let absolute = |p: &Path| std::path::absolute(p).unwrap_or_else(|_| p.to_path_buf());
    let (a, b) = (
        path_to_string_lossy(&absolute(a)),
        path_to_string_lossy(&absolute(b)),
    );
    if cfg!(any(target_os = "windows", target_os = "macos")) {
        a.eq_ignore_ascii_case(&b)
    } else {
        a == b
    }
}

/// Picks a sibling path when `output` would overwrite `input`.
///
/// Tries `{stem}{suffix}{ext}`, then `{stem}{suffix}_1{ext}`, `_2`, ... until a path is free.
pub fn resolve_output_conflict(output: &Path, input: &Path, suffix: &str) -> PathBuf {
    if !paths_are_equal(output, input) {
        return output.to_path_buf();
    }
    let directory = output.parent().map(Path::to_path_buf).unwrap_or_default();
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = output
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut candidate = directory.join(format!("{}{}{}", stem, suffix, extension));
    let mut counter = 1;
    while candidate.exists() || paths_are_equal(&candidate, input) {
        candidate = directory.join(format!("{}{}_{}{}", stem, suffix, counter, extension));
        counter += 1;
    }
    log::info!("Output {:?} conflicts with input, using {:?}", output, candidate);
    candidate
}

/// Compiles a `*`/`?` glob into a case-insensitive, fully anchored regex.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            c => expr.push_str(&regex::escape(&c.to_string())),
        }
    }
    expr.push('$');
    Ok(RegexBuilder::new(&expr).case_insensitive(true).build()?)
}

/// Highest numeric suffix tried by [`create_unique_dir`].
const MAX_UNIQUE_SUFFIX: usize = 999;

/// Creates a directory that did not exist before: `base`, or `base_1`, `base_2`, ... when
/// taken. Parents are created as needed.
///
/// # Returns
///
/// * `Result<PathBuf>` - The directory now owned by the caller
///
/// # Errors
///
/// * `Error::InvalidPath` - Every candidate already exists
pub async fn create_unique_dir(base: &Path) -> Result<PathBuf> {
    if let Some(parent) = base.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let name = get_file_name_lossy(base);
    for attempt in 0..=MAX_UNIQUE_SUFFIX {
        let candidate = if attempt == 0 {
            base.to_path_buf()
        } else {
            base.with_file_name(format!("{}_{}", name, attempt))
        };
        match tokio::fs::create_dir(&candidate).await {
            Ok(()) => {
                if attempt > 0 {
                    log::info!("{:?} already exists, staging in {:?}", base, candidate);
                }
                return Ok(candidate);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(Error::InvalidPath(
        base.to_path_buf(),
        "no free directory name left".to_string(),
    ))
}

/// Removes a directory tree, logging instead of failing.
pub async fn clean_directory(path: &Path) {
    if !path.exists() {
        return;
    }
    log::info!("Clean Buffer {:?}", path);
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        log::warn!("Unable to clean buffer directory {:?}: {}", path, e);
    }
}
