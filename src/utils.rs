//! Utility functions

use crate::error::{Error, Result};
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};
use walkdir::WalkDir;

/// Returns an iterator that yields all files under the given root, skipping
/// any whose basename is in `skip_files`.
///
/// This also follows symlinks.
pub fn source_files_iter<'a>(
    root: &Path,
    skip_files: &'a HashSet<String>,
) -> impl Iterator<Item = PathBuf> + 'a {
    WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let skip = e.file_name().to_str().map(|name| skip_files.contains(name)).unwrap_or(false);
            if skip {
                debug!("skipping {}", e.path().display());
            }
            !skip
        })
        .map(|e| e.path().into())
}

/// Computes the content checksum of a file.
///
/// The same bytes always produce the same hash, across runs and platforms;
/// the value is persisted as a decimal integer.
pub fn file_checksum(path: &Path) -> Result<u32> {
    let content = fs::read(path).map_err(|err| Error::io(err, path))?;
    Ok(crc32fast::hash(&content))
}

/// Checksum of a string, used for flag sets.
pub fn string_checksum(s: &str) -> u32 {
    crc32fast::hash(s.as_bytes())
}

/// Maps an input file path to its location under the output root.
///
/// Files under one of the source roots keep their relative location; files
/// already under the output root are returned unchanged; anything else lands
/// at the top of the output root.
pub fn input_to_output_fpath(source_roots: &[PathBuf], output_root: &Path, input: &Path) -> PathBuf {
    if input.starts_with(output_root) {
        return input.to_path_buf();
    }
    for root in source_roots {
        if let Ok(relative) = input.strip_prefix(root) {
            return output_root.join(relative);
        }
    }
    match input.file_name() {
        Some(name) => output_root.join(name),
        None => output_root.to_path_buf(),
    }
}

/// Creates all missing ancestors of the given file path.
pub fn create_parent_dir_all(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| Error::io(err, parent))?;
    }
    Ok(())
}

/// Runs an external tool to completion, capturing its output.
///
/// A non-zero exit status becomes a [`Error::ToolFailure`] carrying the
/// tool's stderr (or stdout if stderr is empty).
pub fn run_command(mut cmd: Command) -> Result<()> {
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    trace!(?cmd, "running command");
    let program = cmd.get_program().to_string_lossy().into_owned();
    let output = cmd.output().map_err(|err| Error::io(err, PathBuf::from(&program)))?;
    if !output.status.success() {
        return Err(Error::tool_output(program, &output));
    }
    Ok(())
}

/// Looks a program up on `PATH`.
pub fn find_program(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path).map(|dir| dir.join(name)).find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0).unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
