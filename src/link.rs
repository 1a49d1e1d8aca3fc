//! Linker and archiver front-ends.
//!
//! Thin boundaries to the external tools: assemble the command, run it,
//! hand back the output path.

use crate::{config::Tool, error::Result, utils};
use std::path::{Path, PathBuf};

/// Creates an object archive: `<ar> cr <archive> <objects...>`.
pub(crate) fn archive_objects(ar: &Tool, objects: &[PathBuf], output: &Path) -> Result<PathBuf> {
    ar.ensure_available()?;
    info!("archiving {} objects into {}", objects.len(), output.display());
    utils::create_parent_dir_all(output)?;
    let mut cmd = ar.command();
    cmd.arg("cr").arg(output);
    cmd.args(objects);
    utils::run_command(cmd).map_err(|err| err.for_file(output))?;
    Ok(output.to_path_buf())
}

/// Links an executable: `<ld> -o <exe> <objects...> <flags...>`.
pub(crate) fn link_exe(
    ld: &Tool,
    objects: &[PathBuf],
    output: &Path,
    flags: &[String],
) -> Result<PathBuf> {
    ld.ensure_available()?;
    info!("linking {} objects into {}", objects.len(), output.display());
    utils::create_parent_dir_all(output)?;
    let mut cmd = ld.command();
    cmd.arg("-o").arg(output);
    cmd.args(objects);
    cmd.args(flags);
    utils::run_command(cmd).map_err(|err| err.for_file(output))?;
    Ok(output.to_path_buf())
}
