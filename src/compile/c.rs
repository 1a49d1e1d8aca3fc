//! C compilation.
//!
//! Headers are already inlined by preprocessing, so C files carry no
//! inter-file ordering constraints and compile as one parallel batch. The
//! recompile key is the Fortran one minus module dependencies.

use super::{recompile_reasons, CompiledFile, ModuleHashes};
use crate::{
    analysis::AnalysedFile,
    cache::CompileCache,
    error::{split_results, Error, Result},
    resolver::DepGraph,
    sources::SourceKind,
    utils, Project,
};
use rayon::prelude::*;
use std::{fs, path::Path};

/// Compiles all C files of the build tree.
pub(crate) fn compile(
    project: &Project,
    pool: &rayon::ThreadPool,
    tree: &DepGraph,
    cache: &CompileCache,
) -> Result<Vec<CompiledFile>> {
    let to_compile: Vec<&AnalysedFile> =
        tree.values().filter(|af| SourceKind::of(&af.path) == SourceKind::C).collect();
    info!("compiling {} c files", to_compile.len());
    if to_compile.is_empty() {
        return Ok(Vec::new());
    }
    project.tools.cc.ensure_available()?;

    let results = pool.install(|| {
        to_compile.par_iter().map(|af| process_file(project, cache, af)).collect::<Vec<_>>()
    });
    let (compiled, errors) = split_results(results);
    if !errors.is_empty() {
        error!("there were {} errors compiling {} c files", errors.len(), to_compile.len());
        return Err(Error::collect(errors));
    }
    info!("compiled {} c files", compiled.len());
    Ok(compiled)
}

fn process_file(project: &Project, cache: &CompileCache, af: &AnalysedFile) -> Result<CompiledFile> {
    let output_path = project.paths.output_fpath(&af.path).with_extension("o");

    let flags = project.cc_flags.flags_for_path(&af.path, &project.paths);
    let flags_hash = utils::string_checksum(&flags.join(" "));

    let reasons = recompile_reasons(af, flags_hash, &ModuleHashes::new(), cache.get(&af.path));
    if reasons.is_empty() {
        debug!("c compiler skipping: {}", af.path.display());
    } else {
        debug!("compiling {} ({})", af.path.display(), reasons.join(", "));
        compile_file(project, af, &flags, &output_path)?;
    }

    Ok(CompiledFile {
        input_path: af.path.clone(),
        output_path,
        source_hash: af.file_hash,
        flags_hash,
        module_deps_hashes: ModuleHashes::new(),
    })
}

fn compile_file(
    project: &Project,
    af: &AnalysedFile,
    flags: &[String],
    output_path: &Path,
) -> Result<()> {
    utils::create_parent_dir_all(output_path)?;

    let mut cmd = project.tools.cc.command();
    cmd.args(flags);
    cmd.arg(&af.path);
    cmd.arg("-o").arg(output_path);

    if let Err(err) = utils::run_command(cmd) {
        let _ = fs::remove_file(output_path);
        return Err(err.for_file(&af.path));
    }
    Ok(())
}
