//! Wave-based parallel Fortran compilation.
//!
//! Every pass compiles the largest set of files whose Fortran dependencies
//! are already built, then hashes the module artifacts that pass produced
//! and publishes them to the next one. The module-hash map is only ever
//! written between waves, on the engine thread, so workers read it without
//! synchronisation.

use super::{module_artifact_hashes, recompile_reasons, CompiledFile, ModuleHashes};
use crate::{
    analysis::AnalysedFile,
    cache::CompileCache,
    error::{split_results, Error, Result},
    resolver::DepGraph,
    sources, utils, Project,
};
use rayon::prelude::*;
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

/// Compiles all Fortran files of the build tree, in waves.
pub(crate) fn compile(
    project: &Project,
    pool: &rayon::ThreadPool,
    tree: &DepGraph,
    cache: &CompileCache,
) -> Result<Vec<CompiledFile>> {
    let mut to_compile: Vec<&AnalysedFile> = tree.values().filter(|af| af.is_fortran()).collect();
    info!("compiling {} fortran files", to_compile.len());
    if to_compile.is_empty() {
        return Ok(Vec::new());
    }
    project.tools.fc.ensure_available()?;

    fs::create_dir_all(&project.paths.mods)
        .map_err(|err| Error::io(err, &project.paths.mods))?;

    let mut mod_hashes = ModuleHashes::new();
    let mut compiled_paths: HashSet<&Path> = HashSet::new();
    let mut all_compiled = Vec::new();
    let mut per_pass = Vec::new();

    while !to_compile.is_empty() {
        let wave = next_wave(&to_compile, &compiled_paths)?;
        info!("compiling {} of {} remaining files", wave.len(), to_compile.len());

        let results = pool.install(|| {
            wave.par_iter()
                .map(|af| process_file(project, cache, &mod_hashes, af))
                .collect::<Vec<_>>()
        });
        // complete the wave before failing so the report is comprehensive
        let (compiled_this_pass, errors) = split_results(results);
        if !errors.is_empty() {
            error!("there were {} compile errors this pass", errors.len());
            return Err(Error::collect(errors));
        }
        if compiled_this_pass.is_empty() {
            return Err(Error::NoProgress);
        }
        per_pass.push(compiled_this_pass.len());

        // publish the module artifacts of this wave to the next one
        mod_hashes.extend(module_artifact_hashes(&wave, &project.paths.mods)?);

        compiled_paths.extend(wave.iter().map(|af| af.path.as_path()));
        all_compiled.extend(compiled_this_pass);
        to_compile.retain(|af| !compiled_paths.contains(af.path.as_path()));
    }

    debug!("compiled per pass {per_pass:?}");
    info!("total compiled {}", all_compiled.len());
    Ok(all_compiled)
}

/// The files whose Fortran dependencies are all built. An empty result with
/// work remaining is a deadlock and fatal: the report lists every unready
/// file with the dependencies it is still waiting for.
fn next_wave<'a>(
    to_compile: &[&'a AnalysedFile],
    compiled: &HashSet<&Path>,
) -> Result<Vec<&'a AnalysedFile>> {
    let mut ready = Vec::new();
    let mut not_ready: Vec<(&Path, Vec<&Path>)> = Vec::new();
    for af in to_compile {
        let unfulfilled: Vec<&Path> = af
            .file_deps
            .iter()
            .map(PathBuf::as_path)
            .filter(|dep| sources::is_fortran(dep) && !compiled.contains(dep))
            .collect();
        if unfulfilled.is_empty() {
            ready.push(*af);
        } else {
            not_ready.push((af.path.as_path(), unfulfilled));
        }
    }

    if ready.is_empty() && !to_compile.is_empty() {
        let mut report = String::new();
        for (path, unfulfilled) in not_ready {
            report.push_str(&format!("\n{}", path.display()));
            for dep in unfulfilled {
                report.push_str(&format!("\n    {}", dep.display()));
            }
        }
        return Err(Error::UnfulfilledDependencies(report));
    }
    Ok(ready)
}

/// Prepares to compile one Fortran file, and compiles it if anything in its
/// recompile key changed since the last run.
fn process_file(
    project: &Project,
    cache: &CompileCache,
    mod_hashes: &ModuleHashes,
    af: &AnalysedFile,
) -> Result<CompiledFile> {
    let output_path = project.paths.output_fpath(&af.path).with_extension("o");

    let flags = project.fc_flags.flags_for_path(&af.path, &project.paths);
    let flags_hash = utils::string_checksum(&flags.join(" "));

    // the modules we depend on that earlier waves emitted; their hashes are
    // recorded so we know next run whether they changed
    let module_deps_hashes: ModuleHashes = af
        .symbol_deps
        .iter()
        .filter(|dep| !af.symbol_defs.contains(*dep))
        .filter_map(|dep| mod_hashes.get(dep).map(|hash| (dep.clone(), *hash)))
        .collect();

    let reasons = recompile_reasons(af, flags_hash, &module_deps_hashes, cache.get(&af.path));
    if reasons.is_empty() {
        debug!("fortran compiler skipping: {}", af.path.display());
    } else {
        debug!("compiling {} ({})", af.path.display(), reasons.join(", "));
        compile_file(project, af, &flags, &output_path)?;
    }

    Ok(CompiledFile {
        input_path: af.path.clone(),
        output_path,
        source_hash: af.file_hash,
        flags_hash,
        module_deps_hashes,
    })
}

fn compile_file(
    project: &Project,
    af: &AnalysedFile,
    flags: &[String],
    output_path: &Path,
) -> Result<()> {
    utils::create_parent_dir_all(output_path)?;

    let tools = &project.tools;
    let mut cmd = tools.fc.command();
    cmd.args(flags);
    cmd.args(&tools.fflags);
    cmd.arg(&tools.module_dir_flag).arg(&project.paths.mods);
    cmd.arg(&af.path);
    cmd.arg("-o").arg(output_path);

    if let Err(err) = utils::run_command(cmd) {
        // the compiler may leave a partial object behind
        let _ = fs::remove_file(output_path);
        return Err(err.for_file(&af.path));
    }
    Ok(())
}
