//! Compiling the build tree.
//!
//! C files are mutually independent once preprocessed and compile in a
//! single parallel batch; Fortran files compile in waves so that every
//! module artifact exists before its users are built. Both drivers share
//! the recompile key `(source_hash, flags_hash, module_deps_hashes)`.

use crate::{analysis::AnalysedFile, error::Result, utils};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

pub(crate) mod c;
pub(crate) mod fortran;

/// Module artifact hashes published so far this run, keyed by lowercase
/// module name. Written only between waves, by the engine thread.
pub type ModuleHashes = BTreeMap<String, u32>;

/// The result of compiling (or reusing the object of) one source file,
/// with the hashes captured at compile time that form the next run's
/// recompile key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompiledFile {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub source_hash: u32,
    pub flags_hash: u32,
    pub module_deps_hashes: ModuleHashes,
}

/// Why a file is being recompiled, for logging. An empty set means the
/// previous object can be reused.
pub(crate) fn recompile_reasons(
    af: &AnalysedFile,
    flags_hash: u32,
    module_deps_hashes: &ModuleHashes,
    last_compile: Option<&CompiledFile>,
) -> Vec<&'static str> {
    let mut reasons = Vec::new();
    let Some(last) = last_compile else {
        return vec!["no previous result"];
    };
    if af.file_hash != last.source_hash {
        reasons.push("source changed");
    }
    if flags_hash != last.flags_hash {
        reasons.push("flags changed");
    }
    if *module_deps_hashes != last.module_deps_hashes {
        reasons.push("module dependencies changed");
    }
    reasons
}

/// Hashes the module artifacts the given files emitted, looking up
/// `<mods>/<symbol>.mod` for every symbol they define. Definitions that
/// emit no module artifact (programs, bare subprograms) are skipped.
pub(crate) fn module_artifact_hashes(
    files: &[&AnalysedFile],
    mods_dir: &Path,
) -> Result<ModuleHashes> {
    let mut hashes = ModuleHashes::new();
    for af in files {
        for symbol in &af.symbol_defs {
            let artifact = mods_dir.join(format!("{symbol}.mod"));
            if artifact.exists() {
                hashes.insert(symbol.clone(), utils::file_checksum(&artifact)?);
            }
        }
    }
    Ok(hashes)
}
