//! Per-file source analysis: which symbols a file defines, which symbols it
//! references, and any out-of-band dependencies declared in comments.

use crate::{
    error::{Error, Result},
    sources::{HashedFile, SourceKind},
};
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

pub mod c;
pub mod fortran;

/// The analysis record of one preprocessed source file.
///
/// `file_deps` starts empty; the resolver fills it in once the symbol table
/// is complete and does not mutate it afterwards.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AnalysedFile {
    pub path: PathBuf,
    pub file_hash: u32,
    /// Top-level named entities this file defines, lowercased.
    pub symbol_defs: BTreeSet<String>,
    /// Externally-referenced symbols, lowercased.
    pub symbol_deps: BTreeSet<String>,
    /// File-level dependencies, derived from `symbol_deps` by the resolver.
    pub file_deps: BTreeSet<PathBuf>,
    /// Basenames of C files referenced by `DEPENDS ON:` comments.
    pub commented_file_deps: BTreeSet<String>,
}

impl AnalysedFile {
    pub fn new(path: impl Into<PathBuf>, file_hash: u32) -> Self {
        Self {
            path: path.into(),
            file_hash,
            symbol_defs: BTreeSet::new(),
            symbol_deps: BTreeSet::new(),
            file_deps: BTreeSet::new(),
            commented_file_deps: BTreeSet::new(),
        }
    }

    /// Records a defined symbol. Names are lowercased; empty names are
    /// dropped.
    pub fn add_symbol_def(&mut self, name: &str) {
        let name = name.trim();
        if !name.is_empty() {
            self.symbol_defs.insert(name.to_lowercase());
        }
    }

    /// Records a referenced symbol. Names are lowercased; empty names are
    /// dropped.
    pub fn add_symbol_dep(&mut self, name: &str) {
        let name = name.trim();
        if !name.is_empty() {
            self.symbol_deps.insert(name.to_lowercase());
        }
    }

    /// Records a file dependency. Self-dependencies are silently dropped.
    pub fn add_file_dep(&mut self, path: PathBuf) {
        if path != self.path {
            self.file_deps.insert(path);
        }
    }

    pub fn add_commented_file_dep(&mut self, basename: &str) {
        let basename = basename.trim();
        if !basename.is_empty() {
            self.commented_file_deps.insert(basename.to_lowercase());
        }
    }

    /// Whether this file takes part in Fortran compile ordering.
    pub fn is_fortran(&self) -> bool {
        crate::sources::is_fortran(&self.path)
    }
}

/// Outcome of analysing one file. Parse failures are returned as errors by
/// [`analyse_file`] and collected, never raised mid-phase.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Analysis {
    Analysed(AnalysedFile),
    /// The file contains nothing to compile, e.g. it held only preprocessor
    /// directives. It is dropped from the pipeline without error.
    EmptySource(PathBuf),
}

/// Analyses one hashed, preprocessed file.
pub fn analyse_file(hashed: &HashedFile) -> Result<Analysis> {
    let content = read_source(&hashed.path)?;
    match SourceKind::of(&hashed.path) {
        SourceKind::FortranPreprocessed => fortran::analyse(hashed, &content),
        SourceKind::C => c::analyse(hashed, &content),
        _ => Err(Error::Parse {
            path: hashed.path.clone(),
            message: "not an analysable source kind".to_string(),
        }),
    }
}

/// Reads a source file, tolerating non-UTF-8 bytes (old scientific sources
/// occasionally carry latin-1 in comments).
fn read_source(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|err| Error::io(err, path))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
