//! Source discovery and classification.

use crate::utils;
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

/// What the walker decided a file is, from its suffix.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SourceKind {
    /// `.c` — C source, preprocessed before analysis.
    C,
    /// `.f90` — Fortran that is already preprocessed.
    FortranPreprocessed,
    /// `.F90` — Fortran that must go through the preprocessor first.
    FortranNeedsPreprocessing,
    /// `.h` / `.inc` — inlined by preprocessing, never compiled directly.
    HeaderInclude,
    Other,
}

impl SourceKind {
    pub fn of(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("c") => Self::C,
            Some("f90") => Self::FortranPreprocessed,
            Some("F90") => Self::FortranNeedsPreprocessing,
            Some("h") | Some("inc") => Self::HeaderInclude,
            _ => Self::Other,
        }
    }
}

/// All files found by the walker, grouped by classification.
#[derive(Clone, Debug, Default)]
pub struct SourceSet {
    pub c: Vec<PathBuf>,
    pub fortran_preprocessed: Vec<PathBuf>,
    pub fortran_unpreprocessed: Vec<PathBuf>,
    pub headers: Vec<PathBuf>,
    pub other: Vec<PathBuf>,
}

impl SourceSet {
    /// Walks the given roots, skipping basenames in the skip set.
    pub fn discover(roots: &[PathBuf], skip_files: &HashSet<String>) -> Self {
        let mut set = Self::default();
        for root in roots {
            for path in utils::source_files_iter(root, skip_files) {
                set.push(path);
            }
        }
        set
    }

    fn push(&mut self, path: PathBuf) {
        match SourceKind::of(&path) {
            SourceKind::C => self.c.push(path),
            SourceKind::FortranPreprocessed => self.fortran_preprocessed.push(path),
            SourceKind::FortranNeedsPreprocessing => self.fortran_unpreprocessed.push(path),
            SourceKind::HeaderInclude => self.headers.push(path),
            SourceKind::Other => self.other.push(path),
        }
    }

    /// Number of compilable sources found.
    pub fn len(&self) -> usize {
        self.c.len() + self.fortran_preprocessed.len() + self.fortran_unpreprocessed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A file and the checksum of its content, taken after preprocessing.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct HashedFile {
    pub path: PathBuf,
    pub hash: u32,
}

impl HashedFile {
    pub fn new(path: PathBuf, hash: u32) -> Self {
        Self { path, hash }
    }
}

/// `true` for files that take part in Fortran compile ordering.
pub(crate) fn is_fortran(path: &Path) -> bool {
    SourceKind::of(path) == SourceKind::FortranPreprocessed
}
