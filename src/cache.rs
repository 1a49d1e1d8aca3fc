//! Persistence of analysis and compilation results between runs.
//!
//! Two tables survive a run. The analysis table is opened before analysis
//! begins and rows are appended (and flushed) as workers complete, so a
//! crash mid-run loses no finished work; at the start of the next run it is
//! rewritten from the unchanged carry-over. The compilation table is small
//! and is written once, in full, at the end of the compile phase.

use crate::{
    analysis::AnalysedFile,
    compile::CompiledFile,
    error::{Error, Result},
    sources::HashedFile,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
};

const LIST_SEPARATOR: char = ';';

/// One row of the analysis table. List columns are semicolon-joined,
/// written sorted and deduplicated; an empty list is the empty string.
#[derive(Debug, Serialize, Deserialize)]
struct AnalysisRow {
    path: String,
    file_hash: u32,
    symbol_defs: String,
    symbol_deps: String,
    file_deps: String,
    commented_file_deps: String,
}

impl From<&AnalysedFile> for AnalysisRow {
    fn from(af: &AnalysedFile) -> Self {
        Self {
            path: af.path.to_string_lossy().into_owned(),
            file_hash: af.file_hash,
            symbol_defs: join(af.symbol_defs.iter()),
            symbol_deps: join(af.symbol_deps.iter()),
            file_deps: join(af.file_deps.iter().map(|p| p.to_string_lossy())),
            commented_file_deps: join(af.commented_file_deps.iter()),
        }
    }
}

impl AnalysisRow {
    fn into_analysed(self) -> AnalysedFile {
        let mut af = AnalysedFile::new(PathBuf::from(self.path), self.file_hash);
        af.symbol_defs = split(&self.symbol_defs).map(str::to_string).collect();
        af.symbol_deps = split(&self.symbol_deps).map(str::to_string).collect();
        af.file_deps = split(&self.file_deps).map(PathBuf::from).collect();
        af.commented_file_deps = split(&self.commented_file_deps).map(str::to_string).collect();
        af
    }
}

fn join<I, T>(values: I) -> String
where
    I: Iterator<Item = T>,
    T: std::fmt::Display,
{
    values.map(|v| v.to_string()).collect::<Vec<_>>().join(&LIST_SEPARATOR.to_string())
}

fn split(value: &str) -> impl Iterator<Item = &str> {
    value.split(LIST_SEPARATOR).filter(|part| !part.is_empty())
}

/// The previous run's analysis results.
#[derive(Debug, Default)]
pub struct AnalysisCache {
    previous: HashMap<PathBuf, AnalysedFile>,
}

impl AnalysisCache {
    /// Reads the analysis table. A missing table is an empty cache, not an
    /// error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("no previous analysis results at {}", path.display());
            return Ok(Self::default());
        }
        let mut reader = csv::Reader::from_path(path)?;
        let mut previous = HashMap::new();
        for row in reader.deserialize::<AnalysisRow>() {
            let af = row?.into_analysed();
            previous.insert(af.path.clone(), af);
        }
        debug!("loaded {} previous analysis results", previous.len());
        Ok(Self { previous })
    }

    /// Splits the current hashed file set into results that can be reused
    /// and files that must be (re-)analysed. Rows for files no longer in
    /// the set are dropped.
    pub fn partition(mut self, hashed: Vec<HashedFile>) -> (Vec<AnalysedFile>, Vec<HashedFile>) {
        let mut unchanged = Vec::new();
        let mut to_analyse = Vec::new();
        for file in hashed {
            match self.previous.remove(&file.path) {
                Some(prev) if prev.file_hash == file.hash => unchanged.push(prev),
                _ => to_analyse.push(file),
            }
        }
        for gone in self.previous.keys() {
            trace!("a file has gone: {}", gone.display());
        }
        info!("{} already analysed, {} to analyse", unchanged.len(), to_analyse.len());
        (unchanged, to_analyse)
    }
}

/// Incremental writer for the analysis table.
///
/// Owned by the engine thread; worker results arrive over a channel and are
/// appended serially, in completion order.
#[derive(Debug)]
pub struct AnalysisWriter {
    writer: csv::Writer<fs::File>,
    path: PathBuf,
}

impl AnalysisWriter {
    /// Starts a fresh table containing the carry-over from previous runs,
    /// flushed immediately.
    pub fn create<'a>(
        path: &Path,
        carry_over: impl Iterator<Item = &'a AnalysedFile>,
    ) -> Result<Self> {
        crate::utils::create_parent_dir_all(path)?;
        let file = fs::File::create(path).map_err(|err| Error::io(err, path))?;
        let mut writer = Self { writer: csv::Writer::from_writer(file), path: path.to_path_buf() };
        for af in carry_over {
            writer.append(af)?;
        }
        writer.flush()?;
        Ok(writer)
    }

    /// Appends one result and flushes, so partial progress survives a
    /// crash.
    pub fn append(&mut self, af: &AnalysedFile) -> Result<()> {
        self.writer.serialize(AnalysisRow::from(af))?;
        self.flush()
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|err| Error::io(err, &self.path))
    }
}

/// One row of the compilation table. `module_deps_hashes` holds
/// `name=hash` pairs, semicolon-separated.
#[derive(Debug, Serialize, Deserialize)]
struct CompilationRow {
    input_path: String,
    output_path: String,
    source_hash: u32,
    flags_hash: u32,
    module_deps_hashes: String,
}

impl From<&CompiledFile> for CompilationRow {
    fn from(cf: &CompiledFile) -> Self {
        Self {
            input_path: cf.input_path.to_string_lossy().into_owned(),
            output_path: cf.output_path.to_string_lossy().into_owned(),
            source_hash: cf.source_hash,
            flags_hash: cf.flags_hash,
            module_deps_hashes: join(
                cf.module_deps_hashes.iter().map(|(name, hash)| format!("{name}={hash}")),
            ),
        }
    }
}

impl CompilationRow {
    fn into_compiled(self) -> Result<CompiledFile> {
        let mut module_deps_hashes = BTreeMap::new();
        for pair in split(&self.module_deps_hashes) {
            let (name, hash) = pair
                .split_once('=')
                .ok_or_else(|| Error::msg(format!("malformed module hash entry '{pair}'")))?;
            let hash = hash
                .parse::<u32>()
                .map_err(|err| Error::msg(format!("malformed module hash '{pair}': {err}")))?;
            module_deps_hashes.insert(name.to_string(), hash);
        }
        Ok(CompiledFile {
            input_path: PathBuf::from(self.input_path),
            output_path: PathBuf::from(self.output_path),
            source_hash: self.source_hash,
            flags_hash: self.flags_hash,
            module_deps_hashes,
        })
    }
}

/// The previous run's compile records, keyed by input path.
#[derive(Debug, Default)]
pub struct CompileCache {
    previous: HashMap<PathBuf, CompiledFile>,
}

impl CompileCache {
    /// Reads the compilation table. A missing table is an empty cache.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("no previous compile results at {}", path.display());
            return Ok(Self::default());
        }
        let mut reader = csv::Reader::from_path(path)?;
        let mut previous = HashMap::new();
        for row in reader.deserialize::<CompilationRow>() {
            let cf = row?.into_compiled()?;
            previous.insert(cf.input_path.clone(), cf);
        }
        debug!("loaded {} previous compile results", previous.len());
        Ok(Self { previous })
    }

    pub fn get(&self, input: &Path) -> Option<&CompiledFile> {
        self.previous.get(input)
    }

    pub fn len(&self) -> usize {
        self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }

    /// Writes the table in full, replacing the previous run's file.
    pub fn write<'a>(path: &Path, records: impl Iterator<Item = &'a CompiledFile>) -> Result<()> {
        crate::utils::create_parent_dir_all(path)?;
        let file = fs::File::create(path).map_err(|err| Error::io(err, path))?;
        let mut writer = csv::Writer::from_writer(file);
        for cf in records {
            writer.serialize(CompilationRow::from(cf))?;
        }
        writer.flush().map_err(|err| Error::io(err, path))?;
        Ok(())
    }
}
