//! The build pipeline.
//!
//! Phases run in order with a barrier between each: walk, preprocess,
//! hash, analyse, resolve, compile, link. Within a phase, work fans out
//! over the worker pool; all aggregation and all persistence happens here,
//! on the engine thread. A fatal error aborts at the next barrier after
//! every in-flight worker of the current batch has finished, so reports
//! are complete.

use crate::{
    analysis::{self, Analysis},
    cache::{AnalysisCache, AnalysisWriter, CompileCache},
    compile::{self, CompiledFile},
    error::{split_results, Error, Result},
    link,
    preprocess::Preprocessor,
    resolver::{self, DepGraph, SubTree, SymbolTable},
    sources::{HashedFile, SourceSet},
    utils, LinkTarget, Project,
};
use rayon::prelude::*;
use std::{path::PathBuf, sync::mpsc, time::Instant};

/// Everything a finished build produced, one typed collection per
/// artefact kind.
#[derive(Clone, Debug)]
pub struct BuildOutput {
    pub preprocessed_c: Vec<PathBuf>,
    pub preprocessed_fortran: Vec<PathBuf>,
    /// The full analysed source tree, file deps resolved.
    pub analysed: DepGraph,
    /// The sub-tree the build was extracted from.
    pub build_tree: DepGraph,
    pub compiled_c: Vec<CompiledFile>,
    pub compiled_fortran: Vec<CompiledFile>,
    /// The archive or executable handed back by the link phase.
    pub object_archive: PathBuf,
}

impl BuildOutput {
    /// All object files that went into the archive or executable.
    pub fn objects(&self) -> impl Iterator<Item = &PathBuf> {
        self.compiled_c.iter().chain(self.compiled_fortran.iter()).map(|cf| &cf.output_path)
    }
}

pub(crate) struct Pipeline<'a> {
    project: &'a Project,
    pool: rayon::ThreadPool,
}

impl<'a> Pipeline<'a> {
    pub(crate) fn new(project: &'a Project, pool: rayon::ThreadPool) -> Self {
        Self { project, pool }
    }

    pub(crate) fn run(self) -> Result<BuildOutput> {
        let start = Instant::now();
        let sources = self.walk()?;
        let (preprocessed_c, preprocessed_fortran) = self.preprocess(&sources)?;
        let hashed =
            self.hash(preprocessed_c.iter().chain(preprocessed_fortran.iter()).cloned().collect())?;
        let mut analysed = self.analyse(hashed)?;

        let symbols = SymbolTable::build(analysed.values());
        resolver::resolve_file_deps(&mut analysed, &symbols);
        let build_tree = self.extract(&analysed, &symbols)?;

        let (compiled_c, compiled_fortran) = self.compile(&build_tree)?;
        let object_archive = self.finish(&compiled_c, &compiled_fortran)?;
        info!("build took {:?}", start.elapsed());

        Ok(BuildOutput {
            preprocessed_c,
            preprocessed_fortran,
            analysed,
            build_tree,
            compiled_c,
            compiled_fortran,
            object_archive,
        })
    }

    fn walk(&self) -> Result<SourceSet> {
        let project = self.project;
        let sources = SourceSet::discover(&project.paths.sources, &project.skip_files);
        if sources.is_empty() {
            return Err(Error::msg("no source files found"));
        }
        // fail before any work if a needed tool is absent
        if !sources.fortran_unpreprocessed.is_empty() && project.tools.fpp.is_none() {
            return Err(Error::ToolNotFound(
                "fortran preprocessor (set FPP, or put fpp or cpp on PATH)".to_string(),
            ));
        }
        Ok(sources)
    }

    fn preprocess(&self, sources: &SourceSet) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
        let project = self.project;

        let preprocessed_c = Preprocessor {
            tool: &project.tools.cpp,
            flags: &project.cpp_flags,
            paths: &project.paths,
            reuse_artefacts: project.reuse_artefacts,
            output_extension: "c",
        }
        .run(&self.pool, &sources.c)?;

        // files that are already preprocessed take part as they are
        let mut preprocessed_fortran = sources.fortran_preprocessed.clone();
        if !sources.fortran_unpreprocessed.is_empty() {
            let fpp = project.tools.fpp.as_ref().expect("checked during walk");
            preprocessed_fortran.extend(
                Preprocessor {
                    tool: fpp,
                    flags: &project.fpp_flags,
                    paths: &project.paths,
                    reuse_artefacts: project.reuse_artefacts,
                    output_extension: "f90",
                }
                .run(&self.pool, &sources.fortran_unpreprocessed)?,
            );
        }

        Ok((preprocessed_c, preprocessed_fortran))
    }

    fn hash(&self, files: Vec<PathBuf>) -> Result<Vec<HashedFile>> {
        info!("getting {} file hashes", files.len());
        let results = self.pool.install(|| {
            files
                .par_iter()
                .map(|path| utils::file_checksum(path).map(|hash| HashedFile::new(path.clone(), hash)))
                .collect::<Vec<_>>()
        });
        let (hashed, errors) = split_results(results);
        if !errors.is_empty() {
            return Err(Error::collect(errors));
        }
        Ok(hashed)
    }

    /// Analyses everything the cache cannot vouch for. Results stream back
    /// over a channel and are appended to the analysis table as they
    /// complete, so an interrupted run loses no finished work. Parse
    /// failures are collected and warned, never fatal.
    fn analyse(&self, hashed: Vec<HashedFile>) -> Result<DepGraph> {
        let table = self.project.paths.analysis_table();
        let (unchanged, to_analyse) = AnalysisCache::load(&table)?.partition(hashed);
        let mut writer = AnalysisWriter::create(&table, unchanged.iter())?;

        info!("analysing {} files", to_analyse.len());
        let mut analysed: DepGraph =
            unchanged.into_iter().map(|af| (af.path.clone(), af)).collect();
        let mut parse_failures = Vec::new();
        let mut write_error = None;

        let (tx, rx) = mpsc::channel();
        std::thread::scope(|scope| {
            let pool = &self.pool;
            scope.spawn(move || {
                pool.install(|| {
                    to_analyse.par_iter().for_each_with(tx, |tx, hashed_file| {
                        let _ = tx.send(analysis::analyse_file(hashed_file));
                    });
                });
            });

            for result in rx {
                match result {
                    Ok(Analysis::Analysed(af)) => {
                        if let Err(err) = writer.append(&af) {
                            write_error = Some(err);
                            break;
                        }
                        analysed.insert(af.path.clone(), af);
                    }
                    Ok(Analysis::EmptySource(path)) => {
                        debug!("empty source file {}", path.display());
                    }
                    Err(err) => parse_failures.push(err),
                }
            }
        });

        if let Some(err) = write_error {
            return Err(err);
        }
        if !parse_failures.is_empty() {
            warn!("{} analysis errors", parse_failures.len());
            for err in &parse_failures {
                debug!("{err}");
            }
        }
        Ok(analysed)
    }

    fn extract(&self, graph: &DepGraph, symbols: &SymbolTable) -> Result<DepGraph> {
        let project = self.project;
        info!("source tree size {}", graph.len());

        let mut sub = match &project.root_symbol {
            Some(symbol) => {
                let root = symbols
                    .resolve(symbol)
                    .ok_or_else(|| Error::RootSymbolNotFound(symbol.clone()))?;
                let sub = resolver::extract_sub_tree(graph, root);
                info!("build tree size {} (root '{}')", sub.tree.len(), root.display());
                sub
            }
            None => {
                info!("no root symbol specified, building everything");
                SubTree { tree: graph.clone(), missing: Default::default() }
            }
        };

        resolver::add_unreferenced_deps(&project.unreferenced_deps, symbols, graph, &mut sub);
        resolver::validate_build_tree(&sub.tree);
        Ok(sub.tree)
    }

    fn compile(&self, tree: &DepGraph) -> Result<(Vec<CompiledFile>, Vec<CompiledFile>)> {
        let start = Instant::now();
        let table = self.project.paths.compilation_table();
        let cache = CompileCache::load(&table)?;

        let compiled_c = compile::c::compile(self.project, &self.pool, tree, &cache)?;
        let compiled_fortran = compile::fortran::compile(self.project, &self.pool, tree, &cache)?;
        debug!("compilation took {:?}", start.elapsed());

        // written once, in full, at the end of the phase
        CompileCache::write(&table, compiled_c.iter().chain(compiled_fortran.iter()))?;
        Ok((compiled_c, compiled_fortran))
    }

    fn finish(
        &self,
        compiled_c: &[CompiledFile],
        compiled_fortran: &[CompiledFile],
    ) -> Result<PathBuf> {
        let project = self.project;
        let objects: Vec<PathBuf> = compiled_c
            .iter()
            .chain(compiled_fortran.iter())
            .map(|cf| cf.output_path.clone())
            .collect();

        match &project.link {
            LinkTarget::Archive { output } => {
                link::archive_objects(&project.tools.ar, &objects, output)
            }
            LinkTarget::Executable { output, flags } => {
                link::link_exe(&project.tools.ld, &objects, output, flags)
            }
        }
    }
}
