#![doc = include_str!("../README.md")]
#![warn(rustdoc::all)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

pub mod analysis;
pub use analysis::{AnalysedFile, Analysis};

pub mod cache;

mod compile;
pub use compile::{CompiledFile, ModuleHashes};

mod config;
pub use config::{
    default_jobs, AddFlags, Flags, ProjectPathsConfig, Tool, Tools, ANALYSIS_TABLE_FILE,
    COMPILATION_TABLE_FILE,
};

mod driver;
pub use driver::BuildOutput;

pub mod error;
pub use error::{Error, Result};

mod link;
mod preprocess;

pub mod resolver;
pub use resolver::{DepGraph, SubTree, SymbolTable};

pub mod sources;
pub use sources::{HashedFile, SourceKind, SourceSet};

pub mod utils;

use std::{collections::HashSet, path::PathBuf};

/// What the link phase produces from the compiled objects.
#[derive(Clone, Debug)]
pub enum LinkTarget {
    /// `ar cr <output> <objects...>`
    Archive { output: PathBuf },
    /// `<ld> -o <output> <objects...> <flags...>`
    Executable { output: PathBuf, flags: Vec<String> },
}

/// A build workspace: where the sources are, what to build from them, and
/// how. This is the engine context every phase reads; nothing in the crate
/// keeps process-wide state.
#[derive(Clone, Debug)]
pub struct Project {
    /// The layout of the project.
    pub paths: ProjectPathsConfig,
    /// Symbol the build is rooted at. Everything is built when unset.
    pub root_symbol: Option<String>,
    /// Symbols reached only through constructs the analyser cannot see
    /// (e.g. single-line conditional calls); their sub-trees are forced
    /// into the build.
    pub unreferenced_deps: Vec<String>,
    /// Basenames the walker skips.
    pub skip_files: HashSet<String>,
    /// The external tool set, resolved from the environment unless
    /// overridden.
    pub tools: Tools,
    /// Flags for the Fortran preprocessor.
    pub fpp_flags: Flags,
    /// Flags for the C preprocessor.
    pub cpp_flags: Flags,
    /// Flags for the Fortran compiler.
    pub fc_flags: Flags,
    /// Flags for the C compiler.
    pub cc_flags: Flags,
    /// What to produce from the compiled objects.
    pub link: LinkTarget,
    /// Worker pool size.
    pub jobs: usize,
    /// Skip preprocessor invocations whose output file already exists.
    pub reuse_artefacts: bool,
}

impl Project {
    /// Convenience function to start a [`ProjectBuilder`] for the given
    /// working directory.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use sci_build::Project;
    ///
    /// let project = Project::builder("workspace").root_symbol("um_main").build()?;
    /// # Ok::<(), sci_build::Error>(())
    /// ```
    pub fn builder(root: impl Into<PathBuf>) -> ProjectBuilder {
        ProjectBuilder::new(root)
    }

    /// Runs the full pipeline: walk, preprocess, hash, analyse, resolve,
    /// compile, link.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use sci_build::Project;
    ///
    /// let output = Project::builder("workspace").build()?.build()?;
    /// # Ok::<(), sci_build::Error>(())
    /// ```
    pub fn build(&self) -> Result<BuildOutput> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()
            .map_err(Error::msg)?;
        driver::Pipeline::new(self, pool).run()
    }
}

/// Builder for [`Project`].
#[derive(Debug)]
pub struct ProjectBuilder {
    root: PathBuf,
    sources: Vec<PathBuf>,
    root_symbol: Option<String>,
    unreferenced_deps: Vec<String>,
    skip_files: HashSet<String>,
    tools: Option<Tools>,
    fpp_flags: Flags,
    cpp_flags: Flags,
    fc_flags: Flags,
    cc_flags: Flags,
    link: Option<LinkTarget>,
    jobs: usize,
    reuse_artefacts: bool,
}

impl ProjectBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sources: Vec::new(),
            root_symbol: None,
            unreferenced_deps: Vec::new(),
            skip_files: HashSet::new(),
            tools: None,
            fpp_flags: Flags::default(),
            cpp_flags: Flags::default(),
            fc_flags: Flags::default(),
            cc_flags: Flags::default(),
            link: None,
            jobs: default_jobs(),
            reuse_artefacts: false,
        }
    }

    /// Adds a source tree to walk. Defaults to `<root>/source`.
    pub fn source(mut self, path: impl Into<PathBuf>) -> Self {
        self.sources.push(path.into());
        self
    }

    /// Sets the symbol to root the build at.
    pub fn root_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.root_symbol = Some(symbol.into());
        self
    }

    /// Forces a symbol's sub-tree into the build even though nothing
    /// analysable references it.
    pub fn unreferenced_dependency(mut self, symbol: impl Into<String>) -> Self {
        self.unreferenced_deps.push(symbol.into());
        self
    }

    /// Adds a basename the walker must skip.
    pub fn skip_file(mut self, basename: impl Into<String>) -> Self {
        self.skip_files.insert(basename.into());
        self
    }

    /// Overrides the environment-resolved tool set.
    pub fn tools(mut self, tools: Tools) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn fpp_flags(mut self, flags: Flags) -> Self {
        self.fpp_flags = flags;
        self
    }

    pub fn cpp_flags(mut self, flags: Flags) -> Self {
        self.cpp_flags = flags;
        self
    }

    pub fn fc_flags(mut self, flags: Flags) -> Self {
        self.fc_flags = flags;
        self
    }

    pub fn cc_flags(mut self, flags: Flags) -> Self {
        self.cc_flags = flags;
        self
    }

    /// Produce an object archive at the given path. This is the default,
    /// at `<output>/objects.a`.
    pub fn archive(mut self, output: impl Into<PathBuf>) -> Self {
        self.link = Some(LinkTarget::Archive { output: output.into() });
        self
    }

    /// Link an executable at the given path with the given extra flags.
    pub fn executable(
        mut self,
        output: impl Into<PathBuf>,
        flags: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.link = Some(LinkTarget::Executable {
            output: output.into(),
            flags: flags.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Sets the worker pool size. Defaults to all cores but one.
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Reuse preprocessor outputs that already exist on disk.
    pub fn reuse_artefacts(mut self, reuse: bool) -> Self {
        self.reuse_artefacts = reuse;
        self
    }

    pub fn build(self) -> Result<Project> {
        let Self {
            root,
            mut sources,
            root_symbol,
            unreferenced_deps,
            skip_files,
            tools,
            fpp_flags,
            cpp_flags,
            fc_flags,
            cc_flags,
            link,
            jobs,
            reuse_artefacts,
        } = self;

        if sources.is_empty() {
            sources.push(root.join("source"));
        }
        let paths = ProjectPathsConfig::new(root, sources);
        let link =
            link.unwrap_or_else(|| LinkTarget::Archive { output: paths.output.join("objects.a") });

        Ok(Project {
            paths,
            root_symbol,
            unreferenced_deps,
            skip_files,
            tools: tools.unwrap_or_else(Tools::from_env),
            fpp_flags,
            cpp_flags,
            fc_flags,
            cc_flags,
            link,
            jobs,
            reuse_artefacts,
        })
    }
}
