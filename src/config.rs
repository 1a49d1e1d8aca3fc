//! Project layout, per-path flag configuration and external tool selection.

use crate::{
    error::{Error, Result},
    utils,
};
#[cfg(test)]
use std::collections::HashMap;
use std::{
    path::{Path, PathBuf},
    process::Command,
};

/// File name of the persisted analysis table, under the project root.
pub const ANALYSIS_TABLE_FILE: &str = "__analysis.csv";

/// File name of the persisted compilation table, under the project root.
pub const COMPILATION_TABLE_FILE: &str = "__compilation.csv";

/// Where the files of a project live.
///
/// The `root` is the working directory of a build: the persisted tables go
/// directly in it, preprocessed sources, objects and module artifacts go
/// under `output`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProjectPathsConfig {
    /// Project working directory.
    pub root: PathBuf,
    /// The source trees to walk.
    pub sources: Vec<PathBuf>,
    /// Where preprocessed files and objects are written.
    pub output: PathBuf,
    /// Where the Fortran compiler is told to put module artifacts.
    pub mods: PathBuf,
}

impl ProjectPathsConfig {
    /// Creates the conventional layout for a working directory: output under
    /// `<root>/build_output`, module artifacts under the output root.
    pub fn new(root: impl Into<PathBuf>, sources: Vec<PathBuf>) -> Self {
        let root = root.into();
        let output = root.join("build_output");
        let mods = output.clone();
        Self { root, sources, output, mods }
    }

    pub fn analysis_table(&self) -> PathBuf {
        self.root.join(ANALYSIS_TABLE_FILE)
    }

    pub fn compilation_table(&self) -> PathBuf {
        self.root.join(COMPILATION_TABLE_FILE)
    }

    /// Maps an input file to its output location, see
    /// [`utils::input_to_output_fpath`].
    pub fn output_fpath(&self, input: &Path) -> PathBuf {
        utils::input_to_output_fpath(&self.sources, &self.output, input)
    }

    /// The configured root the path lives under, with the path's relative
    /// form, if any.
    fn relative_to_root<'a>(&self, path: &'a Path) -> Option<(&Path, &'a Path)> {
        self.sources
            .iter()
            .map(PathBuf::as_path)
            .chain(std::iter::once(self.output.as_path()))
            .find_map(|root| path.strip_prefix(root).ok().map(|rel| (root, rel)))
    }
}

/// A flag set applied to paths matching a glob.
///
/// The glob is matched against the file's path relative to a configured
/// root (each source root and the output root are tried in turn).
#[derive(Clone, Debug)]
pub struct AddFlags {
    filter: glob::Pattern,
    flags: Vec<String>,
}

impl AddFlags {
    pub fn new(filter: &str, flags: impl IntoIterator<Item = impl Into<String>>) -> Result<Self> {
        let filter = glob::Pattern::new(filter)
            .map_err(|err| Error::msg(format!("invalid path filter '{filter}': {err}")))?;
        Ok(Self { filter, flags: flags.into_iter().map(Into::into).collect() })
    }

    fn matches(&self, relative: &Path) -> bool {
        self.filter.matches_path(relative)
    }
}

/// Common and per-path flags for one tool.
#[derive(Clone, Debug, Default)]
pub struct Flags {
    common: Vec<String>,
    path_flags: Vec<AddFlags>,
}

impl Flags {
    pub fn new(
        common: impl IntoIterator<Item = impl Into<String>>,
        path_flags: Vec<AddFlags>,
    ) -> Self {
        Self { common: common.into_iter().map(Into::into).collect(), path_flags }
    }

    /// Resolves the flags for one file: the common flags, then the flags of
    /// every matching rule in declaration order, with `$source`, `$output`
    /// and `$relative` expanded.
    pub fn flags_for_path(&self, path: &Path, paths: &ProjectPathsConfig) -> Vec<String> {
        let mut flags = self.common.clone();
        if let Some((_, relative)) = paths.relative_to_root(path) {
            for rule in &self.path_flags {
                if rule.matches(relative) {
                    flags.extend(rule.flags.iter().cloned());
                }
            }
        }

        let source_root = match paths.relative_to_root(path) {
            Some((root, _)) if root != paths.output => root.to_path_buf(),
            _ => paths.sources.first().cloned().unwrap_or_else(|| paths.root.clone()),
        };
        let relative_dir = path.parent().unwrap_or_else(|| Path::new(""));
        for flag in &mut flags {
            if flag.contains('$') {
                *flag = flag
                    .replace("$source", &source_root.to_string_lossy())
                    .replace("$output", &paths.output.to_string_lossy())
                    .replace("$relative", &relative_dir.to_string_lossy());
            }
        }
        flags
    }
}

/// An external program plus the arguments it is always invoked with.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Tool {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Tool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into(), args: Vec::new() }
    }

    /// Parses a whitespace-separated tool specification such as
    /// `"gfortran -c"`, as accepted in the `FC`/`CC`/`CPP`/`FPP`
    /// environment variables.
    pub fn parse(spec: &str) -> Option<Self> {
        let mut parts = spec.split_whitespace();
        let program = PathBuf::from(parts.next()?);
        Some(Self { program, args: parts.map(String::from).collect() })
    }

    /// Appends the flag unless it is already present.
    pub fn ensure_flag(&mut self, flag: &str) {
        if !self.args.iter().any(|a| a == flag) {
            self.args.push(flag.to_string());
        }
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    pub fn name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Checks the program can be found at all, so a missing binary fails
    /// the phase before any work is dispatched.
    pub(crate) fn ensure_available(&self) -> Result<()> {
        let found = if self.program.components().count() > 1 {
            self.program.exists()
        } else {
            utils::find_program(&self.program.to_string_lossy()).is_some()
        };
        if found {
            Ok(())
        } else {
            Err(Error::ToolNotFound(self.name()))
        }
    }
}

/// The external tool set of a build.
///
/// Resolved once per run from the environment (`FC`, `CC`, `CPP`, `FPP`,
/// `FFLAGS`), with builder overrides taking precedence.
#[derive(Clone, Debug)]
pub struct Tools {
    /// Fortran compiler, `FC`.
    pub fc: Tool,
    /// C compiler, `CC`.
    pub cc: Tool,
    /// C preprocessor, `CPP`.
    pub cpp: Tool,
    /// Fortran preprocessor, `FPP`. `None` when neither `fpp` nor `cpp`
    /// could be found; an error is raised if preprocessing is then needed.
    pub fpp: Option<Tool>,
    /// Linker for executable output.
    pub ld: Tool,
    /// Archiver for object-archive output.
    pub ar: Tool,
    /// Extra Fortran compile flags from `FFLAGS`, appended after the
    /// configured flags. Not part of the recompile key.
    pub fflags: Vec<String>,
    /// Flag introducing the module output directory on the Fortran compile
    /// line, e.g. `-J` for gfortran.
    pub module_dir_flag: String,
}

impl Tools {
    /// Resolves the tool set from the process environment.
    pub fn from_env() -> Self {
        Self::resolve(
            |var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()),
            |name| utils::find_program(name).is_some(),
        )
    }

    fn resolve(get: impl Fn(&str) -> Option<String>, on_path: impl Fn(&str) -> bool) -> Self {
        let parse_or = |var: &str, default: &str| {
            get(var).as_deref().and_then(Tool::parse).unwrap_or_else(|| Tool::parse(default).unwrap())
        };

        let fc = parse_or("FC", "gfortran -c");
        let cc = parse_or("CC", "gcc -c");
        let mut cpp = parse_or("CPP", "cpp");
        cpp.ensure_flag("-P");

        let fpp = match get("FPP").as_deref().and_then(Tool::parse) {
            Some(mut tool) => {
                tool.ensure_flag("-P");
                Some(tool)
            }
            None if on_path("fpp") => {
                let mut tool = Tool::new("fpp");
                tool.ensure_flag("-P");
                Some(tool)
            }
            None if on_path("cpp") => {
                let mut tool = Tool::new("cpp");
                tool.args.push("-traditional-cpp".to_string());
                tool.ensure_flag("-P");
                Some(tool)
            }
            None => None,
        };

        let fflags =
            get("FFLAGS").map(|v| v.split_whitespace().map(String::from).collect()).unwrap_or_default();

        Self {
            fc,
            cc,
            cpp,
            fpp,
            ld: Tool::new("gcc"),
            ar: Tool::new("ar"),
            fflags,
            module_dir_flag: "-J".to_string(),
        }
    }

    #[cfg(test)]
    fn from_map(vars: HashMap<&str, &str>, path_programs: &[&str]) -> Self {
        Self::resolve(
            |var| vars.get(var).map(|v| v.to_string()),
            |name| path_programs.contains(&name),
        )
    }
}

/// Default worker count: all cores but one, at least one.
pub fn default_jobs() -> usize {
    std::cmp::max(1, num_cpus::get() - 1)
}
