use std::{io, path::PathBuf, process::Output};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Various errors raised while orchestrating a build.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An external tool could not be located, neither via its environment
    /// variable nor on `PATH`.
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    /// An external tool ran but exited non-zero.
    #[error("{0} exited with {1}\n{2}")]
    ToolFailure(String, std::process::ExitStatus, String),
    /// A source file could not be parsed during analysis.
    #[error("parse failure in \"{}\": {message}", .path.display())]
    Parse { path: PathBuf, message: String },
    /// The symbol the build is rooted at has no definer.
    #[error("root symbol '{0}' is not defined by any analysed file")]
    RootSymbolNotFound(String),
    /// No file in the remaining set has all its dependencies compiled.
    #[error("nothing more can be compiled due to unfulfilled dependencies:\n{0}")]
    UnfulfilledDependencies(String),
    /// A compile wave finished without producing anything.
    #[error("nothing compiled this pass")]
    NoProgress,
    /// An error carrying the file it occurred on.
    #[error("error processing \"{}\": {source}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },
    /// Errors collected from a phase's workers, reported together at the
    /// phase barrier.
    #[error("{} error(s):\n{}", .0.len(), fmt_collected(.0))]
    Collected(Vec<Error>),
    #[error("\"{}\": {}", .0.display(), .1)]
    Io(PathBuf, #[source] io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("{0}")]
    Message(String),
}

impl Error {
    /// Wrap an IO error with the path that caused it.
    pub fn io(err: io::Error, path: impl Into<PathBuf>) -> Self {
        Error::Io(path.into(), err)
    }

    /// Attach the file an error occurred on.
    pub fn for_file(self, path: impl Into<PathBuf>) -> Self {
        Error::File { path: path.into(), source: Box::new(self) }
    }

    pub fn msg(msg: impl std::fmt::Display) -> Self {
        Error::Message(msg.to_string())
    }

    /// Create an error from an external tool's output, preferring stderr
    /// and falling back to stdout.
    pub(crate) fn tool_output(tool: impl Into<String>, output: &Output) -> Self {
        let mut msg = String::from_utf8_lossy(&output.stderr);
        let mut trimmed = msg.trim();
        if trimmed.is_empty() {
            msg = String::from_utf8_lossy(&output.stdout);
            trimmed = msg.trim();
            if trimmed.is_empty() {
                trimmed = "<empty output>";
            }
        }
        Error::ToolFailure(tool.into(), output.status, trimmed.into())
    }

    /// Collapse a batch of worker errors into a single error, unwrapping
    /// the common single-error case.
    pub(crate) fn collect(mut errors: Vec<Error>) -> Self {
        if errors.len() == 1 {
            errors.remove(0)
        } else {
            Error::Collected(errors)
        }
    }
}

fn fmt_collected(errors: &[Error]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n\n")
}

/// Splits a batch of per-item results into successes and failures so the
/// engine can report every failure of a phase, not just the first.
pub(crate) fn split_results<T>(results: Vec<Result<T>>) -> (Vec<T>, Vec<Error>) {
    let mut ok = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(value) => ok.push(value),
            Err(err) => errors.push(err),
        }
    }
    (ok, errors)
}
