//! External preprocessor driver.
//!
//! One invocation per file: `<preproc> <flags...> <input> <output>`. Errors
//! are captured per file and surfaced together at the end of the phase.

use crate::{
    config::{Flags, ProjectPathsConfig, Tool},
    error::{split_results, Error, Result},
    utils,
};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

pub(crate) struct Preprocessor<'a> {
    pub tool: &'a Tool,
    pub flags: &'a Flags,
    pub paths: &'a ProjectPathsConfig,
    /// Output files that already exist are not regenerated.
    pub reuse_artefacts: bool,
    /// Extension of the output files, e.g. `f90` for preprocessed Fortran.
    pub output_extension: &'a str,
}

impl Preprocessor<'_> {
    /// Preprocesses all files on the worker pool, returning every output
    /// path or the collected failures.
    pub fn run(&self, pool: &rayon::ThreadPool, inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        self.tool.ensure_available()?;
        info!("preprocessing {} files with {}", inputs.len(), self.tool.name());
        let results = pool
            .install(|| inputs.par_iter().map(|input| self.process_file(input)).collect::<Vec<_>>());
        let (outputs, errors) = split_results(results);
        if !errors.is_empty() {
            error!("{} error(s) found during preprocessing", errors.len());
            return Err(Error::collect(errors));
        }
        Ok(outputs)
    }

    fn process_file(&self, input: &Path) -> Result<PathBuf> {
        let output = self.paths.output_fpath(input).with_extension(self.output_extension);

        if self.reuse_artefacts && output.exists() {
            debug!("preprocessor skipping: {}", input.display());
            return Ok(output);
        }

        utils::create_parent_dir_all(&output)?;
        let mut cmd = self.tool.command();
        cmd.args(self.flags.flags_for_path(input, self.paths));
        cmd.arg(input);
        cmd.arg(&output);
        utils::run_command(cmd).map_err(|err| err.for_file(input))?;
        Ok(output)
    }
}
