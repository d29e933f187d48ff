//! Command line tool for batch compiling a directory of shaders to SPIR-V.
//!
//! It takes the path to a directory of shader sources, compiles every recognized source
//! with the external compiler (`glslc` by default) and prints one line per shader, then a
//! summary. Options can also be stored in a `spv-batch.toml` next to the shaders, see
//! [`config::Options`].
//!
//! ## Exit codes
//!
//! * `0`: every shader compiled, or there was nothing to compile.
//! * `1`: some shaders failed, timed out or were skipped (unless `--allow-failures`).
//! * `2`: nothing was compiled because of a fatal error, like a missing compiler.

use std::{path::PathBuf, process::ExitCode};

use spv_batch::batch::{BatchReport, Cancellation};

pub mod config;
mod merge;

use self::config::{Options, CONFIG_FILE_NAME};

/// Exit code when some shaders did not compile.
const EXIT_FAILURES: u8 = 1;

/// Exit code when the batch could not run at all.
pub const EXIT_FATAL: u8 = 2;

/// The struct representing the main CLI.
#[derive(Debug, clap::Parser)]
#[clap(author, version, about)]
#[non_exhaustive]
pub struct Cli {
    /// Directory containing the shader sources. Subdirectories are not searched.
    pub directory: PathBuf,

    /// Config file to read options from.
    /// Defaults to `spv-batch.toml` in the shader directory, if it exists.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Options of the batch, overriding the config file.
    #[clap(flatten)]
    pub options: Options,
}

/// How a completed batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Outcome {
    /// Every shader compiled, or failures are allowed.
    Success,
    /// Some shaders did not compile.
    Failures,
}

impl Outcome {
    /// Classifies a report.
    #[must_use]
    pub fn of(report: &BatchReport, allow_failures: bool) -> Self {
        if report.is_success() || allow_failures {
            Self::Success
        } else {
            Self::Failures
        }
    }

    /// The process exit code for this outcome.
    #[must_use]
    pub fn exit_code(self) -> ExitCode {
        match self {
            Self::Success => ExitCode::SUCCESS,
            Self::Failures => ExitCode::from(EXIT_FAILURES),
        }
    }
}

impl Cli {
    /// The config file to use, if any.
    #[must_use]
    pub fn config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(|| {
            let implicit = self.directory.join(CONFIG_FILE_NAME);
            implicit.is_file().then_some(implicit)
        })
    }

    /// Final options, from the config file overridden by the command line.
    ///
    /// # Errors
    /// If the config file can't be read or parsed.
    pub fn options(&self) -> anyhow::Result<Options> {
        match self.config_path() {
            Some(path) => {
                log::debug!("reading config file '{}'", path.display());
                self.options.with_config_file(&path)
            }
            None => Ok(self.options.clone()),
        }
    }

    /// Runs the batch.
    ///
    /// # Errors
    /// Any error that prevented the batch from running, usually printed to the user.
    pub fn run(&self, cancellation: Cancellation) -> anyhow::Result<Outcome> {
        let options = self.options()?;
        log::debug!("compiling with final merged options: {options:#?}");

        let mut batch = options.batch_compiler(cancellation);
        let report = batch.compile_all(&self.directory)?;
        Ok(Outcome::of(&report, options.allow_failures))
    }
}
