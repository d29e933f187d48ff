//! This module provides the batch compiler: discover every shader of a directory,
//! compile them on a pool of workers and report each outcome as it arrives.

use std::{
    fs, io,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use crossbeam_channel::SendError;

use crate::{
    command::{ProcessRunner, SystemRunner},
    compile::{compile_one, CompileResult, CompileStatus, Compiler, CompilerNotFound},
    job::{discover, output_collisions, DiscoverError, ExtensionSet, OutputNaming, ShaderJob},
    user_output,
};

/// Shared flag to stop a running batch.
///
/// Once cancelled, no further job is started; jobs already running are awaited.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    /// Creates a token that is not cancelled.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Safe to call from a signal handler thread.
    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// All results of one batch, in completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct BatchReport {
    /// One result per discovered shader.
    pub results: Vec<CompileResult>,
}

impl BatchReport {
    /// Number of shaders compiled successfully.
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.count(|status| status == CompileStatus::Succeeded)
    }

    /// Number of shaders that failed, timed out or could not be started.
    #[inline]
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|status| {
            matches!(
                status,
                CompileStatus::Failed | CompileStatus::TimedOut | CompileStatus::SpawnFailed
            )
        })
    }

    /// Number of shaders skipped because the batch was cancelled.
    #[inline]
    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.count(|status| status == CompileStatus::Cancelled)
    }

    /// Whether every shader compiled. Also true for an empty batch.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.results.iter().all(CompileResult::is_success)
    }

    fn count(&self, pred: impl Fn(CompileStatus) -> bool) -> usize {
        self.results
            .iter()
            .filter(|result| pred(result.status))
            .count()
    }
}

/// An error aborting a whole batch before any shader was compiled.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BatchError {
    /// The compiler failed its preflight check.
    #[error(transparent)]
    CompilerNotFound(#[from] CompilerNotFound),
    /// The shader directory is unusable.
    #[error(transparent)]
    Discover(#[from] DiscoverError),
    /// The output directory could not be created.
    #[error("could not create output directory '{}': {source}", path.display())]
    OutputDir {
        /// The output directory.
        path: PathBuf,
        /// Source of the error.
        source: io::Error,
    },
}

/// Compiles every shader of a directory with an external compiler.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct BatchCompiler<R = SystemRunner, W = io::Stdout> {
    /// The external compiler.
    pub compiler: Compiler,
    /// Extensions of the files to compile.
    pub extensions: ExtensionSet,
    /// How output paths are derived.
    pub naming: OutputNaming,
    /// Directory outputs are written to.
    pub output_dir: PathBuf,
    /// Number of workers, `None` for the available parallelism.
    pub jobs: Option<NonZeroUsize>,
    /// Token to stop the batch early.
    pub cancellation: Cancellation,
    /// Runner of compiler processes.
    pub runner: R,
    /// Writer of user output.
    pub writer: W,
}

impl Default for BatchCompiler {
    #[inline]
    fn default() -> Self {
        Self {
            compiler: Compiler::default(),
            extensions: ExtensionSet::default(),
            naming: OutputNaming::default(),
            output_dir: PathBuf::from("."),
            jobs: None,
            cancellation: Cancellation::default(),
            runner: SystemRunner,
            writer: io::stdout(),
        }
    }
}

impl From<Compiler> for BatchCompiler {
    #[inline]
    fn from(compiler: Compiler) -> Self {
        Self {
            compiler,
            ..Self::default()
        }
    }
}

impl<R, W> BatchCompiler<R, W> {
    /// Replaces the recognized extensions.
    #[inline]
    #[must_use]
    pub fn extensions(self, extensions: ExtensionSet) -> Self {
        Self { extensions, ..self }
    }

    /// Replaces the output naming rule.
    #[inline]
    #[must_use]
    pub fn naming(self, naming: OutputNaming) -> Self {
        Self { naming, ..self }
    }

    /// Replaces the output directory.
    #[inline]
    #[must_use]
    pub fn output_dir(self, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..self
        }
    }

    /// Replaces the number of workers.
    #[inline]
    #[must_use]
    pub fn jobs(self, jobs: Option<NonZeroUsize>) -> Self {
        Self { jobs, ..self }
    }

    /// Replaces the cancellation token.
    #[inline]
    #[must_use]
    pub fn cancellation(self, cancellation: Cancellation) -> Self {
        Self {
            cancellation,
            ..self
        }
    }

    /// Replaces the process runner.
    #[inline]
    #[must_use]
    pub fn runner<NR>(self, runner: NR) -> BatchCompiler<NR, W> {
        BatchCompiler {
            compiler: self.compiler,
            extensions: self.extensions,
            naming: self.naming,
            output_dir: self.output_dir,
            jobs: self.jobs,
            cancellation: self.cancellation,
            runner,
            writer: self.writer,
        }
    }

    /// Replaces the writer of user output.
    #[inline]
    #[must_use]
    pub fn writer<NW>(self, writer: NW) -> BatchCompiler<R, NW> {
        BatchCompiler {
            compiler: self.compiler,
            extensions: self.extensions,
            naming: self.naming,
            output_dir: self.output_dir,
            jobs: self.jobs,
            cancellation: self.cancellation,
            runner: self.runner,
            writer,
        }
    }

    fn worker_count(&self, job_count: usize) -> usize {
        let jobs = self.jobs.map_or_else(
            || thread::available_parallelism().map_or(1, NonZeroUsize::get),
            NonZeroUsize::get,
        );
        jobs.min(job_count).max(1)
    }
}

impl<R, W> BatchCompiler<R, W>
where
    R: ProcessRunner,
    W: io::Write,
{
    /// Compiles every shader in `directory`.
    ///
    /// The compiler is checked once before the directory is looked at. Failures of single
    /// shaders are reported and counted but never abort the batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the compiler is not available, `directory` is not a directory,
    /// or the output directory can't be created.
    pub fn compile_all(&mut self, directory: &Path) -> Result<BatchReport, BatchError> {
        self.compiler.ensure_available(&self.runner)?;

        let jobs = discover(directory, &self.extensions, self.naming, &self.output_dir)?;
        for (output, sources) in output_collisions(&jobs) {
            log::warn!(
                "{} shaders write to '{}', only one output will survive: {sources:?}",
                sources.len(),
                output.display()
            );
        }
        if !jobs.is_empty() {
            fs::create_dir_all(&self.output_dir).map_err(|source| BatchError::OutputDir {
                path: self.output_dir.clone(),
                source,
            })?;
        }

        let report = self.run_jobs(jobs);
        self.write_summary(&report);
        Ok(report)
    }

    /// Runs `jobs` on the worker pool, writing a line for each result as it completes.
    ///
    /// Returns once every job has a result.
    pub fn run_jobs(&mut self, jobs: Vec<ShaderJob>) -> BatchReport {
        let mut report = BatchReport::default();
        if jobs.is_empty() {
            return report;
        }
        let workers = self.worker_count(jobs.len());
        log::debug!("compiling {} shader(s) on {workers} worker(s)", jobs.len());

        let Self {
            compiler,
            cancellation,
            runner,
            writer,
            ..
        } = self;
        let (compiler, cancellation, runner) = (&*compiler, &*cancellation, &*runner);

        // Rendezvous channel, so a job is only handed out once a worker is free to take it.
        let (job_tx, job_rx) = crossbeam_channel::bounded::<ShaderJob>(0);
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<CompileResult>();

        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    for job in job_rx {
                        let result = if cancellation.is_cancelled() {
                            CompileResult::cancelled(job)
                        } else {
                            compile_one(job, compiler, runner)
                        };
                        if result_tx.send(result).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(job_rx);

            scope.spawn(move || {
                for job in jobs {
                    let unsent = if cancellation.is_cancelled() {
                        Some(job)
                    } else {
                        job_tx.send(job).err().map(|SendError(job)| job)
                    };
                    if let Some(job) = unsent {
                        if result_tx.send(CompileResult::cancelled(job)).is_err() {
                            break;
                        }
                    }
                }
            });

            for result in result_rx {
                write_result(writer, &result);
                report.results.push(result);
            }
        });

        report
    }

    fn write_summary(&mut self, report: &BatchReport) {
        let written = user_output!(
            self.writer,
            "{} succeeded, {} failed, {} cancelled\nShader compilation complete\n",
            report.succeeded(),
            report.failed(),
            report.cancelled()
        );
        if let Err(err) = written {
            log::warn!("could not write summary: {err}");
        }
    }
}

/// Writes the user facing line for one result.
fn write_result<W: io::Write>(writer: &mut W, result: &CompileResult) {
    let source = result.source.display();
    let written = match result.status {
        CompileStatus::Succeeded => user_output!(
            *writer,
            "Compilation successful: {source} -> {}\n",
            display_output(&result.output).display()
        ),
        CompileStatus::Cancelled => user_output!(*writer, "Skipped {source}: batch cancelled\n"),
        CompileStatus::Failed | CompileStatus::TimedOut | CompileStatus::SpawnFailed => {
            user_output!(*writer, "Error compiling {source}: {}\n", result.diagnostic)
        }
    };
    if let Err(err) = written {
        log::warn!("could not write result of '{source}': {err}");
    }
}

/// Outputs in the working directory are shown as `vert.spv`, not `./vert.spv`.
fn display_output(output: &Path) -> &Path {
    output.strip_prefix(".").unwrap_or(output)
}
