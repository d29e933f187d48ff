//! Compiling a single [`ShaderJob`] with the external compiler.

use std::{ffi::OsString, fmt, path::PathBuf, time::Duration};

use crate::{
    command::{Invocation, ProcessRunner, RunOutcome},
    job::ShaderJob,
};

/// Compiler used when none is configured, from the Vulkan SDK / shaderc.
pub const DEFAULT_COMPILER: &str = "glslc";

/// Time budget of a single compiler invocation when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The external shader compiler and how to call it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Compiler {
    /// Executable, resolved on `PATH` if not a path.
    pub program: OsString,
    /// Extra arguments passed before the source path.
    pub extra_args: Vec<OsString>,
    /// Time budget of each invocation, `None` to wait forever.
    pub timeout: Option<Duration>,
}

impl Default for Compiler {
    #[inline]
    fn default() -> Self {
        Self {
            program: DEFAULT_COMPILER.into(),
            extra_args: Vec::new(),
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

impl Compiler {
    /// Creates a compiler calling `program` with the default timeout.
    #[inline]
    #[must_use]
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Replaces the extra arguments.
    #[inline]
    #[must_use]
    pub fn extra_args<I, A>(self, extra_args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        Self {
            extra_args: extra_args.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    /// Replaces the per-invocation timeout.
    #[inline]
    #[must_use]
    pub fn timeout(self, timeout: Option<Duration>) -> Self {
        Self { timeout, ..self }
    }

    /// `<program> [extra args] <source> -o <output>`
    #[must_use]
    pub fn invocation(&self, job: &ShaderJob) -> Invocation {
        Invocation::new(&self.program)
            .args(&self.extra_args)
            .arg(&job.source)
            .arg("-o")
            .arg(&job.output)
    }

    /// Checks that the compiler can be started by asking for its version.
    ///
    /// Returns the first line of the version output.
    ///
    /// # Errors
    ///
    /// Returns [`CompilerNotFound`] if the compiler can't be run or reports failure.
    pub fn ensure_available<R>(&self, runner: &R) -> Result<String, CompilerNotFound>
    where
        R: ProcessRunner + ?Sized,
    {
        let invocation = Invocation::new(&self.program).arg("--version");
        let not_found = |reason: String| CompilerNotFound {
            program: self.program.clone(),
            reason,
        };
        match runner.run(&invocation, self.timeout) {
            RunOutcome::Exited {
                success: true,
                stdout,
                ..
            } => {
                let version = String::from_utf8_lossy(&stdout)
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_owned();
                log::debug!("found compiler `{invocation}`: {version}");
                Ok(version)
            }
            RunOutcome::Exited { code, stderr, .. } => Err(not_found(format!(
                "version query exited with {}: {}",
                ExitCode(code),
                String::from_utf8_lossy(&stderr).trim()
            ))),
            RunOutcome::TimedOut { after } => {
                Err(not_found(format!("version query timed out after {after:?}")))
            }
            RunOutcome::SpawnFailed(source) => Err(not_found(source.to_string())),
            RunOutcome::WaitFailed(source) => Err(not_found(format!(
                "could not wait for version query: {source}"
            ))),
        }
    }
}

/// An error indicating that the external compiler is not usable.
#[derive(Debug, Clone, thiserror::Error)]
#[error("shader compiler `{}` not found: {reason}", program.to_string_lossy())]
pub struct CompilerNotFound {
    /// The compiler that was looked for.
    pub program: OsString,
    /// Why the check failed.
    pub reason: String,
}

/// How a single job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CompileStatus {
    /// The compiler exited successfully.
    Succeeded,
    /// The compiler exited with a failure.
    Failed,
    /// The compiler exceeded its time budget and was killed.
    TimedOut,
    /// The compiler could not be started for this job.
    SpawnFailed,
    /// The job was never started because the batch was cancelled.
    Cancelled,
}

/// Outcome of one [`ShaderJob`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct CompileResult {
    /// Path of the shader source.
    pub source: PathBuf,
    /// Path the compiled bytecode was (or would have been) written to.
    pub output: PathBuf,
    /// How the job ended.
    pub status: CompileStatus,
    /// Diagnostics of the compiler, passed through verbatim. May be empty.
    pub diagnostic: String,
    /// Exit code of the compiler, if it exited normally.
    pub exit_code: Option<i32>,
}

impl CompileResult {
    fn new(
        job: ShaderJob,
        status: CompileStatus,
        diagnostic: String,
        exit_code: Option<i32>,
    ) -> Self {
        Self {
            source: job.source,
            output: job.output,
            status,
            diagnostic,
            exit_code,
        }
    }

    /// A result for a job that was never submitted.
    #[inline]
    #[must_use]
    pub fn cancelled(job: ShaderJob) -> Self {
        Self::new(job, CompileStatus::Cancelled, String::new(), None)
    }

    /// Whether the compiler produced the output.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == CompileStatus::Succeeded
    }
}

/// Compiles `job`, turning every kind of failure into a [`CompileResult`].
#[must_use]
pub fn compile_one<R>(job: ShaderJob, compiler: &Compiler, runner: &R) -> CompileResult
where
    R: ProcessRunner + ?Sized,
{
    let invocation = compiler.invocation(&job);
    match runner.run(&invocation, compiler.timeout) {
        RunOutcome::Exited {
            success,
            code,
            stderr,
            ..
        } => {
            let diagnostic = String::from_utf8_lossy(&stderr).trim_end().to_owned();
            if success {
                CompileResult::new(job, CompileStatus::Succeeded, diagnostic, code)
            } else {
                log::error!("`{invocation}` exited with {}", ExitCode(code));
                let diagnostic = if diagnostic.is_empty() {
                    format!("compiler exited with {}", ExitCode(code))
                } else {
                    diagnostic
                };
                CompileResult::new(job, CompileStatus::Failed, diagnostic, code)
            }
        }
        RunOutcome::TimedOut { after } => {
            log::error!("`{invocation}` timed out");
            let diagnostic = format!("TimedOut after {after:?}");
            CompileResult::new(job, CompileStatus::TimedOut, diagnostic, None)
        }
        RunOutcome::SpawnFailed(source) => {
            log::error!("could not run `{invocation}`: {source}");
            let diagnostic = format!("could not run compiler: {source}");
            CompileResult::new(job, CompileStatus::SpawnFailed, diagnostic, None)
        }
        RunOutcome::WaitFailed(source) => {
            log::error!("lost track of `{invocation}`: {source}");
            let diagnostic = format!("could not wait for compiler: {source}");
            CompileResult::new(job, CompileStatus::Failed, diagnostic, None)
        }
    }
}

/// Display helper for an optional exit code.
struct ExitCode(Option<i32>);

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(code) => write!(f, "code {code}"),
            None => f.write_str("a signal"),
        }
    }
}
