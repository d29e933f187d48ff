//! Utilities for executing external [commands](Command).
//!
//! Every call to the shader compiler goes through a [`ProcessRunner`], so the batch logic
//! never spawns processes directly and tests can swap in a scripted runner.

use std::{
    ffi::OsString,
    fmt, io,
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

/// How often a running child is polled for exit while a timeout is pending.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A program and its arguments, ready to be run by a [`ProcessRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// The program to run, resolved on `PATH` if not a path.
    pub program: OsString,
    /// Arguments passed to the program, in order.
    pub args: Vec<OsString>,
}

impl Invocation {
    /// Creates an invocation of `program` without arguments.
    #[inline]
    #[must_use]
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    #[inline]
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[inline]
    #[must_use]
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl From<&Invocation> for Command {
    #[inline]
    fn from(invocation: &Invocation) -> Self {
        let mut command = Self::new(&invocation.program);
        command.args(&invocation.args);
        command
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// What happened when a [`ProcessRunner`] ran an [`Invocation`].
#[derive(Debug)]
#[non_exhaustive]
pub enum RunOutcome {
    /// The process ran to completion, successfully or not.
    Exited {
        /// Whether the process reported success.
        success: bool,
        /// Exit code, if the process exited normally rather than by a signal.
        code: Option<i32>,
        /// Captured standard output.
        stdout: Vec<u8>,
        /// Captured standard error.
        stderr: Vec<u8>,
    },
    /// The process exceeded its time budget and was killed.
    TimedOut {
        /// The budget that was exceeded.
        after: Duration,
    },
    /// The process could not be started at all.
    SpawnFailed(io::Error),
    /// The process started, but waiting for it failed. It was killed.
    WaitFailed(io::Error),
}

impl RunOutcome {
    /// Creates a successful [`Exited`](Self::Exited) outcome with the given stdout.
    #[inline]
    #[must_use]
    pub fn success(stdout: impl Into<Vec<u8>>) -> Self {
        Self::Exited {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    /// Creates a failed [`Exited`](Self::Exited) outcome with the given exit code and stderr.
    #[inline]
    #[must_use]
    pub fn failure(code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self::Exited {
            success: false,
            code: Some(code),
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }
}

/// Runs external commands on behalf of the batch compiler.
///
/// Implementations must be callable from several worker threads at once.
pub trait ProcessRunner: Sync {
    /// Runs `invocation` to completion, or until `timeout` elapses.
    ///
    /// Failures of any kind are reported through [`RunOutcome`], never by panicking.
    fn run(&self, invocation: &Invocation, timeout: Option<Duration>) -> RunOutcome;
}

impl<R: ProcessRunner + ?Sized> ProcessRunner for &R {
    #[inline]
    fn run(&self, invocation: &Invocation, timeout: Option<Duration>) -> RunOutcome {
        (**self).run(invocation, timeout)
    }
}

/// [`ProcessRunner`] spawning real child processes.
#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, invocation: &Invocation, timeout: Option<Duration>) -> RunOutcome {
        let mut command = Command::from(invocation);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group, so a Ctrl-C on the terminal reaches only us and running
        // compilations can be awaited.
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut command, 0);
        log::debug!("running `{invocation}`");
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => return RunOutcome::SpawnFailed(source),
        };

        // Drain both pipes off-thread so a chatty child can't block on a full pipe.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = match wait(&mut child, timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                kill_and_reap(&mut child, invocation);
                // Grandchildren may still hold the pipes open, so the drain threads are
                // left detached instead of joined.
                return RunOutcome::TimedOut {
                    after: timeout.unwrap_or_default(),
                };
            }
            Err(source) => {
                log::warn!("failed to wait for `{invocation}`: {source}");
                kill_and_reap(&mut child, invocation);
                return RunOutcome::WaitFailed(source);
            }
        };

        RunOutcome::Exited {
            success: status.success(),
            code: status.code(),
            stdout: stdout.map(join_drain).unwrap_or_default(),
            stderr: stderr.map(join_drain).unwrap_or_default(),
        }
    }
}

fn kill_and_reap(child: &mut Child, invocation: &Invocation) {
    if let Err(err) = child.kill() {
        log::warn!("failed to kill `{invocation}`: {err}");
    }
    if let Err(err) = child.wait() {
        log::warn!("failed to reap `{invocation}`: {err}");
    }
}

/// Waits for `child` to exit, returning `None` if `timeout` elapses first.
fn wait(
    child: &mut Child,
    timeout: Option<Duration>,
) -> io::Result<Option<std::process::ExitStatus>> {
    let Some(timeout) = timeout else {
        return child.wait().map(Some);
    };
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// Reads `pipe` to its end on a new thread.
fn drain(mut pipe: impl io::Read + Send + 'static) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(err) = pipe.read_to_end(&mut buf) {
            log::debug!("error reading child pipe: {err}");
        }
        buf
    })
}

fn join_drain(handle: thread::JoinHandle<Vec<u8>>) -> Vec<u8> {
    handle.join().unwrap_or_default()
}

#[cfg(all(test, unix))]
mod test {
    use super::*;

    #[test_log::test]
    fn captures_exit_code_and_stderr() {
        let invocation = Invocation::new("sh").args(["-c", "echo oops >&2; exit 3"]);
        match SystemRunner.run(&invocation, Some(Duration::from_secs(10))) {
            RunOutcome::Exited {
                success,
                code,
                stderr,
                ..
            } => {
                assert!(!success);
                assert_eq!(code, Some(3));
                assert_eq!(String::from_utf8_lossy(&stderr).trim(), "oops");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test_log::test]
    fn captures_stdout_without_timeout() {
        let invocation = Invocation::new("sh").args(["-c", "echo hello"]);
        match SystemRunner.run(&invocation, None) {
            RunOutcome::Exited {
                success, stdout, ..
            } => {
                assert!(success);
                assert_eq!(String::from_utf8_lossy(&stdout).trim(), "hello");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test_log::test]
    fn kills_process_after_timeout() {
        let invocation = Invocation::new("sleep").arg("10");
        let start = Instant::now();
        let outcome = SystemRunner.run(&invocation, Some(Duration::from_millis(100)));
        assert!(matches!(outcome, RunOutcome::TimedOut { .. }), "{outcome:?}");
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test_log::test]
    fn missing_program_fails_to_spawn() {
        let invocation = Invocation::new("spv-batch-definitely-not-a-real-program");
        let outcome = SystemRunner.run(&invocation, Some(Duration::from_secs(1)));
        match outcome {
            RunOutcome::SpawnFailed(err) => assert_eq!(err.kind(), io::ErrorKind::NotFound),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[cfg(target_os = "linux")]
    #[test_log::test]
    fn child_leads_its_own_process_group() {
        // Prints the shell's pid, then the process group from `/proc/<pid>/stat`.
        let script = "echo $$; cut -d' ' -f5 /proc/$$/stat";
        let invocation = Invocation::new("sh").args(["-c", script]);
        let RunOutcome::Exited { success, stdout, .. } = SystemRunner.run(&invocation, None)
        else {
            panic!("`sh` did not run");
        };
        assert!(success);
        let text = String::from_utf8_lossy(&stdout);
        let ids: Vec<u32> = text.lines().map(|line| line.trim().parse().unwrap()).collect();
        assert_eq!(ids.len(), 2, "{text}");
        assert_eq!(ids[0], ids[1], "child is not a process group leader");

        let own_stat = std::fs::read_to_string("/proc/self/stat").unwrap();
        let after_comm = own_stat.rsplit_once(')').unwrap().1;
        let own_group: u32 = after_comm.split_whitespace().nth(2).unwrap().parse().unwrap();
        assert_ne!(own_group, ids[1]);
    }

    #[test]
    fn invocation_displays_like_a_shell_line() {
        let invocation = Invocation::new("glslc").args(["a.vert", "-o", "vert.spv"]);
        assert_eq!(invocation.to_string(), "glslc a.vert -o vert.spv");
    }
}
