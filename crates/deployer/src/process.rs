//! Blocking child-process execution with captured output and cancellation.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often a running child is checked for exit or cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A program invocation: arguments, working directory and stdin
#[derive(Debug, Clone)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<String>,
    dir: Option<PathBuf>,
    stdin: Option<Vec<u8>>,
}

impl Invocation {
    /// Invoke `program` with no arguments
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            dir: None,
            stdin: None,
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the program in `dir`
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.dir = Some(dir.to_path_buf());
        self
    }

    /// Bytes written to the child's stdin, which is then closed
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Program name used in logs and errors
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .to_string()
    }

    /// Command line for display purposes
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Output of a successful program run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Everything written to stdout
    pub stdout: String,
    /// Everything written to stderr
    pub stderr: String,
}

/// Run a program to completion, capturing stdout and stderr
///
/// Polls the child until it exits. If `cancel` fires first the child is
/// killed and reaped, and `Error::Cancelled` is returned. A non-zero exit is
/// reported as `Error::CommandFailed` carrying both captured streams.
pub fn run(invocation: &Invocation, cancel: &CancelToken) -> Result<CommandOutput> {
    let program = invocation.program_name();
    if cancel.is_cancelled() {
        return Err(Error::Cancelled {
            program,
            timed_out: cancel.timed_out(),
        });
    }

    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &invocation.dir {
        command.current_dir(dir);
    }

    log::debug!("Running: {}", invocation.display());
    let mut child = command.spawn().map_err(|source| Error::Spawn {
        program: program.clone(),
        source,
    })?;

    let writer = match (child.stdin.take(), invocation.stdin.clone()) {
        (Some(pipe), Some(input)) => Some(spawn_writer(pipe, input)),
        _ => None,
    };
    let stdout = spawn_reader(child.stdout.take());
    let stderr = spawn_reader(child.stderr.take());

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(source) => {
                // Best effort: the child may already be gone
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Spawn { program, source });
            }
        }

        if cancel.is_cancelled() {
            log::warn!("Terminating {program}: cancelled before completion");
            let _ = child.kill();
            let _ = child.wait();
            // Reader threads finish on their own once the pipes close
            return Err(Error::Cancelled {
                program,
                timed_out: cancel.timed_out(),
            });
        }

        thread::sleep(POLL_INTERVAL);
    };

    // A background grandchild can keep the pipes open after the child exits
    if !wait_for_threads(writer.as_ref(), [stdout.as_ref(), stderr.as_ref()], cancel) {
        log::warn!("Abandoning output of {program}: pipes still open when cancelled");
        return Err(Error::Cancelled {
            program,
            timed_out: cancel.timed_out(),
        });
    }

    if let Some(writer) = writer {
        match writer.join() {
            Ok(Err(e)) if e.kind() != io::ErrorKind::BrokenPipe => {
                log::warn!("Failed to write stdin of {program}: {e}");
            }
            _ => {}
        }
    }

    let stdout = collect(stdout);
    let stderr = collect(stderr);

    if status.success() {
        Ok(CommandOutput { stdout, stderr })
    } else {
        Err(Error::CommandFailed {
            program,
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

fn spawn_writer<W: Write + Send + 'static>(
    mut pipe: W,
    input: Vec<u8>,
) -> JoinHandle<io::Result<()>> {
    thread::spawn(move || pipe.write_all(&input))
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            // Keep whatever was read before an error
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

/// Wait until every pipe thread finished, false if `cancel` fired first
fn wait_for_threads(
    writer: Option<&JoinHandle<io::Result<()>>>,
    readers: [Option<&JoinHandle<Vec<u8>>>; 2],
    cancel: &CancelToken,
) -> bool {
    loop {
        let finished = writer.is_none_or(JoinHandle::is_finished)
            && readers.iter().all(|h| h.is_none_or(JoinHandle::is_finished));
        if finished {
            return true;
        }
        if cancel.is_cancelled() {
            return false;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Invocation {
        Invocation::new("sh").args(["-c", script])
    }

    #[test]
    fn test_run_captures_stdout() {
        let out = run(&sh("echo hello; echo oops >&2"), &CancelToken::new()).unwrap();
        assert_eq!(out.stdout, "hello\n");
        assert_eq!(out.stderr, "oops\n");
    }

    #[test]
    fn test_run_feeds_stdin() {
        let out = run(&Invocation::new("cat").stdin("a: 1\n"), &CancelToken::new()).unwrap();
        assert_eq!(out.stdout, "a: 1\n");
    }

    #[test]
    fn test_run_in_directory() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("marker.txt"), "here").unwrap();
        let out = run(
            &sh("cat marker.txt").current_dir(temp.path()),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(out.stdout, "here");
    }

    #[test]
    fn test_run_nonzero_exit() {
        let err = run(&sh("echo partial; echo broken >&2; exit 3"), &CancelToken::new())
            .unwrap_err();
        match err {
            Error::CommandFailed {
                program,
                code,
                stdout,
                stderr,
            } => {
                assert_eq!(program, "sh");
                assert_eq!(code, Some(3));
                assert_eq!(stdout, "partial\n");
                assert_eq!(stderr, "broken\n");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_run_missing_program() {
        let err = run(
            &Invocation::new("definitely-not-a-real-program-5d1c"),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[test]
    fn test_run_timeout_kills_child() {
        let cancel = CancelToken::with_timeout(Duration::from_millis(100));
        let started = Instant::now();
        let err = run(&sh("exec sleep 30"), &cancel).unwrap_err();

        assert!(matches!(err, Error::Cancelled { timed_out: true, .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_run_timeout_with_background_grandchild() {
        let cancel = CancelToken::with_timeout(Duration::from_millis(300));
        let started = Instant::now();
        let err = run(&sh("sleep 5 & echo hi"), &cancel).unwrap_err();

        assert!(matches!(err, Error::Cancelled { timed_out: true, .. }));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_run_waits_for_output_after_exit() {
        let out = run(&sh("(sleep 0.2; echo late) & echo early"), &CancelToken::new()).unwrap();
        assert_eq!(out.stdout, "early\nlate\n");
    }

    #[test]
    fn test_run_already_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = run(&sh("echo never"), &cancel).unwrap_err();
        assert!(matches!(err, Error::Cancelled { timed_out: false, .. }));
    }

    #[test]
    fn test_invocation_display() {
        let inv = Invocation::new("/usr/bin/kpt").args(["live", "apply", "-"]);
        assert_eq!(inv.display(), "/usr/bin/kpt live apply -");
        assert_eq!(inv.program_name(), "kpt");
    }
}
