use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Everything needed to launch one child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Complete environment; the child inherits nothing else.
    pub env: Vec<(OsString, OsString)>,
    pub current_dir: Option<PathBuf>,
    /// Inherit stdin instead of giving the child `/dev/null`.
    pub interactive: bool,
}

/// Launches a child, blocks until it exits, returns captured output.
///
/// A `timeout` that elapses kills the child and yields an error of kind
/// `io::ErrorKind::TimedOut`.
pub trait Runner: Send + Sync {
    fn output(&self, spec: &ProcessSpec, timeout: Option<Duration>) -> io::Result<Output>;
}

pub struct OsRunner;

impl Runner for OsRunner {
    fn output(&self, spec: &ProcessSpec, timeout: Option<Duration>) -> io::Result<Output> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .env_clear()
            .envs(spec.env.iter().map(|(k, v)| (k, v)))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.interactive {
                Stdio::inherit()
            } else {
                Stdio::null()
            });
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;
        let deadline = timeout.map(|limit| Instant::now() + limit);
        // Drain both pipes concurrently so a chatty child never blocks on a
        // full pipe while we wait on it.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = match deadline {
            Some(deadline) => wait_with_deadline(&mut child, deadline)?,
            None => child.wait()?,
        };

        // A background helper the child left behind may still hold the
        // pipes open; the deadline covers reading them too.
        Ok(Output {
            status,
            stdout: collect(stdout, deadline)?,
            stderr: collect(stderr, deadline)?,
        })
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });
    rx
}

fn collect(stream: Option<Receiver<Vec<u8>>>, deadline: Option<Instant>) -> io::Result<Vec<u8>> {
    let Some(rx) = stream else {
        return Ok(Vec::new());
    };
    let Some(deadline) = deadline else {
        return Ok(rx.recv().unwrap_or_default());
    };
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(buf) => Ok(buf),
        Err(RecvTimeoutError::Disconnected) => Ok(Vec::new()),
        Err(RecvTimeoutError::Timeout) => Err(timed_out()),
    }
}

fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "deadline passed before the command finished")
}

fn wait_with_deadline(child: &mut Child, deadline: Instant) -> io::Result<ExitStatus> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }

        let now = Instant::now();
        if now >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(timed_out());
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCall {
    pub spec: ProcessSpec,
    pub timeout: Option<Duration>,
}

type Reply = Box<dyn FnOnce(&ProcessSpec) -> io::Result<Output> + Send>;

/// Test double that records calls and answers from a queue.
///
/// A queued reply may be a canned `Output` or a closure, so a test can write
/// the parameter file a real application would have written.
pub struct MockRunner {
    calls: Arc<Mutex<Vec<RunCall>>>,
    replies: Arc<Mutex<VecDeque<Reply>>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            replies: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn push_output(&self, out: io::Result<Output>) {
        self.push_with(move |_| out);
    }

    pub fn push_with<F>(&self, reply: F)
    where
        F: FnOnce(&ProcessSpec) -> io::Result<Output> + Send + 'static,
    {
        self.replies.lock().unwrap().push_back(Box::new(reply));
    }

    pub fn calls(&self) -> Vec<RunCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner for MockRunner {
    fn output(&self, spec: &ProcessSpec, timeout: Option<Duration>) -> io::Result<Output> {
        self.calls.lock().unwrap().push(RunCall {
            spec: spec.clone(),
            timeout,
        });

        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(reply) => reply(spec),
            None => Err(io::Error::other("MockRunner has no queued outputs")),
        }
    }
}

/// Build an `Output` with the given exit code, for tests and doubles.
#[cfg(unix)]
pub fn synthetic_output(code: i32, stdout: &str, stderr: &str) -> Output {
    use std::os::unix::process::ExitStatusExt;
    Output {
        status: ExitStatus::from_raw(code << 8),
        stdout: stdout.as_bytes().to_vec(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ProcessSpec {
        ProcessSpec {
            program: PathBuf::from("/bin/sh"),
            args: vec![OsString::from("-c"), OsString::from(script)],
            env: vec![
                (OsString::from("GREETING"), OsString::from("hello")),
                (OsString::from("PATH"), OsString::from("/usr/bin:/bin")),
            ],
            current_dir: None,
            interactive: false,
        }
    }

    #[test]
    fn mock_runner_records_calls_and_returns_outputs() {
        let mr = MockRunner::new();
        mr.push_output(Ok(synthetic_output(0, "ok", "")));

        let spec = sh("echo hi");
        let out = mr.output(&spec, Some(Duration::from_secs(1))).unwrap();

        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout), "ok");

        let calls = mr.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].spec, spec);
        assert_eq!(calls[0].timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn mock_runner_without_replies_errors() {
        let mr = MockRunner::new();
        assert!(mr.output(&sh("true"), None).is_err());
    }

    #[test]
    fn synthetic_output_carries_exit_code() {
        assert_eq!(synthetic_output(7, "", "").status.code(), Some(7));
    }

    #[test]
    fn os_runner_captures_both_streams_and_status() {
        let out = OsRunner
            .output(&sh("echo \"$GREETING\"; echo oops >&2; exit 4"), None)
            .unwrap();
        assert_eq!(out.status.code(), Some(4));
        assert_eq!(String::from_utf8_lossy(&out.stdout), "hello\n");
        assert_eq!(String::from_utf8_lossy(&out.stderr), "oops\n");
    }

    #[test]
    fn os_runner_replaces_environment() {
        // HOME is normally set for the test process; the child must not see it.
        let out = OsRunner
            .output(&sh("printf '%s' \"${HOME:-unset}\""), None)
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&out.stdout), "unset");
    }

    #[test]
    fn os_runner_kills_on_timeout() {
        let started = Instant::now();
        let err = OsRunner
            .output(&sh("exec sleep 5"), Some(Duration::from_millis(200)))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn os_runner_deadline_covers_background_helpers() {
        let started = Instant::now();
        let err = OsRunner
            .output(&sh("sleep 3 & exit 0"), Some(Duration::from_millis(200)))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn os_runner_without_deadline_waits_for_pipes() {
        let out = OsRunner
            .output(&sh("(sleep 0.2; echo late) & echo early"), None)
            .unwrap();
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout), "early\nlate\n");
    }

    #[test]
    fn os_runner_reports_missing_program() {
        let mut spec = sh("true");
        spec.program = PathBuf::from("/no/such/program");
        let err = OsRunner.output(&spec, None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
