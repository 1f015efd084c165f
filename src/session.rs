use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, RwLock, RwLockReadGuard};
use std::time::{Duration, Instant, SystemTime};

use log::{debug, warn};

use crate::collector::{self, HdsTraceReader, OutputFile, RecordReader};
use crate::config::StarConfig;
use crate::environ::{EnvOptions, build_environment};
use crate::errors::{Result, StarError};
use crate::invocation::CommandInvocation;
use crate::record::{ResultRecord, Value};
use crate::runner::{OsRunner, ProcessSpec, Runner};
use crate::scratch::ExecutionContext;
use crate::toolkit::ToolkitLocation;

/// Slack for filesystems with coarse modification times.
const FRESHNESS_SLACK: Duration = Duration::from_secs(2);

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationResult {
    pub command: String,
    pub exit_code: i32,
    /// The parameter file the command wrote.
    pub output_file: PathBuf,
    /// Only kept when the invocation asked for it.
    pub stdout: Option<String>,
    pub elapsed: Duration,
}

/// Explicit invocation context: toolkit location, scratch directory, and the
/// collaborators that launch commands and decode their output.
///
/// Invocations hold the toolkit lock for reading while they run, so
/// `change_toolkit_path` and `reset_scratch` wait for in-flight commands.
/// Invocations of the same command name are serialized because they share
/// one parameter file in the scratch directory.
pub struct Session {
    toolkit: RwLock<Option<ToolkitLocation>>,
    scratch: ExecutionContext,
    runner: Arc<dyn Runner>,
    reader: Arc<dyn RecordReader>,
    timeout: Option<Duration>,
    interactive: bool,
    quiet: bool,
    command_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

pub struct SessionBuilder {
    toolkit: Option<ToolkitLocation>,
    scratch_parent: Option<PathBuf>,
    runner: Option<Arc<dyn Runner>>,
    reader: Option<Arc<dyn RecordReader>>,
    timeout: Option<Duration>,
    interactive: bool,
    quiet: bool,
}

impl SessionBuilder {
    pub fn toolkit(mut self, toolkit: ToolkitLocation) -> Self {
        self.toolkit = Some(toolkit);
        self
    }

    pub fn scratch_parent(mut self, parent: impl Into<PathBuf>) -> Self {
        self.scratch_parent = Some(parent.into());
        self
    }

    pub fn runner(mut self, runner: Arc<dyn Runner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn reader(mut self, reader: Arc<dyn RecordReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn build(self) -> Session {
        let runner = self.runner.unwrap_or_else(|| Arc::new(OsRunner));
        let reader = self
            .reader
            .unwrap_or_else(|| Arc::new(HdsTraceReader::new(runner.clone())));
        let scratch = match self.scratch_parent {
            Some(parent) => ExecutionContext::in_dir(parent),
            None => ExecutionContext::new(),
        };
        Session {
            toolkit: RwLock::new(self.toolkit),
            scratch,
            runner,
            reader,
            timeout: self.timeout,
            interactive: self.interactive,
            quiet: self.quiet,
            command_locks: Mutex::new(HashMap::new()),
        }
    }
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder {
            toolkit: None,
            scratch_parent: None,
            runner: None,
            reader: None,
            timeout: None,
            interactive: false,
            quiet: false,
        }
    }

    pub fn new(toolkit: ToolkitLocation) -> Self {
        Self::builder().toolkit(toolkit).build()
    }

    /// Session from configuration. A toolkit that cannot be located leaves
    /// the session unconfigured: every run fails fast until
    /// `change_toolkit_path` succeeds.
    pub fn from_config(config: &StarConfig) -> Self {
        let mut builder = Self::builder()
            .interactive(config.interactive)
            .quiet(config.quiet);
        if let Some(parent) = &config.scratch_parent {
            builder = builder.scratch_parent(parent);
        }
        if let Some(limit) = config.timeout() {
            builder = builder.timeout(limit);
        }
        match ToolkitLocation::locate(config.toolkit_dir.as_deref()) {
            Ok(toolkit) => builder = builder.toolkit(toolkit),
            Err(err) => warn!("{err}"),
        }
        builder.build()
    }

    /// Current toolkit location, if one is configured.
    pub fn toolkit(&self) -> Option<ToolkitLocation> {
        self.toolkit.read().ok().and_then(|guard| guard.clone())
    }

    /// Validate `path` and make it this session's toolkit. On failure the
    /// previous location stays in effect.
    pub fn change_toolkit_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let location = ToolkitLocation::new(path)?;
        let mut guard = self
            .toolkit
            .write()
            .map_err(|_| StarError::Configuration("toolkit lock poisoned".into()))?;
        debug!("Toolkit changed to {}", location.root().display());
        *guard = Some(location);
        Ok(())
    }

    /// Create the scratch directory if needed and return it.
    pub fn ensure_scratch_dir(&self) -> Result<PathBuf> {
        self.scratch.ensure()
    }

    /// Remove the scratch directory and everything in it, once no command is
    /// running. The next invocation creates a fresh one.
    pub fn reset_scratch(&self) -> Result<()> {
        let _exclusive = self
            .toolkit
            .write()
            .map_err(|_| StarError::Configuration("toolkit lock poisoned".into()))?;
        self.scratch.teardown()
    }

    /// Run one command and classify its outcome.
    pub fn run(&self, invocation: CommandInvocation) -> Result<InvocationResult> {
        let toolkit = self.read_toolkit()?;
        let toolkit = configured(&toolkit)?;
        let lock = self.command_lock(invocation.name());
        let _serial = lock.lock().unwrap_or_else(|p| p.into_inner());
        self.execute(toolkit, invocation)
    }

    /// Decode the parameter file the last run of `command` left behind.
    pub fn collect(&self, command: &str) -> Result<ResultRecord> {
        let toolkit = self.read_toolkit()?;
        let toolkit = configured(&toolkit)?;
        let lock = self.command_lock(command);
        let _serial = lock.lock().unwrap_or_else(|p| p.into_inner());
        self.collect_with(toolkit, command)
    }

    /// Run a command and decode its parameter file as one step.
    pub fn call(&self, invocation: CommandInvocation) -> Result<ResultRecord> {
        let toolkit = self.read_toolkit()?;
        let toolkit = configured(&toolkit)?;
        let lock = self.command_lock(invocation.name());
        let _serial = lock.lock().unwrap_or_else(|p| p.into_inner());

        let command = invocation.name().to_string();
        self.execute(toolkit, invocation)?;
        self.collect_with(toolkit, &command)
    }

    /// A single parameter from the last run of `command`.
    pub fn read_value(&self, command: &str, parameter: &str) -> Result<Value> {
        let toolkit = self.read_toolkit()?;
        let toolkit = configured(&toolkit)?;
        let lock = self.command_lock(command);
        let _serial = lock.lock().unwrap_or_else(|p| p.into_inner());

        let scratch = self.scratch.ensure()?;
        let path = collector::output_path(&scratch, command);
        if !path.is_file() {
            return Err(StarError::MissingOutput {
                command: command.to_string(),
                path,
            });
        }
        let environment = self.environment(toolkit, &scratch);
        self.reader.read_value(
            &OutputFile {
                command,
                path: &path,
                toolkit,
                environment: &environment,
            },
            parameter,
        )
    }

    fn read_toolkit(&self) -> Result<RwLockReadGuard<'_, Option<ToolkitLocation>>> {
        self.toolkit
            .read()
            .map_err(|_| StarError::Configuration("toolkit lock poisoned".into()))
    }

    fn command_lock(&self, command: &str) -> Arc<Mutex<()>> {
        let mut locks = self.command_locks.lock().unwrap_or_else(|p| p.into_inner());
        locks
            .entry(command.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn environment(&self, toolkit: &ToolkitLocation, scratch: &Path) -> Vec<(OsString, OsString)> {
        build_environment(
            toolkit,
            scratch,
            EnvOptions {
                interactive: self.interactive,
            },
            std::env::vars_os(),
        )
    }

    fn execute(
        &self,
        toolkit: &ToolkitLocation,
        invocation: CommandInvocation,
    ) -> Result<InvocationResult> {
        let command = invocation.name().to_string();
        let scratch = self.scratch.ensure()?;
        let output_file = collector::output_path(&scratch, &command);
        discard_stale(&output_file)?;

        let program = toolkit.expand(invocation.program());
        let args: Vec<OsString> = invocation
            .argv(self.quiet)
            .into_iter()
            .map(OsString::from)
            .collect();
        debug!("Running {} {:?}", program.display(), args);

        let spec = ProcessSpec {
            program: program.clone(),
            args,
            env: self.environment(toolkit, &scratch),
            current_dir: None,
            interactive: self.interactive,
        };
        let timeout = invocation.timeout_override().or(self.timeout);

        let started_at = SystemTime::now();
        let started = Instant::now();
        let output = self
            .runner
            .output(&spec, timeout)
            .map_err(|err| match (err.kind(), timeout) {
                (io::ErrorKind::TimedOut, Some(limit)) => StarError::Timeout {
                    command: command.clone(),
                    timeout: limit,
                },
                (io::ErrorKind::NotFound, _) => StarError::CommandNotFound {
                    program: program.clone(),
                },
                _ => StarError::Io(err),
            })?;
        let elapsed = started.elapsed();

        // The applications write their error reports to stdout.
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !stdout.is_empty() {
            debug!("{command} stdout:\n{stdout}");
        }
        if !stderr.is_empty() {
            debug!("{command} stderr:\n{stderr}");
        }

        if !output.status.success() {
            return Err(StarError::Invocation {
                command,
                code: output.status.code().unwrap_or(-1),
                stdout,
                stderr,
            });
        }

        if !is_fresh(&output_file, started_at) {
            return Err(StarError::SilentFailure {
                command,
                stdout,
                stderr,
            });
        }

        debug!("{command} finished in {}ms", elapsed.as_millis());
        Ok(InvocationResult {
            command,
            exit_code: 0,
            output_file,
            stdout: invocation.wants_stdout().then_some(stdout),
            elapsed,
        })
    }

    fn collect_with(&self, toolkit: &ToolkitLocation, command: &str) -> Result<ResultRecord> {
        let scratch = self.scratch.ensure()?;
        let environment = self.environment(toolkit, &scratch);
        collector::collect(
            self.reader.as_ref(),
            command,
            &scratch,
            toolkit,
            &environment,
        )
    }
}

fn configured(guard: &Option<ToolkitLocation>) -> Result<&ToolkitLocation> {
    guard.as_ref().ok_or_else(|| {
        StarError::Configuration("no toolkit configured; call change_toolkit_path first".into())
    })
}

/// A parameter file left by an earlier run must not pass for this run's.
fn discard_stale(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Discarded stale {}", path.display());
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StarError::Io(err)),
    }
}

fn is_fresh(path: &Path, started_at: SystemTime) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    metadata
        .modified()
        .map(|modified| modified + FRESHNESS_SLACK >= started_at)
        .unwrap_or(true)
}

static DEFAULT_SESSION: OnceLock<Session> = OnceLock::new();

/// Process-wide session built from `StarConfig::load()` on first use. Its
/// scratch directory is removed when the process exits.
pub fn default_session() -> Result<&'static Session> {
    if let Some(session) = DEFAULT_SESSION.get() {
        return Ok(session);
    }
    let config = StarConfig::load()?;
    Ok(DEFAULT_SESSION.get_or_init(|| Session::from_config(&config)))
}

/// Run `invocation` in the default session.
pub fn run(invocation: CommandInvocation) -> Result<InvocationResult> {
    default_session()?.run(invocation)
}

/// Run `invocation` in the default session and decode its parameters.
pub fn call(invocation: CommandInvocation) -> Result<ResultRecord> {
    default_session()?.call(invocation)
}

/// Point the default session at another toolkit installation.
pub fn change_toolkit_path(path: impl AsRef<Path>) -> Result<()> {
    default_session()?.change_toolkit_path(path)
}

/// Root of the default session's toolkit, if configured.
pub fn toolkit_path() -> Option<PathBuf> {
    default_session()
        .ok()
        .and_then(Session::toolkit)
        .map(|t| t.root().to_path_buf())
}
