use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use crate::errors::{Result, StarError};
use crate::hdstrace::parse_trace;
use crate::record::{ResultRecord, Value};
use crate::runner::{OsRunner, ProcessSpec, Runner};
use crate::toolkit::ToolkitLocation;

/// Extension of the HDS container an application leaves its parameters in.
pub const OUTPUT_EXTENSION: &str = "sdf";

/// The parameter file `command` writes inside `scratch`.
pub fn output_path(scratch: &Path, command: &str) -> PathBuf {
    scratch.join(format!("{command}.{OUTPUT_EXTENSION}"))
}

/// A parameter file to be decoded.
#[derive(Debug, Clone, Copy)]
pub struct OutputFile<'a> {
    pub command: &'a str,
    pub path: &'a Path,
    pub toolkit: &'a ToolkitLocation,
    /// Environment to run any helper programs with.
    pub environment: &'a [(OsString, OsString)],
}

/// Decodes a parameter file into a record. The container format belongs to
/// the toolkit, so the decoding lives behind this seam.
pub trait RecordReader: Send + Sync {
    fn read(&self, file: &OutputFile<'_>) -> Result<ResultRecord>;

    /// One named parameter from the file.
    fn read_value(&self, file: &OutputFile<'_>, parameter: &str) -> Result<Value> {
        let record = self.read(file)?;
        record.get(parameter).cloned().ok_or_else(|| {
            StarError::malformed(file.command, format!("no parameter named {parameter}"))
        })
    }
}

/// Decodes through the toolkit's own `hdstrace` program.
pub struct HdsTraceReader {
    runner: Arc<dyn Runner>,
}

impl HdsTraceReader {
    pub fn new(runner: Arc<dyn Runner>) -> Self {
        Self { runner }
    }

    fn trace_args(path: &Path) -> Vec<OsString> {
        // hdstrace takes the container name without its extension
        let object = path.with_extension("");
        vec![
            object.into_os_string(),
            "full".into(),
            "newline".into(),
            "nlines=all".into(),
            "widepage".into(),
        ]
    }
}

impl Default for HdsTraceReader {
    fn default() -> Self {
        Self::new(Arc::new(OsRunner))
    }
}

impl RecordReader for HdsTraceReader {
    fn read(&self, file: &OutputFile<'_>) -> Result<ResultRecord> {
        let spec = ProcessSpec {
            program: file.toolkit.bin_dir().join("hdstrace"),
            args: Self::trace_args(file.path),
            env: file.environment.to_vec(),
            current_dir: None,
            interactive: false,
        };
        debug!("Tracing {}", file.path.display());

        let output = self.runner.output(&spec, None).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => StarError::Configuration(format!(
                "hdstrace not found at {}",
                spec.program.display()
            )),
            _ => StarError::Io(err),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            debug!(
                "hdstrace failed on {}:\n{}\n{}",
                file.path.display(),
                stdout,
                String::from_utf8_lossy(&output.stderr)
            );
            return Err(StarError::malformed(
                file.command,
                format!(
                    "hdstrace exited with {}",
                    output.status.code().unwrap_or(-1)
                ),
            ));
        }

        parse_trace(file.command, &stdout)
    }
}

/// Locate `command`'s parameter file in `scratch` and decode it.
pub fn collect(
    reader: &dyn RecordReader,
    command: &str,
    scratch: &Path,
    toolkit: &ToolkitLocation,
    environment: &[(OsString, OsString)],
) -> Result<ResultRecord> {
    let path = output_path(scratch, command);
    if !path.is_file() {
        return Err(StarError::MissingOutput {
            command: command.to_string(),
            path,
        });
    }
    reader.read(&OutputFile {
        command,
        path: &path,
        toolkit,
        environment,
    })
}
