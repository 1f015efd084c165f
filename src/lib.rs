//! Invoke Starlink toolkit applications as child processes and read back the
//! parameters they leave in their scratch directory as typed records.

pub mod collector;
pub mod config;
pub mod environ;
pub mod errors;
pub mod hdstrace;
pub mod invocation;
pub mod record;
pub mod runner;
pub mod scratch;
pub mod session;
pub mod toolkit;
pub mod ui;

pub use crate::collector::{HdsTraceReader, RecordReader};
pub use crate::config::StarConfig;
pub use crate::errors::{Result, StarError};
pub use crate::invocation::{CommandInvocation, Param};
pub use crate::record::{ResultRecord, Value};
pub use crate::runner::{MockRunner, OsRunner, Runner};
pub use crate::scratch::ExecutionContext;
pub use crate::session::{
    InvocationResult, Session, SessionBuilder, call, change_toolkit_path, default_session, run,
    toolkit_path,
};
pub use crate::toolkit::ToolkitLocation;
