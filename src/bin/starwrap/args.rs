use anyhow::{Result, anyhow};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use starwrap::CommandInvocation;

#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub starlink: Option<PathBuf>, // --starlink
    pub timeout: Option<Duration>, // --timeout
    pub json_output: bool,         // --json
    pub stdout: bool,              // --stdout
    pub reset: bool,               // --reset
    pub program: String,
    pub command: String,
    pub params: Vec<String>,
}

impl CliArgs {
    /// Parse command-line arguments
    pub fn parse() -> Result<Self> {
        let args: Vec<String> = env::args().collect();
        Self::parse_from(&args[1..])
    }

    /// Parse from a slice of arguments (for testing)
    pub fn parse_from(args: &[String]) -> Result<Self> {
        let mut result = CliArgs::default();
        let mut positional = Vec::new();

        let mut i = 0;
        while i < args.len() {
            let arg = &args[i];

            // Options are only recognised before the program.
            if !positional.is_empty() {
                positional.push(arg.clone());
                i += 1;
                continue;
            }

            match arg.as_str() {
                "--starlink" => {
                    i += 1;
                    if i >= args.len() {
                        return Err(anyhow!("{arg} requires a value"));
                    }
                    result.starlink = Some(PathBuf::from(&args[i]));
                }
                "--timeout" => {
                    i += 1;
                    if i >= args.len() {
                        return Err(anyhow!("{arg} requires a value"));
                    }
                    let secs: f64 = args[i]
                        .parse()
                        .map_err(|_| anyhow!("invalid --timeout value: {}", args[i]))?;
                    if !secs.is_finite() || secs <= 0.0 {
                        return Err(anyhow!("--timeout must be a positive number of seconds"));
                    }
                    result.timeout = Some(Duration::from_secs_f64(secs));
                }
                "--json" => {
                    result.json_output = true;
                }
                "--stdout" => {
                    result.stdout = true;
                }
                "--reset" => {
                    result.reset = true;
                }
                unknown if unknown.starts_with("--") => {
                    return Err(anyhow!("Unknown argument: {unknown}"));
                }
                _ => positional.push(arg.clone()),
            }

            i += 1;
        }

        let mut positional = positional.into_iter();
        result.program = positional
            .next()
            .ok_or_else(|| anyhow!("missing <program>"))?;
        result.command = positional
            .next()
            .ok_or_else(|| anyhow!("missing <command-name>"))?;
        result.params = positional.collect();
        Ok(result)
    }

    /// The invocation these arguments describe. `NAME=VALUE` is a keyword.
    pub fn invocation(&self) -> CommandInvocation {
        let mut invocation = CommandInvocation::new(&self.program, &self.command);
        for param in &self.params {
            invocation = match param.split_once('=') {
                Some((name, value)) if !name.is_empty() => invocation.param(name, value),
                _ => invocation.arg(param),
            };
        }
        if self.reset {
            invocation = invocation.reset();
        }
        if self.stdout {
            invocation = invocation.capture_stdout();
        }
        if let Some(limit) = self.timeout {
            invocation = invocation.timeout(limit);
        }
        invocation
    }
}

pub fn usage() -> &'static str {
    "usage: starwrap [--starlink DIR] [--timeout SECS] [--json] [--stdout] [--reset] \
     <program> <command-name> [PARAM ...]"
}
