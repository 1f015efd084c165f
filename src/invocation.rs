use std::fmt::Display;
use std::time::Duration;

/// One parameter of a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Positional(String),
    Keyword { name: String, value: String },
}

impl Param {
    /// Keyword names are case-insensitive to the applications; a single
    /// trailing `_` lets callers spell reserved words (`in_`).
    pub fn keyword(name: &str, value: impl Display) -> Self {
        let lowered = name.to_lowercase();
        let name = lowered.strip_suffix('_').unwrap_or(&lowered).to_string();
        Param::Keyword {
            name,
            value: value.to_string(),
        }
    }

    pub fn positional(value: impl Display) -> Self {
        Param::Positional(value.to_string().trim_end().to_string())
    }

    pub fn render(&self) -> String {
        match self {
            Param::Positional(value) => value.clone(),
            Param::Keyword { name, value } => format!("{name}={value}"),
        }
    }
}

/// A command to run once. Build it, then hand it to `Session::run` or
/// `Session::call`, which consume it.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandInvocation {
    program: String,
    name: String,
    params: Vec<Param>,
    reset: bool,
    capture_stdout: bool,
    timeout: Option<Duration>,
}

impl CommandInvocation {
    /// `program` may reference package variables (`$KAPPA_DIR/stats`);
    /// `name` is the application name its parameter file is written under.
    pub fn new(program: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            name: name.into(),
            params: Vec::new(),
            reset: false,
            capture_stdout: false,
            timeout: None,
        }
    }

    /// An application installed as `bin/<package>/<command>`.
    pub fn package(package: &str, command: &str) -> Self {
        Self::new(format!("${{STARLINK_DIR}}/bin/{package}/{command}"), command)
    }

    pub fn arg(mut self, value: impl Display) -> Self {
        self.params.push(Param::positional(value));
        self
    }

    pub fn param(mut self, name: &str, value: impl Display) -> Self {
        self.params.push(Param::keyword(name, value));
        self
    }

    /// Append the `RESET` keyword so stored defaults are ignored.
    pub fn reset(mut self) -> Self {
        self.reset = true;
        self
    }

    /// Keep stdout in the `InvocationResult` instead of only logging it.
    pub fn capture_stdout(mut self) -> Self {
        self.capture_stdout = true;
        self
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn wants_stdout(&self) -> bool {
        self.capture_stdout
    }

    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn has_keyword(&self, keyword: &str) -> bool {
        let keyword = keyword.to_lowercase();
        self.params
            .iter()
            .any(|p| matches!(p, Param::Keyword { name, .. } if *name == keyword))
    }

    /// Interpreted scripts do not understand ADAM keywords like `quiet`.
    pub fn is_script(&self) -> bool {
        self.program.ends_with(".py") || self.program.ends_with(".sh")
    }

    /// Argument vector, in order; `quiet` appends `quiet=true` when the caller
    /// did not set it and the command is not a script.
    pub fn argv(&self, quiet: bool) -> Vec<String> {
        let mut argv: Vec<String> = self.params.iter().map(Param::render).collect();
        if quiet && !self.is_script() && !self.has_keyword("quiet") {
            argv.push("quiet=true".to_string());
        }
        if self.reset {
            argv.push("RESET".to_string());
        }
        argv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_positional_then_keywords_in_order() {
        let inv = CommandInvocation::new("$KAPPA_DIR/stats", "stats")
            .arg("myndf.sdf ")
            .param("ORDER", true)
            .param("clip", "[3,3]");
        assert_eq!(inv.argv(false), vec!["myndf.sdf", "order=true", "clip=[3,3]"]);
    }

    #[test]
    fn trailing_underscore_stripped() {
        let inv = CommandInvocation::new("$KAPPA_DIR/add", "add")
            .param("in_", "a")
            .param("out", "b");
        assert_eq!(inv.argv(false), vec!["in=a", "out=b"]);
    }

    #[test]
    fn quiet_injected_only_when_absent() {
        let plain = CommandInvocation::new("$KAPPA_DIR/stats", "stats").param("ndf", "x");
        assert_eq!(plain.argv(true), vec!["ndf=x", "quiet=true"]);

        let explicit = plain.clone().param("QUIET", false);
        assert_eq!(explicit.argv(true), vec!["ndf=x", "quiet=false"]);

        let script = CommandInvocation::new("$SMURF_DIR/jsasplit.py", "jsasplit");
        assert!(script.argv(true).is_empty());
    }

    #[test]
    fn reset_goes_last() {
        let inv = CommandInvocation::new("$KAPPA_DIR/stats", "stats")
            .reset()
            .param("ndf", "x");
        assert_eq!(inv.argv(true), vec!["ndf=x", "quiet=true", "RESET"]);
    }

    #[test]
    fn package_builds_root_relative_program() {
        let inv = CommandInvocation::package("cupid", "findclumps");
        assert_eq!(inv.program(), "${STARLINK_DIR}/bin/cupid/findclumps");
        assert_eq!(inv.name(), "findclumps");
    }
}
