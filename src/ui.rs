use colored::*;

use crate::errors::StarError;

pub fn init_logging() {
    // Library diagnostics are opt-in via RUST_LOG; command output goes to stdout.
    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var("RUST_LOG").is_err() {
        builder.filter_level(log::LevelFilter::Warn);
    }
    let _ = builder.try_init();
}

/// Terse failure line for the terminal. Captured streams of the failed
/// command are only logged, at `debug`, by the session that ran it.
pub fn report_error(err: &StarError) {
    eprintln!("{} {}", "✗".red().bold(), err.to_string().red());
}

pub fn heading(command: &str) {
    println!("{} {}", ">>".bold(), command.cyan().bold());
}
