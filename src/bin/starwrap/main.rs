use anyhow::Result;
use std::process::ExitCode;

use starwrap::{Session, StarConfig, StarError, ui};

mod args;
use args::{CliArgs, usage};

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    ui::init_logging();

    let cli = match CliArgs::parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e}\n{}", usage());
            return ExitCode::from(2);
        }
    };

    match execute(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            ui::report_error(&err);
            // Mirror the application's own status where there is one.
            let code = err
                .exit_code()
                .and_then(|c| u8::try_from(c).ok())
                .filter(|c| *c != 0)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

/// The session, and with it the scratch directory, is dropped before `main`
/// returns.
fn execute(cli: &CliArgs) -> std::result::Result<(), StarError> {
    let mut config = StarConfig::load()?;
    if cli.starlink.is_some() {
        config.toolkit_dir = cli.starlink.clone();
    }
    let session = Session::from_config(&config);

    let invocation = cli.invocation();
    let command = invocation.name().to_string();
    let capture = invocation.wants_stdout();

    let record = if capture {
        let result = session.run(invocation)?;
        if let Some(stdout) = result.stdout.as_deref() {
            print!("{stdout}");
        }
        session.collect(&command)?
    } else {
        session.call(invocation)?
    };

    print_record(cli, &command, &record).map_err(|e| StarError::Io(std::io::Error::other(e)))
}

fn print_record(cli: &CliArgs, command: &str, record: &starwrap::ResultRecord) -> Result<()> {
    if cli.json_output {
        println!("{}", serde_json::to_string_pretty(record)?);
    } else {
        ui::heading(command);
        println!("{record}");
    }
    Ok(())
}
