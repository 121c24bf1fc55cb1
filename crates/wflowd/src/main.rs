//! Entry point for the `wflowd` binary.

use std::error::Error;
use std::io::{self, Write};
use std::process::ExitCode;

use wflow_config::{Config, ConfigError};

fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(ConfigError::Cli(error)) => error.exit(),
        Err(error) => return fail(&error),
    };
    match wflowd::run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => fail(&error),
    }
}

fn fail(error: &dyn Error) -> ExitCode {
    drop(writeln!(io::stderr(), "wflowd: {error}"));
    ExitCode::FAILURE
}
