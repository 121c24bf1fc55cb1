//! Binary entrypoint for the echo plugin.

use std::io::{self, Write};
use std::process::ExitCode;

use wflow_e2e::echo::EchoPlugin;

fn main() -> ExitCode {
    match wflow_plugin_sdk::serve(EchoPlugin) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            writeln!(io::stderr().lock(), "wflow-echo-plugin: {error}").ok();
            ExitCode::FAILURE
        }
    }
}
