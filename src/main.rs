//! CLI entry point for the runlog tool.

use std::process::ExitCode;

mod app;
mod cli;

use app::exit_handler::ProcessExit;

#[tokio::main]
async fn main() -> ExitCode {
    match app::runtime::run_runlog().await {
        Ok(exit) => exit.into(),
        Err(error) => {
            eprintln!("error: {error:#}");
            ProcessExit::Failure.into()
        }
    }
}
