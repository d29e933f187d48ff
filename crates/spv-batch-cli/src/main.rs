//! main executable of spv-batch
use std::process::ExitCode;

use clap::Parser as _;
use spv_batch::batch::Cancellation;
use spv_batch_cli::{Cli, EXIT_FATAL};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let cancellation = Cancellation::new();
    let on_interrupt = cancellation.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        log::warn!("interrupted, waiting for running compilations to finish");
        on_interrupt.cancel();
    }) {
        log::warn!("could not install Ctrl-C handler: {err}");
    }

    match cli.run(cancellation) {
        Ok(outcome) => outcome.exit_code(),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}
