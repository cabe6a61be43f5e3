//! OMOP ETL CLI.

use anyhow::Result;
use clap::Parser;
use omop_cli::cli::{Cli, Command};
use omop_cli::commands::{run_etl, run_merge, run_steps};
use omop_cli::logging::init_logging;
use omop_cli::summary::{print_outcome, print_step_listing};
use omop_model::EtlSettings;
use tracing::error;

fn main() {
    let cli = Cli::parse();
    cli.color.write_global();
    if let Err(error) = init_logging(&cli.log_config()) {
        eprintln!("error: failed to initialize logging: {error}");
        std::process::exit(1);
    }
    let exit_code = match run(&cli.command) {
        Ok(()) => 0,
        Err(err) => {
            let message = format!("{err:#}");
            error!(critical = true, error = %message, "run failed");
            eprintln!("error: {message}");
            1
        }
    };
    std::process::exit(exit_code);
}

fn run(command: &Command) -> Result<()> {
    let settings = EtlSettings::from_env()?;
    match command {
        Command::RunEtl(args) => print_outcome(&run_etl(args, settings)?),
        Command::RunMerge(args) => print_outcome(&run_merge(args, settings)?),
        Command::Steps(args) => print_step_listing(&run_steps(args, settings)?),
    }
    Ok(())
}
