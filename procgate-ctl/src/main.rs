//! Process gate CLI - hold gated application processes at birth for an agent

mod cli;
mod commands;
mod logging;
mod runner;

use clap::Parser;
use cli::{Cli, Commands};
use commands::check_requirements;
use runner::{RunConfig, run_monitor};

fn main() {
    let cli = Cli::parse();

    logging::init_logger(cli.verbose);

    if let Some(Commands::Check) = cli.command {
        check_requirements();
        return;
    }

    let config = RunConfig {
        rules: cli.rules,
        agent: cli.agent,
        package_db: cli.package_db,
        app_process: cli.app_process,
        spawner_prefix: cli.spawner_prefix,
    };

    if let Err(e) = run_monitor(config) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_requirements_runs() {
        check_requirements();
    }
}
