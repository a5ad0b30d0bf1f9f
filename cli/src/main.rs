//! Undertow CLI - drive the position ledger and liquidation engine from
//! scenario files, or walk through a canned demonstration.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;

mod config;
mod demo;
mod runner;

use config::Scenario;
use runner::Runner;

#[derive(Parser)]
#[command(name = "undertow")]
#[command(about = "Undertow protocol engine CLI - run scenarios against the position ledger", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario file against a fresh engine
    Run {
        /// Path to the scenario TOML
        scenario: PathBuf,
    },

    /// Walk through a canned deposit / open / crash / liquidate sequence
    Demo,

    /// Protocol parameter operations
    Params {
        #[command(subcommand)]
        command: ParamsCommands,
    },
}

#[derive(Subcommand)]
enum ParamsCommands {
    /// Print the default parameter set as JSON
    Show,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { scenario } => {
            let scenario = Scenario::from_path(&scenario)?;
            if cli.verbose {
                println!(
                    "{} {} steps from price {}",
                    "Scenario:".bright_cyan(),
                    scenario.steps.len(),
                    scenario.initial_price
                );
            }
            let mut runner = Runner::new(&scenario)?;
            runner.run(&scenario)?;
        }
        Commands::Demo => {
            demo::run()?;
        }
        Commands::Params { command } => match command {
            ParamsCommands::Show => {
                let params = undertow::Params::default();
                println!("{}", serde_json::to_string_pretty(&params)?);
            }
        },
    }

    Ok(())
}
