use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

fn main() -> Result<()> {
    color_eyre::install()?;
    devfeat_core::logging::init()?;

    let parsed = cli::Cli::parse();

    let exit_code = match parsed.command {
        cli::Commands::Build(args) => commands::build::run(&args)?,
        cli::Commands::Features {
            command: cli::FeaturesCommand::Test(args),
        } => commands::features_test::run(&args)?,
    };

    std::process::exit(exit_code);
}
