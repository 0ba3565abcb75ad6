use anyhow::Result;
use clap::{CommandFactory, Parser};
use fedtax::cli::Cli;
use fedtax::dispatcher::dispatch_command;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so --json output stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    match cli.command {
        Some(command) => dispatch_command(command, cli.json).await,
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}
