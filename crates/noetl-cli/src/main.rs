// NoETL CLI
//
// Thin HTTP client over noetl-api's control surface: run a playbook,
// check an execution's status, request a cancellation. Exit codes
// follow spec.md §6: 0 success, 2 validation, 3 not found, 4 conflict,
// 5 internal.

mod client;
mod commands;
mod output;

use clap::{Parser, Subcommand};

use client::{Client, ClientError};
use commands::{cancel::CancelArgs, run::RunArgs, status::StatusArgs};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "noetl")]
#[command(about = "NoETL CLI - run playbooks, inspect executions, cancel them")]
#[command(version)]
pub struct Cli {
    /// API base URL
    #[arg(long, env = "NOETL_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a playbook for execution
    Run(RunArgs),

    /// Fetch an execution's status
    Status(StatusArgs),

    /// Cancel a running execution
    Cancel(CancelArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let client = Client::new(&cli.api_url);
    let output = OutputFormat::from_str(&cli.output);

    let result = match cli.command {
        Commands::Run(args) => commands::run::run(args, &client, output, cli.quiet).await,
        Commands::Status(args) => commands::status::run(args, &client, output).await,
        Commands::Cancel(args) => commands::cancel::run(args, &client, output, cli.quiet).await,
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(exit_code(&err));
    }
}

fn exit_code(err: &ClientError) -> i32 {
    err.exit_code()
}
