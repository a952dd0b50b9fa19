pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "bookworm",
    about = "BookWorm operator CLI",
    long_about = "Inspect BookWorm configuration, check readiness, apply migrations and look up orders.",
    after_help = "Examples:\n  bookworm doctor --json\n  bookworm config\n  bookworm orders reader-42 --limit 3"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, completion delegate settings, and database readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "List a user's most recent orders as JSON")]
    Orders {
        #[arg(help = "User id the orders belong to")]
        user_id: String,
        #[arg(long, help = "Number of orders to return (defaults to orders.history_limit)")]
        limit: Option<u32>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Orders { user_id, limit } => commands::orders::run(&user_id, limit),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
