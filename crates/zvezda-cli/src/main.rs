mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::{serve::ServeArgs, user::UserSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "zvezda",
    about = "Open doors over HTTP: GPIO relay control behind basic auth",
    version,
    propagate_version = true
)]
struct Cli {
    /// Credential database
    #[arg(long, global = true, env = "ZVEZDA_DB", default_value = "zvezda.db")]
    db: PathBuf,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve(ServeArgs),

    /// Manage the users allowed to open doors
    User {
        #[command(subcommand)]
        subcommand: UserSubcommand,
    },
}

fn main() {
    // A missing .env is the normal case in production.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve(_) => tracing::Level::INFO,
        Commands::User { .. } => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Serve(args) => cmd::serve::run(&cli.db, args),
        Commands::User { subcommand } => cmd::user::run(&cli.db, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
